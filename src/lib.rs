//! Water-quality monitoring: a retention-bounded sample history on disk and a
//! terminal dashboard with a brushable overview/detail chart.

pub mod cli;
pub mod config;
pub mod dashboard;
pub mod events;
pub mod feed;
pub mod ingest;
pub mod poller;
pub mod registry;
pub mod render;
pub mod series;
pub mod store;
pub mod tui;
pub mod ui;
pub mod viewport;
