//! In-memory datasets for every tracked key
//!
//! The registry is seeded from a store read and then kept current by live
//! readings. Each dataset carries its display metadata and a retention-pruned
//! [`Series`].

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use ratatui::style::Color;

use crate::config::TrackedKey;
use crate::series::{Point, Series};
use crate::store::{self, HistoryStore};

/// Series colours, assigned by palette slot
pub const CHART_COLORS: [Color; 6] = [
    Color::Rgb(0xfa, 0xcc, 0x15),
    Color::Rgb(0x22, 0xc5, 0x5e),
    Color::Rgb(0x3b, 0x82, 0xf6),
    Color::Rgb(0xec, 0x48, 0x99),
    Color::Rgb(0x8b, 0x5c, 0xf6),
    Color::Rgb(0xef, 0x44, 0x44),
];

pub fn palette_color(slot: usize) -> Color {
    CHART_COLORS[slot % CHART_COLORS.len()]
}

#[derive(Debug, Clone)]
pub struct Dataset {
    pub key: String,
    pub label: String,
    pub unit: String,
    pub color: Color,
    pub hidden: bool,
    series: Series,
}

impl Dataset {
    fn new(tracked: &TrackedKey, position: usize) -> Self {
        Self {
            key: tracked.key.clone(),
            label: tracked.label.clone(),
            unit: tracked.unit.clone(),
            color: palette_color(tracked.color_slot.unwrap_or(position)),
            hidden: false,
            series: Series::new(),
        }
    }

    pub fn series(&self) -> &Series {
        &self.series
    }

    /// Label with the unit appended, if any
    pub fn display_name(&self) -> String {
        if self.unit.is_empty() {
            self.label.clone()
        } else {
            format!("{} ({})", self.label, self.unit)
        }
    }
}

/// What happened while seeding the registry from disk
#[derive(Debug, Default)]
pub struct LoadReport {
    pub samples: usize,
    pub malformed: usize,
    pub unreadable_shards: usize,
    /// Set when the store could not be read at all
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct DatasetRegistry {
    retention_hours: u32,
    datasets: Vec<Dataset>,
    index: HashMap<String, usize>,
}

impl DatasetRegistry {
    /// An empty registry for the given keys
    pub fn new(keys: &[TrackedKey], retention_hours: u32) -> Self {
        let datasets: Vec<Dataset> = keys
            .iter()
            .enumerate()
            .map(|(position, tracked)| Dataset::new(tracked, position))
            .collect();
        let index = datasets
            .iter()
            .enumerate()
            .map(|(i, d)| (d.key.clone(), i))
            .collect();
        Self {
            retention_hours,
            datasets,
            index,
        }
    }

    /// Seed a registry from the store. Store failures leave the affected
    /// series empty and are described in the report.
    pub fn load(
        keys: &[TrackedKey],
        retention_hours: u32,
        store: &HistoryStore,
        now: DateTime<Utc>,
    ) -> (Self, LoadReport) {
        let mut registry = Self::new(keys, retention_hours);
        let mut report = LoadReport::default();

        match store.read_all(retention_hours, now) {
            Ok(mut snapshot) => {
                report.malformed = snapshot.malformed;
                report.unreadable_shards = snapshot.shard_errors.len();
                for dataset in &mut registry.datasets {
                    if let Some(points) = snapshot.series.remove(&dataset.key) {
                        report.samples += points.len();
                        dataset.series = Series::from_points(points);
                    }
                }
                tracing::info!(
                    samples = report.samples,
                    malformed = report.malformed,
                    shards = snapshot.shards_read.len(),
                    "history loaded"
                );
            }
            Err(e) => {
                tracing::error!(error = %e, "could not load history");
                report.error = Some(e.to_string());
            }
        }

        (registry, report)
    }

    pub fn retention_hours(&self) -> u32 {
        self.retention_hours
    }

    pub fn retention(&self) -> Duration {
        store::retention_span(self.retention_hours)
    }

    pub fn is_tracked(&self, key: &str) -> bool {
        self.index.contains_key(key)
    }

    /// Add a point to a tracked key's series and prune it to the retention
    /// window. Returns false for untracked keys.
    pub fn push(&mut self, key: &str, timestamp: DateTime<Utc>, value: f64, now: DateTime<Utc>) -> bool {
        let cutoff = store::retention_cutoff(now, self.retention_hours);
        let Some(&i) = self.index.get(key) else {
            return false;
        };
        let series = &mut self.datasets[i].series;
        series.push(Point::new(timestamp, value));
        series.prune_before(cutoff);
        true
    }

    /// Flip a dataset's hidden flag, returning the new value
    pub fn toggle(&mut self, index: usize) -> Option<bool> {
        let dataset = self.datasets.get_mut(index)?;
        dataset.hidden = !dataset.hidden;
        Some(dataset.hidden)
    }

    pub fn toggle_key(&mut self, key: &str) -> Option<bool> {
        let i = *self.index.get(key)?;
        self.toggle(i)
    }

    /// Copy hidden flags from another registry for keys both share
    pub fn carry_hidden_from(&mut self, other: &DatasetRegistry) {
        for dataset in &mut self.datasets {
            if let Some(previous) = other.get(&dataset.key) {
                dataset.hidden = previous.hidden;
            }
        }
    }

    /// Datasets not hidden, in configuration order
    pub fn visible(&self) -> impl Iterator<Item = &Dataset> {
        self.datasets.iter().filter(|d| !d.hidden)
    }

    pub fn get(&self, key: &str) -> Option<&Dataset> {
        self.index.get(key).map(|&i| &self.datasets[i])
    }

    pub fn datasets(&self) -> &[Dataset] {
        &self.datasets
    }

    pub fn clear_points(&mut self) {
        for dataset in &mut self.datasets {
            dataset.series.clear();
        }
    }

    pub fn total_points(&self) -> usize {
        self.datasets.iter().map(|d| d.series.len()).sum()
    }
}
