//! Dashboard state
//!
//! [`Dashboard`] is the one place that owns the registry, the viewport
//! controller, the derived render views and the user-facing notices. The
//! terminal loop and the headless recorder both drive it through the methods
//! below.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use crate::config::Config;
use crate::events::{Message, SequenceGate};
use crate::ingest::{IngestReport, Ingestor};
use crate::registry::{DatasetRegistry, LoadReport};
use crate::render::{self, ExportError, RenderCache};
use crate::store::{ClearReport, HistoryStore, StoreError};
use crate::viewport::{Nudge, Track, ViewportController};

const MAX_NOTICES: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub text: String,
    pub at: DateTime<Utc>,
}

/// Health of the live feed
#[derive(Debug, Clone, Default)]
pub struct FeedStatus {
    pub readings: usize,
    pub last_reading: Option<DateTime<Utc>>,
    pub last_error: Option<(DateTime<Utc>, String)>,
    pub last_ingest: Option<IngestReport>,
}

impl FeedStatus {
    /// True when the most recent fetch failed
    pub fn is_failing(&self) -> bool {
        match (&self.last_error, self.last_reading) {
            (Some((failed, _)), Some(ok)) => *failed > ok,
            (Some(_), None) => true,
            _ => false,
        }
    }
}

/// What a reset changed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResetOutcome {
    /// The config file changed; the caller should rebuild the feed
    pub config_changed: bool,
}

pub struct Dashboard {
    config: Config,
    config_path: Option<PathBuf>,
    ingestor: Ingestor,
    registry: DatasetRegistry,
    viewport: ViewportController,
    cache: RenderCache,
    notices: VecDeque<Notice>,
    gate: SequenceGate,
    feed: FeedStatus,
    export_dir: PathBuf,
    disk_usage: Option<u64>,
}

impl Dashboard {
    pub fn new(
        config: Config,
        config_path: Option<PathBuf>,
        store: HistoryStore,
        export_dir: PathBuf,
        now: DateTime<Utc>,
    ) -> Self {
        let (registry, report) =
            DatasetRegistry::load(&config.tracked_keys, config.retention_hours, &store, now);
        let viewport = ViewportController::new(config.retention_hours, Track::new(0.0), now);

        let mut dashboard = Self {
            config,
            config_path,
            ingestor: Ingestor::new(store),
            registry,
            viewport,
            cache: RenderCache::default(),
            notices: VecDeque::new(),
            gate: SequenceGate::new(),
            feed: FeedStatus::default(),
            export_dir,
            disk_usage: None,
        };
        dashboard.note_load(&report, now);
        dashboard.refresh_disk_usage();
        dashboard.recompute();
        dashboard
    }

    fn note_load(&mut self, report: &LoadReport, now: DateTime<Utc>) {
        if let Some(error) = &report.error {
            self.notify(NoticeLevel::Error, format!("history unavailable: {error}"), now);
        }
        if report.unreadable_shards > 0 {
            self.notify(
                NoticeLevel::Warn,
                format!("{} history shard(s) could not be read", report.unreadable_shards),
                now,
            );
        }
        if report.malformed > 0 {
            self.notify(
                NoticeLevel::Warn,
                format!("skipped {} malformed history record(s)", report.malformed),
                now,
            );
        }
    }

    pub fn notify(&mut self, level: NoticeLevel, text: impl Into<String>, at: DateTime<Utc>) {
        let text = text.into();
        // Repeated failures update the last notice instead of flooding the panel
        if let Some(last) = self.notices.back_mut() {
            if last.level == level && last.text == text {
                last.at = at;
                return;
            }
        }
        if self.notices.len() == MAX_NOTICES {
            self.notices.pop_front();
        }
        self.notices.push_back(Notice { level, text, at });
    }

    fn recompute(&mut self) {
        let viewport = self.viewport.current_viewport();
        self.cache.recompute(&self.registry, viewport);
    }

    /// Apply a poller message. Returns false if it was stale and dropped.
    pub fn handle_message(&mut self, message: Message, now: DateTime<Utc>) -> bool {
        let seq = message.seq();
        if !self.gate.accept(seq) {
            tracing::debug!(seq, "dropping stale poll result");
            return false;
        }

        match message {
            Message::Reading { values, .. } => {
                let report = self.ingestor.ingest(&values, now, &mut self.registry);
                if let Some(error) = &report.last_error {
                    self.notify(
                        NoticeLevel::Warn,
                        format!("history not saved, showing in memory only: {error}"),
                        now,
                    );
                }
                self.feed.readings += 1;
                self.feed.last_reading = Some(now);
                self.feed.last_ingest = Some(report);
                self.viewport.follow(now);
                self.refresh_disk_usage();
                self.recompute();
            }
            Message::FeedFailed { at, error, .. } => {
                self.notify(NoticeLevel::Error, format!("feed: {error}"), at);
                self.feed.last_error = Some((at, error));
            }
        }
        true
    }

    pub fn set_track_width(&mut self, width: f64) {
        let before = self.viewport.current_viewport();
        self.viewport.set_track_width(width);
        if self.viewport.current_viewport() != before {
            self.recompute();
        }
    }

    /// Press on the overview track. Returns true if it grabbed the brush.
    pub fn pointer_down(&mut self, x: f64) -> bool {
        self.viewport.on_drag_start(x)
    }

    /// Pointer moved with the button held; only the detail chart follows
    pub fn pointer_drag(&mut self, x: f64) {
        self.viewport.on_drag_move(x);
    }

    pub fn pointer_up(&mut self) -> bool {
        let ended = self.viewport.on_drag_end();
        if ended {
            self.recompute();
        }
        ended
    }

    pub fn nudge(&mut self, nudge: Nudge, step: f64) -> bool {
        let changed = self.viewport.nudge(nudge, step);
        if changed {
            self.recompute();
        }
        changed
    }

    pub fn toggle_series(&mut self, index: usize) -> Option<bool> {
        let hidden = self.registry.toggle(index)?;
        self.recompute();
        Some(hidden)
    }

    /// Reset the view to the full retention window.
    ///
    /// The config file is re-read first; if that fails the current config is
    /// kept. Results of fetches issued up to `issued` are discarded.
    pub fn reset_view(&mut self, now: DateTime<Utc>, issued: u64) -> ResetOutcome {
        let mut outcome = ResetOutcome::default();
        if let Some(path) = self.config_path.clone() {
            match Config::load_or_default(&path) {
                Ok(config) if config != self.config => {
                    tracing::info!(path = %path.display(), "config changed");
                    self.config = config;
                    outcome.config_changed = true;
                    self.notify(NoticeLevel::Info, "configuration reloaded", now);
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(error = %e, "config reload failed, keeping previous");
                    self.notify(NoticeLevel::Warn, format!("{e}; keeping previous config"), now);
                }
            }
        }

        self.reload_registry(now);
        self.viewport.reset(self.config.retention_hours, now);
        self.gate.bump(issued);
        self.recompute();
        outcome
    }

    fn reload_registry(&mut self, now: DateTime<Utc>) {
        let (mut registry, report) = DatasetRegistry::load(
            &self.config.tracked_keys,
            self.config.retention_hours,
            self.ingestor.store(),
            now,
        );
        registry.carry_hidden_from(&self.registry);
        self.registry = registry;
        self.note_load(&report, now);
        self.refresh_disk_usage();
    }

    /// Delete all stored history and reload what remains.
    pub fn clear_history(&mut self, now: DateTime<Utc>, issued: u64) -> Result<ClearReport, StoreError> {
        let result = self.ingestor.store().clear_all();
        match &result {
            Ok(report) => self.notify(
                NoticeLevel::Info,
                format!("history cleared ({} shard file(s))", report.removed.len()),
                now,
            ),
            Err(e) => self.notify(NoticeLevel::Error, e.to_string(), now),
        }

        self.registry.clear_points();
        self.reload_registry(now);
        self.viewport.reset(self.config.retention_hours, now);
        self.gate.bump(issued);
        self.recompute();
        result
    }

    /// Export the visible window as CSV into the export directory
    pub fn export_visible(&mut self, now: DateTime<Utc>) -> Result<PathBuf, ExportError> {
        let viewport = self.viewport.current_viewport();
        let result = render::export_csv(&self.registry, viewport)
            .and_then(|csv| render::write_export(&self.export_dir, &csv, now));
        match &result {
            Ok(path) => self.notify(NoticeLevel::Info, format!("exported {}", path.display()), now),
            Err(ExportError::NoVisibleSeries) => {
                self.notify(NoticeLevel::Warn, "no data to export", now)
            }
            Err(e) => self.notify(NoticeLevel::Error, e.to_string(), now),
        }
        result
    }

    pub fn refresh_disk_usage(&mut self) {
        self.disk_usage = self.ingestor.store().disk_usage().ok();
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn registry(&self) -> &DatasetRegistry {
        &self.registry
    }

    pub fn viewport(&self) -> &ViewportController {
        &self.viewport
    }

    pub fn cache(&self) -> &RenderCache {
        &self.cache
    }

    pub fn notices(&self) -> &VecDeque<Notice> {
        &self.notices
    }

    pub fn feed_status(&self) -> &FeedStatus {
        &self.feed
    }

    pub fn store(&self) -> &HistoryStore {
        self.ingestor.store()
    }

    pub fn export_dir(&self) -> &Path {
        &self.export_dir
    }

    pub fn disk_usage(&self) -> Option<u64> {
        self.disk_usage
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::FeedValues;
    use crate::render::SeriesStats;
    use chrono::{Duration, TimeZone};
    use serde_json::json;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 15, 12, 0, 0).unwrap()
    }

    fn reading(seq: u64, value: f64) -> Message {
        let mut values = FeedValues::new();
        values.insert("ai1".into(), json!(value));
        Message::Reading {
            seq,
            at: now(),
            values,
        }
    }

    fn dashboard(dir: &Path) -> Dashboard {
        let store = HistoryStore::open(dir.join("data")).unwrap();
        let mut dashboard = Dashboard::new(
            Config::default(),
            Some(dir.join("wqmon.json")),
            store,
            dir.join("exports"),
            now(),
        );
        dashboard.set_track_width(100.0);
        dashboard
    }

    #[test]
    fn test_reading_updates_series_and_stats() {
        let dir = tempfile::tempdir().unwrap();
        let mut d = dashboard(dir.path());

        assert!(d.handle_message(reading(1, 8.5), now()));
        assert_eq!(d.registry().get("ai1").unwrap().series().len(), 1);
        assert!(matches!(d.cache().cards[0].stats, SeriesStats::Summary { count: 1, .. }));
        assert_eq!(d.cache().cards[1].stats, SeriesStats::NoData);
        assert_eq!(d.feed_status().readings, 1);
    }

    #[test]
    fn test_stale_results_are_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let mut d = dashboard(dir.path());

        assert!(d.handle_message(reading(2, 1.0), now()));
        assert!(!d.handle_message(reading(1, 2.0), now()));

        // Fetch 3 started before the reset and lands after it
        d.reset_view(now(), 3);
        assert!(!d.handle_message(reading(3, 3.0), now()));
        assert!(d.handle_message(reading(4, 4.0), now()));

        let values: Vec<f64> = d
            .registry()
            .get("ai1")
            .unwrap()
            .series()
            .points()
            .iter()
            .map(|p| p.value)
            .collect();
        assert_eq!(values, vec![1.0, 4.0]);
    }

    #[test]
    fn test_stats_recompute_on_drag_end_only() {
        let dir = tempfile::tempdir().unwrap();
        let mut d = dashboard(dir.path());
        d.handle_message(reading(1, 8.5), now());

        // Shrink the brush to the oldest quarter: the sample falls outside
        assert!(d.pointer_down(99.5));
        d.pointer_drag(25.0);
        assert!(matches!(d.cache().cards[0].stats, SeriesStats::Summary { .. }));
        assert!(d.pointer_up());
        assert_eq!(d.cache().cards[0].stats, SeriesStats::NoData);
        assert!(!d.pointer_up());
    }

    #[test]
    fn test_toggle_recomputes() {
        let dir = tempfile::tempdir().unwrap();
        let mut d = dashboard(dir.path());
        assert_eq!(d.toggle_series(1), Some(true));
        assert_eq!(d.cache().cards.len(), 1);
        assert_eq!(d.cache().table.columns.len(), 1);
        assert_eq!(d.toggle_series(5), None);
    }

    #[test]
    fn test_reset_rereads_config() {
        let dir = tempfile::tempdir().unwrap();
        let mut d = dashboard(dir.path());
        d.toggle_series(0);

        std::fs::write(
            dir.path().join("wqmon.json"),
            r#"{ "retentionHours": 6, "params": [ { "key": "ai1", "label": "SS" } ] }"#,
        )
        .unwrap();
        let outcome = d.reset_view(now(), 0);
        assert!(outcome.config_changed);
        assert_eq!(d.config().retention_hours, 6);
        assert_eq!(d.registry().datasets().len(), 1);
        assert!(d.registry().get("ai1").unwrap().hidden);
        assert_eq!(d.viewport().window().span(), Duration::hours(6));

        std::fs::write(dir.path().join("wqmon.json"), "{ broken").unwrap();
        let outcome = d.reset_view(now(), 0);
        assert!(!outcome.config_changed);
        assert_eq!(d.config().retention_hours, 6);
        assert_eq!(d.notices().back().map(|n| n.level), Some(NoticeLevel::Warn));
    }

    #[test]
    fn test_clear_history() {
        let dir = tempfile::tempdir().unwrap();
        let mut d = dashboard(dir.path());
        d.handle_message(reading(1, 8.5), now());
        assert!(d.disk_usage().unwrap_or(0) > 0);

        let report = d.clear_history(now(), 1).unwrap();
        assert_eq!(report.removed.len(), 1);
        assert_eq!(d.registry().total_points(), 0);
        assert!(d.store().shard_files().unwrap().is_empty());
    }

    #[test]
    fn test_export_visible() {
        let dir = tempfile::tempdir().unwrap();
        let mut d = dashboard(dir.path());
        d.handle_message(reading(1, 8.5), now() + Duration::seconds(1));

        let later = now() + Duration::minutes(1);
        let path = d.export_visible(later).unwrap();
        let csv = std::fs::read_to_string(path).unwrap();
        assert!(csv.starts_with("Timestamp,Suspended Solids,Turbidity\n"));
        assert!(csv.contains(",8.5,\n"));

        d.toggle_series(0);
        d.toggle_series(1);
        assert!(matches!(d.export_visible(later), Err(ExportError::NoVisibleSeries)));
    }
}
