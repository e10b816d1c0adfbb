//! Statistics, history table and CSV export for the visible window
//!
//! Everything here is derived from the registry and a [`Viewport`]; the
//! dashboard recomputes it when a gesture ends, a series is toggled or new
//! data arrives, never on intermediate pointer moves.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local, Utc};
use ratatui::style::Color;
use thiserror::Error;

use crate::registry::{Dataset, DatasetRegistry};
use crate::series::{Point, Series};
use crate::store;
use crate::viewport::Viewport;

/// Distinct timestamps shown in the history table
pub const TABLE_ROW_LIMIT: usize = 200;
pub const NO_DATA_LABEL: &str = "No data in selected range";
pub const MISSING_CELL: &str = "N/A";

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("no visible series to export")]
    NoVisibleSeries,
    #[error("could not encode CSV: {0}")]
    Csv(#[from] csv::Error),
    #[error("could not write export: {0}")]
    Io(#[from] io::Error),
}

/// Points of `series` inside the viewport, inclusive at both ends
pub fn visible_slice(series: &Series, viewport: Viewport) -> Vec<Point> {
    series.range(viewport.min, viewport.max).copied().collect()
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SeriesStats {
    NoData,
    Summary {
        min: f64,
        max: f64,
        avg: f64,
        count: usize,
    },
}

pub fn compute_stats(points: &[Point]) -> SeriesStats {
    let Some(first) = points.first() else {
        return SeriesStats::NoData;
    };
    let (mut min, mut max, mut sum) = (first.value, first.value, 0.0);
    for p in points {
        min = min.min(p.value);
        max = max.max(p.value);
        sum += p.value;
    }
    SeriesStats::Summary {
        min,
        max,
        avg: sum / points.len() as f64,
        count: points.len(),
    }
}

/// One statistics card per visible series
#[derive(Debug, Clone, PartialEq)]
pub struct StatCard {
    pub key: String,
    pub label: String,
    pub color: Color,
    pub stats: SeriesStats,
}

pub fn compute_cards(registry: &DatasetRegistry, viewport: Viewport) -> Vec<StatCard> {
    registry
        .visible()
        .map(|d| StatCard {
            key: d.key.clone(),
            label: d.display_name(),
            color: d.color,
            stats: compute_stats(&visible_slice(d.series(), viewport)),
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableColumn {
    pub key: String,
    pub label: String,
    pub color: Color,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableRow {
    pub timestamp: DateTime<Utc>,
    /// One cell per column; `None` where that series has no sample
    pub cells: Vec<Option<f64>>,
}

/// Visible samples merged by timestamp, newest first
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HistoryTable {
    pub columns: Vec<TableColumn>,
    pub rows: Vec<TableRow>,
    /// Older timestamps left out by the row limit
    pub omitted: usize,
}

/// Merge the visible series into rows keyed by timestamp, ascending. When a
/// series has two samples at the same instant the later one wins.
fn merge_visible(
    datasets: &[&Dataset],
    viewport: Viewport,
) -> BTreeMap<DateTime<Utc>, Vec<Option<f64>>> {
    let mut rows: BTreeMap<DateTime<Utc>, Vec<Option<f64>>> = BTreeMap::new();
    for (column, dataset) in datasets.iter().enumerate() {
        for point in dataset.series().range(viewport.min, viewport.max) {
            let cells = rows
                .entry(point.timestamp)
                .or_insert_with(|| vec![None; datasets.len()]);
            cells[column] = Some(point.value);
        }
    }
    rows
}

pub fn build_table(registry: &DatasetRegistry, viewport: Viewport) -> HistoryTable {
    let datasets: Vec<&Dataset> = registry.visible().collect();
    let columns = datasets
        .iter()
        .map(|d| TableColumn {
            key: d.key.clone(),
            label: d.display_name(),
            color: d.color,
        })
        .collect();

    let merged = merge_visible(&datasets, viewport);
    let omitted = merged.len().saturating_sub(TABLE_ROW_LIMIT);
    let rows = merged
        .into_iter()
        .rev()
        .take(TABLE_ROW_LIMIT)
        .map(|(timestamp, cells)| TableRow { timestamp, cells })
        .collect();

    HistoryTable {
        columns,
        rows,
        omitted,
    }
}

/// CSV of the visible window: a `Timestamp` column followed by one column per
/// visible series, rows ascending, empty cells for missing samples.
pub fn export_csv(registry: &DatasetRegistry, viewport: Viewport) -> Result<String, ExportError> {
    let datasets: Vec<&Dataset> = registry.visible().collect();
    if datasets.is_empty() {
        return Err(ExportError::NoVisibleSeries);
    }

    let mut writer = csv::WriterBuilder::new()
        .quote_style(csv::QuoteStyle::Necessary)
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(Vec::new());

    let mut header = Vec::with_capacity(datasets.len() + 1);
    header.push("Timestamp".to_string());
    header.extend(datasets.iter().map(|d| d.label.clone()));
    writer.write_record(&header)?;

    for (timestamp, cells) in merge_visible(&datasets, viewport) {
        let mut record = Vec::with_capacity(cells.len() + 1);
        record.push(store::format_timestamp(timestamp));
        record.extend(cells.iter().map(|c| c.map(|v| v.to_string()).unwrap_or_default()));
        writer.write_record(&record)?;
    }

    let bytes = writer
        .into_inner()
        .map_err(|e| ExportError::Io(e.into_error()))?;
    String::from_utf8(bytes)
        .map_err(|e| ExportError::Io(io::Error::new(io::ErrorKind::InvalidData, e)))
}

pub fn export_file_name(now: DateTime<Utc>) -> String {
    format!("history_export_{}.csv", now.format("%Y-%m-%dT%H-%M-%S%.3fZ"))
}

/// Write an export into `dir`, returning the file's path
pub fn write_export(dir: &Path, csv: &str, now: DateTime<Utc>) -> Result<PathBuf, ExportError> {
    fs::create_dir_all(dir)?;
    let path = dir.join(export_file_name(now));
    fs::write(&path, csv)?;
    tracing::info!(path = %path.display(), bytes = csv.len(), "history exported");
    Ok(path)
}

/// Timestamp as shown in the table, in local time
pub fn format_timestamp(timestamp: DateTime<Utc>) -> String {
    timestamp
        .with_timezone(&Local)
        .format("%Y-%m-%d %H:%M:%S")
        .to_string()
}

pub fn format_value(value: f64) -> String {
    format!("{value:.2}")
}

/// Derived views for the current viewport
#[derive(Debug, Clone, Default)]
pub struct RenderCache {
    pub cards: Vec<StatCard>,
    pub table: HistoryTable,
    pub viewport: Option<Viewport>,
}

impl RenderCache {
    pub fn recompute(&mut self, registry: &DatasetRegistry, viewport: Viewport) {
        self.cards = compute_cards(registry, viewport);
        self.table = build_table(registry, viewport);
        self.viewport = Some(viewport);
    }
}
