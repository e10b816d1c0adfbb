//! Month-sharded, append-only sample history
//!
//! Every sample is stored as one JSON line in a shard file named
//! `graph_history_YYYY-MM.jsonl`, where `YYYY-MM` is the sample's calendar
//! month in local time:
//!
//! ```text
//! {"key":"ai1","data":{"x":"2026-10-17T08:00:00.000Z","y":8.9}}
//! ```
//!
//! Appends hold an exclusive advisory lock on the shard file for the duration
//! of a single `write_all` of a complete line, so concurrent writers to the
//! same shard never interleave. Writers to different shards never contend.
//! Readers take no lock: a line torn by a crashed writer is skipped like any
//! other malformed record, and the next append starts on a fresh line.

use std::collections::HashMap;
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::{DateTime, Datelike, Duration, Local, SecondsFormat, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::series::Point;

pub const SHARD_PREFIX: &str = "graph_history_";
pub const SHARD_EXTENSION: &str = ".jsonl";

/// Longest retention honoured, about a century. Larger values are clamped.
pub const MAX_RETENTION_HOURS: u32 = 24 * 366 * 100;

/// Retention as a duration, clamped to [`MAX_RETENTION_HOURS`]
pub fn retention_span(hours: u32) -> Duration {
    Duration::hours(i64::from(hours.min(MAX_RETENTION_HOURS)))
}

/// Start of the retention window ending at `now`
pub fn retention_cutoff(now: DateTime<Utc>, hours: u32) -> DateTime<Utc> {
    now.checked_sub_signed(retention_span(hours))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Identifies the month shard a sample belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ShardKey {
    pub year: i32,
    pub month: u32,
}

impl ShardKey {
    /// The shard for a timestamp, using the local calendar month
    pub fn for_timestamp(timestamp: DateTime<Utc>) -> Self {
        let local = timestamp.with_timezone(&Local);
        Self {
            year: local.year(),
            month: local.month(),
        }
    }

    pub fn next(self) -> Self {
        if self.month == 12 {
            Self {
                year: self.year + 1,
                month: 1,
            }
        } else {
            Self {
                year: self.year,
                month: self.month + 1,
            }
        }
    }

    pub fn file_name(&self) -> String {
        format!("{SHARD_PREFIX}{self}{SHARD_EXTENSION}")
    }

    /// Parse a shard file name such as `graph_history_2026-10.jsonl`
    pub fn from_file_name(name: &str) -> Option<Self> {
        let stem = name
            .strip_prefix(SHARD_PREFIX)?
            .strip_suffix(SHARD_EXTENSION)?;
        let (year, month) = stem.split_once('-')?;
        let year = year.parse().ok()?;
        let month = month.parse().ok()?;
        (1..=12).contains(&month).then_some(Self { year, month })
    }
}

impl fmt::Display for ShardKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

/// Every shard that can hold samples in `[cutoff, now]`, oldest first.
pub fn shards_covering(cutoff: DateTime<Utc>, now: DateTime<Utc>) -> Vec<ShardKey> {
    let last = ShardKey::for_timestamp(now);
    let mut shard = ShardKey::for_timestamp(cutoff.min(now));
    let mut shards = Vec::new();
    while shard <= last {
        shards.push(shard);
        shard = shard.next();
    }
    shards
}

/// Wire format for timestamps: RFC 3339 with milliseconds and a `Z` suffix
pub fn format_timestamp(timestamp: DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

#[derive(Serialize)]
struct RecordOut<'a> {
    key: &'a str,
    data: PointOut,
}

#[derive(Serialize)]
struct PointOut {
    x: String,
    y: f64,
}

#[derive(Deserialize)]
struct RecordIn {
    key: String,
    data: PointIn,
}

#[derive(Deserialize)]
struct PointIn {
    x: String,
    y: f64,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("could not prepare history directory {}: {source}", .dir.display())]
    Init {
        dir: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("could not write to history shard {}: {source}", .shard.display())]
    Write {
        shard: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("could not read history directory {}: {source}", .dir.display())]
    Read {
        dir: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("could not delete {} history shard(s): {}", .failed.len(), describe_failures(.failed))]
    Clear {
        removed: Vec<ShardKey>,
        failed: Vec<ClearFailure>,
    },
    #[error("could not encode sample for {key}: {reason}")]
    Encode { key: String, reason: String },
}

/// A shard file that could not be deleted during clear-all
#[derive(Debug)]
pub struct ClearFailure {
    pub path: PathBuf,
    pub error: io::Error,
}

fn describe_failures(failed: &[ClearFailure]) -> String {
    failed
        .iter()
        .map(|f| format!("{} ({})", f.path.display(), f.error))
        .collect::<Vec<_>>()
        .join(", ")
}

/// A shard that exists but could not be read. Other shards still contribute.
#[derive(Debug)]
pub struct ShardReadError {
    pub shard: ShardKey,
    pub path: PathBuf,
    pub error: io::Error,
}

/// Result of a retention-bounded read
#[derive(Debug)]
pub struct HistorySnapshot {
    pub cutoff: DateTime<Utc>,
    /// Surviving samples grouped by key, in file order
    pub series: HashMap<String, Vec<Point>>,
    /// Lines that could not be decoded
    pub malformed: usize,
    pub shards_read: Vec<ShardKey>,
    pub shard_errors: Vec<ShardReadError>,
}

impl HistorySnapshot {
    fn empty(cutoff: DateTime<Utc>) -> Self {
        Self {
            cutoff,
            series: HashMap::new(),
            malformed: 0,
            shards_read: Vec::new(),
            shard_errors: Vec::new(),
        }
    }

    pub fn total_samples(&self) -> usize {
        self.series.values().map(Vec::len).sum()
    }
}

/// Shards removed by a successful clear-all
#[derive(Debug, Default)]
pub struct ClearReport {
    pub removed: Vec<ShardKey>,
}

/// Handle to the history directory. Cloning is cheap and clones share the
/// read instrumentation.
#[derive(Clone, Debug)]
pub struct HistoryStore {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    dir: PathBuf,
    shards_opened: AtomicUsize,
}

impl HistoryStore {
    /// Open (and create if needed) a history directory
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|source| StoreError::Init {
            dir: dir.clone(),
            source,
        })?;
        Ok(Self {
            inner: Arc::new(Inner {
                dir,
                shards_opened: AtomicUsize::new(0),
            }),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.inner.dir
    }

    pub fn shard_path(&self, shard: ShardKey) -> PathBuf {
        self.inner.dir.join(shard.file_name())
    }

    /// Number of shard files opened for reading since this store was opened
    pub fn shards_opened(&self) -> usize {
        self.inner.shards_opened.load(Ordering::Relaxed)
    }

    /// Append one sample to the shard for its month.
    pub fn append(&self, key: &str, timestamp: DateTime<Utc>, value: f64) -> Result<(), StoreError> {
        if !value.is_finite() {
            return Err(StoreError::Encode {
                key: key.to_string(),
                reason: format!("value {value} is not finite"),
            });
        }

        let record = RecordOut {
            key,
            data: PointOut {
                x: format_timestamp(timestamp),
                y: value,
            },
        };
        let mut line = serde_json::to_string(&record).map_err(|e| StoreError::Encode {
            key: key.to_string(),
            reason: e.to_string(),
        })?;
        line.push('\n');

        let path = self.shard_path(ShardKey::for_timestamp(timestamp));
        append_line(&path, line.as_bytes()).map_err(|source| StoreError::Write {
            shard: path.clone(),
            source,
        })
    }

    /// Read every sample newer than `now - retention_hours`.
    pub fn read_all(&self, retention_hours: u32, now: DateTime<Utc>) -> Result<HistorySnapshot, StoreError> {
        let cutoff = retention_cutoff(now, retention_hours);
        let dir = &self.inner.dir;
        fs::metadata(dir).map_err(|source| StoreError::Read {
            dir: dir.clone(),
            source,
        })?;

        let mut snapshot = HistorySnapshot::empty(cutoff);
        for shard in shards_covering(cutoff, now) {
            let path = self.shard_path(shard);
            let file = match File::open(&path) {
                Ok(file) => file,
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(error) => {
                    tracing::warn!(shard = %shard, %error, "could not open history shard");
                    snapshot.shard_errors.push(ShardReadError { shard, path, error });
                    continue;
                }
            };
            self.inner.shards_opened.fetch_add(1, Ordering::Relaxed);
            snapshot.shards_read.push(shard);

            if let Err(error) = read_shard(file, cutoff, &mut snapshot) {
                tracing::warn!(shard = %shard, %error, "history shard read stopped early");
                snapshot.shard_errors.push(ShardReadError { shard, path, error });
            }
        }

        if snapshot.malformed > 0 {
            tracing::debug!(malformed = snapshot.malformed, "skipped malformed history records");
        }
        Ok(snapshot)
    }

    /// Delete every shard file.
    ///
    /// All shards are attempted; if any deletion fails the error lists each
    /// failed file along with the shards that were removed.
    pub fn clear_all(&self) -> Result<ClearReport, StoreError> {
        let mut removed = Vec::new();
        let mut failed = Vec::new();
        for (shard, path) in self.shard_files()? {
            match remove_shard(&path) {
                Ok(()) => removed.push(shard),
                Err(error) => {
                    tracing::error!(path = %path.display(), %error, "could not delete history shard");
                    failed.push(ClearFailure { path, error });
                }
            }
        }

        if failed.is_empty() {
            tracing::info!(shards = removed.len(), "history cleared");
            Ok(ClearReport { removed })
        } else {
            Err(StoreError::Clear { removed, failed })
        }
    }

    /// Existing shard files, oldest first
    pub fn shard_files(&self) -> Result<Vec<(ShardKey, PathBuf)>, StoreError> {
        let dir = &self.inner.dir;
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(StoreError::Read {
                    dir: dir.clone(),
                    source,
                });
            }
        };

        let mut shards: Vec<(ShardKey, PathBuf)> = entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                let name = entry.file_name();
                let shard = ShardKey::from_file_name(name.to_str()?)?;
                Some((shard, entry.path()))
            })
            .collect();
        shards.sort_by_key(|(shard, _)| *shard);
        Ok(shards)
    }

    /// Total bytes across all shard files
    pub fn disk_usage(&self) -> Result<u64, StoreError> {
        Ok(self
            .shard_files()?
            .iter()
            .filter_map(|(_, path)| fs::metadata(path).ok())
            .map(|m| m.len())
            .sum())
    }
}

fn append_line(path: &Path, line: &[u8]) -> io::Result<()> {
    let mut file = OpenOptions::new()
        .create(true)
        .read(true)
        .append(true)
        .open(path)?;
    FileExt::lock_exclusive(&file)?;
    let written = write_terminated(&mut file, line);
    let unlocked = FileExt::unlock(&file);
    written?;
    unlocked
}

/// Write `line` after making sure the file ends on a line boundary, so a
/// fragment left by a crashed writer stays a line of its own.
fn write_terminated(file: &mut File, line: &[u8]) -> io::Result<()> {
    let mut buf = Vec::with_capacity(line.len() + 1);
    if file.metadata()?.len() > 0 {
        let mut last = [0u8; 1];
        file.seek(SeekFrom::End(-1))?;
        file.read_exact(&mut last)?;
        if last[0] != b'\n' {
            buf.push(b'\n');
        }
    }
    buf.extend_from_slice(line);
    file.write_all(&buf)?;
    file.flush()
}

fn remove_shard(path: &Path) -> io::Result<()> {
    // Wait for any in-flight append so a clear never races a half-written line.
    let file = match OpenOptions::new().append(true).open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
    };
    FileExt::lock_exclusive(&file)?;
    let removed = fs::remove_file(path);
    let _ = FileExt::unlock(&file);
    match removed {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

fn read_shard(file: File, cutoff: DateTime<Utc>, snapshot: &mut HistorySnapshot) -> io::Result<()> {
    for line in BufReader::new(file).split(b'\n') {
        let line = line?;
        if line.iter().all(u8::is_ascii_whitespace) {
            continue;
        }
        match decode_record(&line) {
            Some((key, point)) => {
                if point.timestamp >= cutoff {
                    snapshot.series.entry(key).or_default().push(point);
                }
            }
            None => snapshot.malformed += 1,
        }
    }
    Ok(())
}

fn decode_record(line: &[u8]) -> Option<(String, Point)> {
    let record: RecordIn = serde_json::from_slice(line).ok()?;
    let timestamp = parse_timestamp(&record.data.x)?;
    if !record.data.y.is_finite() {
        return None;
    }
    Some((record.key, Point::new(timestamp, record.data.y)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn mid_month(year: i32, month: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(year, month, 15, 12, 0, 0).unwrap()
    }

    fn temp_store() -> (tempfile::TempDir, HistoryStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = HistoryStore::open(dir.path()).unwrap();
        (dir, store)
    }

    #[test]
    fn test_shard_file_names() {
        let shard = ShardKey { year: 2026, month: 3 };
        assert_eq!(shard.file_name(), "graph_history_2026-03.jsonl");
        assert_eq!(ShardKey::from_file_name(&shard.file_name()), Some(shard));
        assert_eq!(ShardKey::from_file_name("graph_history_2026-13.jsonl"), None);
        assert_eq!(ShardKey::from_file_name("settings.json"), None);
    }

    #[test]
    fn test_shards_covering_crosses_year() {
        let now = mid_month(2026, 2);
        let cutoff = mid_month(2025, 11);
        let shards = shards_covering(cutoff, now);
        assert_eq!(
            shards,
            vec![
                ShardKey { year: 2025, month: 11 },
                ShardKey { year: 2025, month: 12 },
                ShardKey { year: 2026, month: 1 },
                ShardKey { year: 2026, month: 2 },
            ]
        );
    }

    #[test]
    fn test_append_then_read() {
        let (_dir, store) = temp_store();
        let now = mid_month(2026, 10);
        store.append("ai1", now - Duration::minutes(2), 8.9).unwrap();
        store.append("ai2", now - Duration::minutes(2), 15.4).unwrap();
        store.append("ai1", now - Duration::minutes(1), 9.1).unwrap();

        let snapshot = store.read_all(48, now).unwrap();
        let ai1: Vec<f64> = snapshot.series["ai1"].iter().map(|p| p.value).collect();
        assert_eq!(ai1, vec![8.9, 9.1]);
        assert_eq!(snapshot.series["ai2"].len(), 1);
        assert_eq!(snapshot.malformed, 0);
    }

    #[test]
    fn test_record_format() {
        let (_dir, store) = temp_store();
        let t = Utc.with_ymd_and_hms(2026, 10, 15, 8, 0, 0).unwrap();
        store.append("ai1", t, 8.9).unwrap();

        let content = fs::read_to_string(store.shard_path(ShardKey::for_timestamp(t))).unwrap();
        assert_eq!(
            content,
            "{\"key\":\"ai1\",\"data\":{\"x\":\"2026-10-15T08:00:00.000Z\",\"y\":8.9}}\n"
        );
    }

    #[test]
    fn test_read_respects_retention() {
        let (_dir, store) = temp_store();
        let now = mid_month(2026, 10);
        for hours in [1, 10, 47, 49, 100] {
            store
                .append("ai1", now - Duration::hours(hours), hours as f64)
                .unwrap();
        }

        let snapshot = store.read_all(48, now).unwrap();
        let cutoff = now - Duration::hours(48);
        let points = &snapshot.series["ai1"];
        assert_eq!(points.len(), 3);
        assert!(points.iter().all(|p| p.timestamp >= cutoff));
    }

    #[test]
    fn test_corrupt_line_is_skipped() {
        let (_dir, store) = temp_store();
        let now = mid_month(2026, 10);
        store.append("ai1", now - Duration::minutes(3), 1.0).unwrap();

        let path = store.shard_path(ShardKey::for_timestamp(now));
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(b"{\"key\":\"ai1\",\"data\":{\"x\":\"not a time\",\"y\":1}}\n")
            .unwrap();
        file.write_all(b"{\"key\":\"ai1\",\"da\n").unwrap();
        drop(file);

        store.append("ai1", now - Duration::minutes(1), 2.0).unwrap();

        let snapshot = store.read_all(48, now).unwrap();
        let values: Vec<f64> = snapshot.series["ai1"].iter().map(|p| p.value).collect();
        assert_eq!(values, vec![1.0, 2.0]);
        assert_eq!(snapshot.malformed, 2);
    }

    #[test]
    fn test_only_covering_shards_are_opened() {
        let (_dir, store) = temp_store();
        for month in 1..=10 {
            store.append("ai1", mid_month(2026, month), month as f64).unwrap();
        }

        let now = Utc.with_ymd_and_hms(2026, 10, 16, 12, 0, 0).unwrap();
        let snapshot = store.read_all(48, now).unwrap();
        assert_eq!(store.shards_opened(), 1);
        assert_eq!(snapshot.shards_read, vec![ShardKey { year: 2026, month: 10 }]);
        assert_eq!(snapshot.series["ai1"].len(), 1);

        // 72 hours back from Oct 2 reaches into September
        let now = Utc.with_ymd_and_hms(2026, 10, 2, 12, 0, 0).unwrap();
        let snapshot = store.read_all(72, now).unwrap();
        assert_eq!(store.shards_opened(), 3);
        assert_eq!(
            snapshot.shards_read,
            vec![
                ShardKey { year: 2026, month: 9 },
                ShardKey { year: 2026, month: 10 }
            ]
        );
    }

    #[test]
    fn test_clear_then_read_is_empty() {
        let (_dir, store) = temp_store();
        let now = mid_month(2026, 10);
        store.append("ai1", mid_month(2026, 9), 1.0).unwrap();
        store.append("ai1", now, 2.0).unwrap();

        let report = store.clear_all().unwrap();
        assert_eq!(report.removed.len(), 2);
        assert!(store.shard_files().unwrap().is_empty());

        let snapshot = store.read_all(24 * 60, now).unwrap();
        assert!(snapshot.series.is_empty());
    }

    #[test]
    fn test_clear_keeps_unrelated_files() {
        let (dir, store) = temp_store();
        fs::write(dir.path().join("settings.json"), "{}").unwrap();
        store.append("ai1", mid_month(2026, 10), 1.0).unwrap();

        store.clear_all().unwrap();
        assert!(dir.path().join("settings.json").exists());
    }

    #[test]
    fn test_unwritable_shard_reports_write_error() {
        let (_dir, store) = temp_store();
        let now = mid_month(2026, 10);
        // A directory squatting on the shard path makes the append fail
        fs::create_dir(store.shard_path(ShardKey::for_timestamp(now))).unwrap();

        let err = store.append("ai1", now, 1.0).unwrap_err();
        assert!(matches!(err, StoreError::Write { .. }), "got {err:?}");
    }

    #[test]
    fn test_non_finite_values_are_rejected() {
        let (_dir, store) = temp_store();
        let err = store.append("ai1", mid_month(2026, 10), f64::NAN).unwrap_err();
        assert!(matches!(err, StoreError::Encode { .. }));
    }

    #[test]
    fn test_disk_usage() {
        let (_dir, store) = temp_store();
        assert_eq!(store.disk_usage().unwrap(), 0);
        store.append("ai1", mid_month(2026, 10), 1.0).unwrap();
        assert!(store.disk_usage().unwrap() > 0);
    }

    #[test]
    fn test_append_after_torn_line_starts_fresh() {
        let (_dir, store) = temp_store();
        let now = mid_month(2026, 10);
        store.append("ai1", now - Duration::minutes(3), 1.0).unwrap();

        // A writer died mid-record: no trailing newline
        let path = store.shard_path(ShardKey::for_timestamp(now));
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(b"{\"key\":\"ai1\",\"da").unwrap();
        drop(file);

        store.append("ai1", now - Duration::minutes(1), 2.0).unwrap();

        let snapshot = store.read_all(48, now).unwrap();
        let values: Vec<f64> = snapshot.series["ai1"].iter().map(|p| p.value).collect();
        assert_eq!(values, vec![1.0, 2.0]);
        assert_eq!(snapshot.malformed, 1);
    }

    #[test]
    fn test_huge_retention_is_clamped() {
        let (_dir, store) = temp_store();
        let now = mid_month(2026, 10);
        store.append("ai1", now - Duration::hours(1), 1.0).unwrap();

        let snapshot = store.read_all(u32::MAX, now).unwrap();
        assert_eq!(snapshot.cutoff, now - retention_span(MAX_RETENTION_HOURS));
        assert_eq!(snapshot.total_samples(), 1);
        assert_eq!(retention_cutoff(DateTime::<Utc>::MIN_UTC, 1), DateTime::<Utc>::MIN_UTC);
    }

    #[test]
    fn test_unreadable_shard_does_not_hide_others() {
        let (_dir, store) = temp_store();
        let now = mid_month(2026, 10);
        store.append("ai1", now - Duration::hours(1), 1.0).unwrap();
        // September's shard is a directory: it opens but cannot be read
        let september = ShardKey { year: 2026, month: 9 };
        fs::create_dir(store.shard_path(september)).unwrap();

        let snapshot = store.read_all(24 * 60, now).unwrap();
        assert_eq!(snapshot.shard_errors.len(), 1);
        assert_eq!(snapshot.shard_errors[0].shard, september);
        assert_eq!(snapshot.series["ai1"].len(), 1);
    }

    #[test]
    fn test_clear_lists_each_failure() {
        let (_dir, store) = temp_store();
        store.append("ai1", mid_month(2026, 8), 1.0).unwrap();
        store.append("ai1", mid_month(2026, 10), 2.0).unwrap();
        let september = store.shard_path(ShardKey { year: 2026, month: 9 });
        fs::create_dir(&september).unwrap();

        match store.clear_all().unwrap_err() {
            StoreError::Clear { removed, failed } => {
                assert_eq!(
                    removed,
                    vec![
                        ShardKey { year: 2026, month: 8 },
                        ShardKey { year: 2026, month: 10 }
                    ]
                );
                assert_eq!(failed.len(), 1);
                assert_eq!(failed[0].path, september);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(store.shard_files().unwrap().len(), 1);
    }
}
