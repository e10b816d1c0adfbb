//! Turns a polling cycle's values into stored samples

use chrono::{DateTime, SubsecRound, Utc};
use serde_json::Value;

use crate::feed::FeedValues;
use crate::registry::DatasetRegistry;
use crate::store::HistoryStore;

/// Outcome of one ingest cycle
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct IngestReport {
    /// Samples both persisted and pushed in memory
    pub appended: usize,
    /// Samples pushed in memory whose append failed
    pub failed: usize,
    /// Tracked keys whose value was not numeric
    pub skipped: usize,
    pub last_error: Option<String>,
}

impl IngestReport {
    pub fn accepted(&self) -> usize {
        self.appended + self.failed
    }
}

/// Interpret a feed value as a sample value: a JSON number, or a string
/// holding a finite number.
pub fn numeric_value(value: &Value) -> Option<f64> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }?;
    parsed.is_finite().then_some(parsed)
}

#[derive(Clone, Debug)]
pub struct Ingestor {
    store: HistoryStore,
}

impl Ingestor {
    pub fn new(store: HistoryStore) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &HistoryStore {
        &self.store
    }

    /// Record every tracked, numeric value in `values` at `now`.
    ///
    /// The in-memory series is updated even when the append fails, so the
    /// charts keep moving while the disk is unavailable.
    pub fn ingest(&self, values: &FeedValues, now: DateTime<Utc>, registry: &mut DatasetRegistry) -> IngestReport {
        let now = now.trunc_subsecs(3);
        let mut report = IngestReport::default();

        // Configuration order, so appends are deterministic
        let keys: Vec<String> = registry.datasets().iter().map(|d| d.key.clone()).collect();
        for key in keys {
            let Some(raw) = values.get(&key) else {
                continue;
            };
            let Some(value) = numeric_value(raw) else {
                tracing::debug!(key = %key, value = %raw, "skipping non-numeric value");
                report.skipped += 1;
                continue;
            };

            match self.store.append(&key, now, value) {
                Ok(()) => report.appended += 1,
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "could not persist sample");
                    report.failed += 1;
                    report.last_error = Some(e.to_string());
                }
            }
            registry.push(&key, now, value, now);
        }

        report
    }
}
