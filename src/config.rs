//! Dashboard configuration
//!
//! Loaded from a JSON file; a missing file falls back to the built-in
//! defaults. The file is re-read whenever the view is reset so edits take
//! effect without a restart.

use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::store::MAX_RETENTION_HOURS;

pub const DEFAULT_RETENTION_HOURS: u32 = 48;
pub const DEFAULT_INTERVAL_SECS: u64 = 30;
pub const DEFAULT_HISTORY_DIR: &str = "data";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("could not parse config {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Where a tracked key's values come from
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedMode {
    #[default]
    Real,
    Simulated,
}

/// Bounded random walk parameters for a simulated key
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SimulationParams {
    pub initial: f64,
    /// Largest step either way per reading
    pub range: f64,
    pub min: f64,
    pub max: f64,
}

/// One measurement the dashboard records and plots
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackedKey {
    #[serde(alias = "jsonKey")]
    pub key: String,
    #[serde(alias = "displayName")]
    pub label: String,
    #[serde(default)]
    pub unit: String,
    /// Palette slot; defaults to the key's position in the list
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color_slot: Option<usize>,
    #[serde(default)]
    pub mode: FeedMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub simulation: Option<SimulationParams>,
}

impl TrackedKey {
    pub fn new(key: impl Into<String>, label: impl Into<String>, unit: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            label: label.into(),
            unit: unit.into(),
            color_slot: None,
            mode: FeedMode::Real,
            simulation: None,
        }
    }

    /// Label with the unit appended, as shown in legends and headers
    pub fn display_name(&self) -> String {
        if self.unit.is_empty() {
            self.label.clone()
        } else {
            format!("{} ({})", self.label, self.unit)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default = "default_retention_hours")]
    pub retention_hours: u32,
    #[serde(default = "default_interval_secs", rename = "interval")]
    pub interval_secs: u64,
    #[serde(default)]
    pub api_url: Option<String>,
    #[serde(default = "default_history_dir")]
    pub history_dir: PathBuf,
    #[serde(default = "default_tracked_keys", rename = "params")]
    pub tracked_keys: Vec<TrackedKey>,
}

fn default_retention_hours() -> u32 {
    DEFAULT_RETENTION_HOURS
}

fn default_interval_secs() -> u64 {
    DEFAULT_INTERVAL_SECS
}

fn default_history_dir() -> PathBuf {
    PathBuf::from(DEFAULT_HISTORY_DIR)
}

fn default_tracked_keys() -> Vec<TrackedKey> {
    vec![
        TrackedKey::new("ai1", "Suspended Solids", "mg/L"),
        TrackedKey::new("ai2", "Turbidity", "NTU"),
    ]
}

impl Default for Config {
    fn default() -> Self {
        Self {
            retention_hours: DEFAULT_RETENTION_HOURS,
            interval_secs: DEFAULT_INTERVAL_SECS,
            api_url: None,
            history_dir: default_history_dir(),
            tracked_keys: default_tracked_keys(),
        }
    }
}

impl Config {
    /// Load and validate a config file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&text, path)
    }

    /// Like [`Config::load`], but a missing file yields the defaults
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        match fs::read_to_string(path) {
            Ok(text) => Self::from_json(&text, path),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "no config file, using defaults");
                Ok(Self::default())
            }
            Err(source) => Err(ConfigError::Io {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    fn from_json(text: &str, path: &Path) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.retention_hours == 0 {
            return Err(ConfigError::Invalid("retentionHours must be positive".into()));
        }
        if self.retention_hours > MAX_RETENTION_HOURS {
            return Err(ConfigError::Invalid(format!(
                "retentionHours must be at most {MAX_RETENTION_HOURS}"
            )));
        }
        if self.interval_secs == 0 {
            return Err(ConfigError::Invalid("interval must be positive".into()));
        }
        if self.tracked_keys.is_empty() {
            return Err(ConfigError::Invalid("at least one param is required".into()));
        }

        let mut seen = HashSet::new();
        for tracked in &self.tracked_keys {
            if tracked.key.trim().is_empty() {
                return Err(ConfigError::Invalid("param key must not be empty".into()));
            }
            if !seen.insert(tracked.key.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "param key {:?} is listed twice",
                    tracked.key
                )));
            }
            if let Some(sim) = &tracked.simulation {
                if !(sim.min <= sim.max) || !sim.range.is_finite() || sim.range < 0.0 {
                    return Err(ConfigError::Invalid(format!(
                        "simulation bounds for {:?} are inconsistent",
                        tracked.key
                    )));
                }
            }
        }
        Ok(())
    }

    /// Resolve the history directory relative to the config file's location
    pub fn history_dir_relative_to(&self, config_path: &Path) -> PathBuf {
        if self.history_dir.is_absolute() {
            return self.history_dir.clone();
        }
        match config_path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.join(&self.history_dir),
            _ => self.history_dir.clone(),
        }
    }

    pub fn has_real_keys(&self) -> bool {
        self.tracked_keys.iter().any(|k| k.mode == FeedMode::Real)
    }
}
