//! Sensor feed sources
//!
//! A feed produces one key→value map per polling cycle. The raw HTTP feed
//! returns a text blob whose JSON object follows the last `::` marker; the
//! simulated feed walks each configured key within its bounds.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use serde_json::Value;
use thiserror::Error;

use crate::config::{Config, FeedMode, SimulationParams};

/// Values from one polling cycle, keyed by the feed's JSON keys
pub type FeedValues = serde_json::Map<String, Value>;

pub type SharedFeed = Arc<dyn FeedSource + Send + Sync + 'static>;

pub const HTTP_TIMEOUT: Duration = Duration::from_secs(15);
const PAYLOAD_MARKER: &str = "::";

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("feed request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("feed returned status {0}")]
    Status(u16),
    #[error("feed returned an empty body")]
    Empty,
    #[error("could not parse feed payload: {0}")]
    Parse(String),
    #[error("no feed source configured")]
    Unconfigured,
}

#[async_trait]
pub trait FeedSource {
    async fn fetch(&self) -> Result<FeedValues, FeedError>;
}

/// Decode a raw feed body into a value map.
///
/// If the body contains `::`, only the text after the last occurrence is
/// parsed; otherwise the whole body is. The result must be a JSON object.
pub fn decode_payload(body: &str) -> Result<FeedValues, FeedError> {
    if body.trim().is_empty() {
        return Err(FeedError::Empty);
    }
    let json = match body.rfind(PAYLOAD_MARKER) {
        Some(at) => &body[at + PAYLOAD_MARKER.len()..],
        None => body,
    };
    match serde_json::from_str::<Value>(json.trim()) {
        Ok(Value::Object(values)) => Ok(values),
        Ok(other) => Err(FeedError::Parse(format!(
            "expected a JSON object, got {}",
            json_kind(&other)
        ))),
        Err(e) => Err(FeedError::Parse(e.to_string())),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Fetches the raw feed over HTTP
pub struct HttpFeed {
    client: reqwest::Client,
    url: String,
}

impl HttpFeed {
    pub fn new(url: impl Into<String>) -> Result<Self, FeedError> {
        let client = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .user_agent(concat!("wqmon/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl FeedSource for HttpFeed {
    async fn fetch(&self) -> Result<FeedValues, FeedError> {
        let response = self.client.get(&self.url).send().await?;
        let status = response.status();
        if status != reqwest::StatusCode::OK {
            return Err(FeedError::Status(status.as_u16()));
        }
        let body = response.text().await?;
        decode_payload(&body)
    }
}

/// Produces a bounded random walk for each simulated key
pub struct SimulatedFeed {
    keys: Vec<(String, SimulationParams)>,
    current: Mutex<HashMap<String, f64>>,
}

impl SimulatedFeed {
    pub fn new(keys: Vec<(String, SimulationParams)>) -> Self {
        Self {
            keys,
            current: Mutex::new(HashMap::new()),
        }
    }

    /// Default walk parameters for a key configured without any
    pub fn default_params() -> SimulationParams {
        SimulationParams {
            initial: 50.0,
            range: 2.0,
            min: 0.0,
            max: 100.0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    fn step(&self) -> FeedValues {
        let mut rng = rand::rng();
        let mut current = match self.current.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        let mut values = FeedValues::new();
        for (key, params) in &self.keys {
            let last = current.get(key).copied().unwrap_or(params.initial);
            let change = if params.range > 0.0 {
                rng.random_range(-params.range..=params.range)
            } else {
                0.0
            };
            let next = (last + change).clamp(params.min, params.max);
            current.insert(key.clone(), next);
            if let Some(number) = serde_json::Number::from_f64(next) {
                values.insert(key.clone(), Value::Number(number));
            }
        }
        values
    }
}

#[async_trait]
impl FeedSource for SimulatedFeed {
    async fn fetch(&self) -> Result<FeedValues, FeedError> {
        Ok(self.step())
    }
}

/// Combines the real feed with simulated keys.
///
/// Simulated values are produced even when the real feed fails; the cycle
/// only fails when every source does.
pub struct CompositeFeed {
    sources: Vec<SharedFeed>,
}

impl CompositeFeed {
    pub fn new(sources: Vec<SharedFeed>) -> Self {
        Self { sources }
    }

    /// Build the sources a configuration asks for
    pub fn from_config(config: &Config) -> Result<Self, FeedError> {
        let mut sources: Vec<SharedFeed> = Vec::new();

        match &config.api_url {
            Some(url) if config.has_real_keys() => sources.push(Arc::new(HttpFeed::new(url.clone())?)),
            None if config.has_real_keys() => {
                tracing::warn!("real params configured without apiUrl; they will stay empty")
            }
            _ => {}
        }

        let simulated: Vec<(String, SimulationParams)> = config
            .tracked_keys
            .iter()
            .filter(|k| k.mode == FeedMode::Simulated)
            .map(|k| {
                (
                    k.key.clone(),
                    k.simulation.unwrap_or_else(SimulatedFeed::default_params),
                )
            })
            .collect();
        if !simulated.is_empty() {
            sources.push(Arc::new(SimulatedFeed::new(simulated)));
        }

        Ok(Self::new(sources))
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

#[async_trait]
impl FeedSource for CompositeFeed {
    async fn fetch(&self) -> Result<FeedValues, FeedError> {
        let mut merged = FeedValues::new();
        let mut first_error = None;
        let mut succeeded = 0;

        for source in &self.sources {
            match source.fetch().await {
                Ok(values) => {
                    succeeded += 1;
                    merged.extend(values);
                }
                Err(e) => {
                    tracing::warn!(error = %e, "feed source failed");
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) if succeeded == 0 => Err(e),
            _ if self.sources.is_empty() => Err(FeedError::Unconfigured),
            _ => Ok(merged),
        }
    }
}
