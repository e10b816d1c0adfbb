use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};

use crate::events::Message;
use crate::feed::SharedFeed;

/// Polls a feed on a fixed interval.
///
/// At most one fetch runs at a time. A tick that arrives while the previous
/// fetch is still running is skipped rather than queued. Every fetch gets a
/// sequence number so late results can be told apart from fresh ones.
#[derive(Clone)]
pub struct Poller {
    source: SharedFeed,
    interval: Duration,
    tx: mpsc::Sender<Message>,
    in_flight: Arc<AtomicBool>,
    seq: Arc<AtomicU64>,
}

impl Poller {
    pub fn new(source: SharedFeed, interval: Duration, tx: mpsc::Sender<Message>) -> Self {
        Self {
            source,
            interval,
            tx,
            in_flight: Arc::new(AtomicBool::new(false)),
            seq: Arc::new(AtomicU64::new(0)),
        }
    }

    /// A poller for a different feed or interval that keeps numbering fetches
    /// where this one left off
    pub fn restarted(&self, source: SharedFeed, interval: Duration) -> Self {
        Self {
            source,
            interval,
            tx: self.tx.clone(),
            in_flight: Arc::new(AtomicBool::new(false)),
            seq: self.seq.clone(),
        }
    }

    /// Start polling. The first fetch happens immediately; the task ends
    /// when the receiving side is dropped.
    pub fn spawn(&self) -> JoinHandle<()> {
        let poller = self.clone();
        tokio::spawn(async move {
            let mut ticker = time::interval(poller.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if poller.tx.is_closed() {
                    tracing::debug!("ui gone, poller stopping");
                    break;
                }
                poller.trigger();
            }
        })
    }

    /// Start a fetch now unless one is already running. Returns the fetch's
    /// sequence number.
    pub fn trigger(&self) -> Option<u64> {
        if self.in_flight.swap(true, Ordering::AcqRel) {
            tracing::debug!("previous fetch still running, skipping tick");
            return None;
        }
        let seq = self.seq.fetch_add(1, Ordering::AcqRel) + 1;

        let source = self.source.clone();
        let in_flight = self.in_flight.clone();
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let result = source.fetch().await;
            let at = Utc::now();
            in_flight.store(false, Ordering::Release);

            let message = match result {
                Ok(values) => Message::Reading { seq, at, values },
                Err(e) => {
                    tracing::warn!(seq, error = %e, "feed fetch failed");
                    Message::FeedFailed {
                        seq,
                        at,
                        error: e.to_string(),
                    }
                }
            };
            let _ = tx.send(message).await;
        });
        Some(seq)
    }

    /// Sequence number of the most recently issued fetch
    pub fn issued(&self) -> u64 {
        self.seq.load(Ordering::Acquire)
    }

    pub fn is_fetching(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }
}
