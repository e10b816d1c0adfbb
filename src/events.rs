use chrono::{DateTime, Utc};

use crate::feed::FeedValues;

/// Messages sent from the poller to the UI
#[derive(Debug, Clone)]
pub enum Message {
    /// A fetch completed with values
    Reading {
        seq: u64,
        at: DateTime<Utc>,
        values: FeedValues,
    },
    /// A fetch failed
    FeedFailed {
        seq: u64,
        at: DateTime<Utc>,
        error: String,
    },
}

impl Message {
    pub fn seq(&self) -> u64 {
        match self {
            Message::Reading { seq, .. } | Message::FeedFailed { seq, .. } => *seq,
        }
    }
}

/// Decides whether a poll result is still wanted.
///
/// Results must be newer than the last one applied, and newer than every
/// fetch issued before the most recent reset or clear.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SequenceGate {
    last_applied: u64,
    floor: u64,
}

impl SequenceGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept `seq` if it is fresh, remembering it as the latest applied
    pub fn accept(&mut self, seq: u64) -> bool {
        if seq <= self.last_applied || seq <= self.floor {
            return false;
        }
        self.last_applied = seq;
        true
    }

    /// Reject everything issued up to and including `issued`
    pub fn bump(&mut self, issued: u64) {
        self.floor = self.floor.max(issued);
    }

    pub fn last_applied(&self) -> u64 {
        self.last_applied
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_out_of_order_results_are_dropped() {
        let mut gate = SequenceGate::new();
        assert!(gate.accept(1));
        assert!(gate.accept(3));
        assert!(!gate.accept(2));
        assert!(!gate.accept(3));
        assert_eq!(gate.last_applied(), 3);
    }

    #[test]
    fn test_bump_discards_fetches_started_before_reset() {
        let mut gate = SequenceGate::new();
        assert!(gate.accept(1));
        // Fetches 2 and 3 were issued before the reset
        gate.bump(3);
        assert!(!gate.accept(2));
        assert!(!gate.accept(3));
        assert!(gate.accept(4));

        gate.bump(1);
        assert!(gate.accept(5));
    }
}
