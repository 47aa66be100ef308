//! Progress observation for batch runs
//!
//! Events flow over a bounded channel to an observer that is strictly
//! read-only: a slow or absent observer drops events, it never stalls a
//! worker.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::debug;

/// Progress event types
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum BatchEvent {
    /// Batch run started
    Started { total: usize },
    /// An item reached SUCCEEDED
    ItemSucceeded { label: String },
    /// An item failed transiently and was requeued
    ItemRetried {
        label: String,
        attempt: u32,
        max_retries: u32,
        backoff_ms: u64,
    },
    /// An item was requeued behind a quota forced wait
    ItemQuotaDeferred { label: String, wait_ms: u64 },
    /// An item reached PERMANENTLY_FAILED
    ItemFailed { label: String, reason: String },
    /// Batch run completed
    Completed { snapshot: ProgressSnapshot },
}

/// Point-in-time progress counters for a batch run.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub retried: usize,
}

impl ProgressSnapshot {
    /// Items still pending or running.
    pub fn remaining(&self) -> usize {
        self.total.saturating_sub(self.succeeded + self.failed)
    }

    /// Completion percentage (0-100).
    pub fn percent_complete(&self) -> f64 {
        if self.total == 0 {
            return 100.0;
        }
        ((self.succeeded + self.failed) as f64 / self.total as f64) * 100.0
    }

    /// Success rate among terminal items (0-100).
    pub fn success_rate(&self) -> f64 {
        let terminal = self.succeeded + self.failed;
        if terminal == 0 {
            return 100.0;
        }
        (self.succeeded as f64 / terminal as f64) * 100.0
    }
}

/// Fire-and-forget event sender shared by scheduler workers.
pub(crate) struct ProgressEmitter {
    tx: mpsc::Sender<BatchEvent>,
}

impl ProgressEmitter {
    pub(crate) fn new(tx: mpsc::Sender<BatchEvent>) -> Self {
        Self { tx }
    }

    /// Emit an event without blocking. Full or dropped channels lose the
    /// event; observers are read-only and cannot slow scheduling.
    pub(crate) fn emit(&self, event: BatchEvent) {
        if let Err(e) = self.tx.try_send(event) {
            debug!("Dropped progress event: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_snapshot_is_complete() {
        let snapshot = ProgressSnapshot::default();
        assert_eq!(snapshot.percent_complete(), 100.0);
        assert_eq!(snapshot.success_rate(), 100.0);
        assert_eq!(snapshot.remaining(), 0);
    }

    #[test]
    fn test_snapshot_derivations() {
        let snapshot = ProgressSnapshot {
            total: 10,
            succeeded: 6,
            failed: 2,
            retried: 3,
        };
        assert_eq!(snapshot.remaining(), 2);
        assert_eq!(snapshot.percent_complete(), 80.0);
        assert_eq!(snapshot.success_rate(), 75.0);
    }

    #[tokio::test]
    async fn test_emitter_drops_when_channel_full() {
        let (tx, mut rx) = mpsc::channel(1);
        let emitter = ProgressEmitter::new(tx);

        emitter.emit(BatchEvent::Started { total: 2 });
        // Channel is full; this one is dropped rather than blocking
        emitter.emit(BatchEvent::ItemSucceeded { label: "a".into() });

        assert!(matches!(rx.recv().await, Some(BatchEvent::Started { total: 2 })));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_emitter_survives_dropped_receiver() {
        let (tx, rx) = mpsc::channel(4);
        drop(rx);
        let emitter = ProgressEmitter::new(tx);
        emitter.emit(BatchEvent::Started { total: 1 });
    }
}
