//! Batch runs over a fixed collection of work items
//!
//! `BatchRunner::execute` drives one scheduler run to completion and
//! aggregates terminal outcomes. If the run is interrupted, the outcome
//! reflects only items that reached a terminal state; absence means
//! "unknown", not "failed".

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::SchedulerConfig;
use crate::error::Result;

use super::pacer::Pacer;
use super::progress::{BatchEvent, ProgressEmitter, ProgressSnapshot};
use super::scheduler::{Scheduler, WorkItem};

/// Event channel depth; overflow drops events rather than stalling workers
const EVENT_CHANNEL_CAPACITY: usize = 1000;

/// One permanently failed item and why.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemFailure {
    pub label: String,
    pub reason: String,
}

/// Aggregated result of a batch run. Immutable once returned.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchOutcome {
    /// Items submitted
    pub total: usize,
    /// Items that reached SUCCEEDED
    pub succeeded: usize,
    /// Items that reached PERMANENTLY_FAILED
    pub failed: usize,
    /// Transient-retry events across all items
    pub retried: usize,
    /// Permanent failures with reasons
    pub failures: Vec<ItemFailure>,
    /// Wall-clock duration of the run
    pub elapsed: Duration,
}

impl BatchOutcome {
    /// Whether every submitted item succeeded.
    pub fn all_succeeded(&self) -> bool {
        self.succeeded == self.total
    }

    /// Items with no terminal state (interrupted runs); unknown, not failed.
    pub fn unresolved(&self) -> usize {
        self.total.saturating_sub(self.succeeded + self.failed)
    }

    /// Counter view matching the progress event snapshots.
    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            total: self.total,
            succeeded: self.succeeded,
            failed: self.failed,
            retried: self.retried,
        }
    }
}

/// Drives the scheduler over fixed collections of work items.
pub struct BatchRunner {
    pacer: Arc<Pacer>,
    config: SchedulerConfig,
    cancel: CancellationToken,
    event_tx: mpsc::Sender<BatchEvent>,
    event_rx: RwLock<Option<mpsc::Receiver<BatchEvent>>>,
}

impl BatchRunner {
    pub fn new(pacer: Arc<Pacer>, config: SchedulerConfig) -> Self {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            pacer,
            config,
            cancel: CancellationToken::new(),
            event_tx: tx,
            event_rx: RwLock::new(Some(rx)),
        }
    }

    /// Take the event receiver (can only be called once).
    pub fn take_event_receiver(&self) -> Option<mpsc::Receiver<BatchEvent>> {
        self.event_rx.write().take()
    }

    /// Token observers can use to tie this runner's shutdown to their own.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Request cooperative shutdown: no new dequeues, pending sleeps return
    /// early, in-flight requests finish.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Run every item to a terminal state and aggregate the outcome.
    ///
    /// The action issues the remote call for one payload; it is expected to
    /// feed response metadata back through the pacer and do its own
    /// CommitCoordinator bookkeeping around persistence writes. Fatal-run
    /// errors propagate immediately; item-scoped failures are aggregated.
    pub async fn execute<T, F, Fut>(&self, items: Vec<WorkItem<T>>, action: F) -> Result<BatchOutcome>
    where
        T: Clone + Send,
        F: Fn(T) -> Fut + Send + Sync,
        Fut: Future<Output = Result<()>> + Send,
    {
        let start = Instant::now();
        let total = items.len();
        let events = ProgressEmitter::new(self.event_tx.clone());

        info!("Batch started: {} items", total);
        events.emit(BatchEvent::Started { total });

        // Fatal errors cancel only this run's token, not the runner's
        let scheduler = Scheduler::new(
            self.pacer.clone(),
            self.config.clone(),
            self.cancel.child_token(),
        );
        for item in items {
            scheduler.enqueue(item);
        }

        let run_result = scheduler.run(&action, &events).await;

        let (succeeded, failed, retried) = scheduler.counts();
        let failures = scheduler.drain_failures();
        let elapsed = start.elapsed();

        if let Err(err) = run_result {
            error!(
                "Batch aborted after {:.1}s ({} succeeded, {} failed): {}",
                elapsed.as_secs_f64(),
                succeeded,
                failed,
                err
            );
            return Err(err);
        }

        let outcome = BatchOutcome {
            total,
            succeeded,
            failed,
            retried,
            failures,
            elapsed,
        };

        info!(
            "Batch complete: {}/{} succeeded, {} failed, {} retries in {:.1}s",
            succeeded,
            total,
            failed,
            retried,
            elapsed.as_secs_f64()
        );
        events.emit(BatchEvent::Completed {
            snapshot: outcome.snapshot(),
        });

        Ok(outcome)
    }
}
