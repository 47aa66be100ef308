//! Priority-ordered, bounded-concurrency work item execution
//!
//! Items move through `PENDING -> RUNNING -> {SUCCEEDED | RETRYING ->
//! PENDING | PERMANENTLY_FAILED}`. Quota-exhaustion failures route through
//! the pacer's forced wait and requeue at high priority without spending a
//! retry attempt; transient failures back off exponentially against a
//! bounded retry budget.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::config::SchedulerConfig;
use crate::error::{Error, Result, RetryClass};
use crate::quota::Pool;

use super::batch::ItemFailure;
use super::pacer::Pacer;
use super::progress::{BatchEvent, ProgressEmitter};

/// Priority bands for work items. Lower sorts first at dequeue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    /// Quota requeues and critical operations
    High,
    /// Regular work
    Normal,
    /// Background/optional work
    Low,
}

/// A unit of schedulable work.
///
/// The payload is whatever the caller's action needs to issue its remote
/// call; it must be `Clone` so retries can re-invoke the action.
#[derive(Debug, Clone)]
pub struct WorkItem<T> {
    /// Generated id for log correlation
    pub id: Uuid,
    /// Caller-supplied name used in failure reporting
    pub label: String,
    /// Quota pool this item's request is metered against
    pub pool: Pool,
    pub priority: Priority,
    pub payload: T,
}

impl<T> WorkItem<T> {
    pub fn new(label: impl Into<String>, pool: Pool, payload: T) -> Self {
        Self {
            id: Uuid::new_v4(),
            label: label.into(),
            pool,
            priority: Priority::Normal,
            payload,
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }
}

/// Heap entry ordered by (priority, insertion sequence).
///
/// The sequence number guarantees FIFO fairness among equal-priority items
/// so nothing starves. Requeues keep their original sequence.
struct QueuedItem<T> {
    priority: Priority,
    seq: u64,
    attempt: u32,
    quota_requeues: u32,
    item: WorkItem<T>,
}

impl<T> QueuedItem<T> {
    fn key(&self) -> (u8, u64) {
        (self.priority as u8, self.seq)
    }
}

impl<T> PartialEq for QueuedItem<T> {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl<T> Eq for QueuedItem<T> {}

impl<T> PartialOrd for QueuedItem<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for QueuedItem<T> {
    // Reversed so BinaryHeap's max is the smallest (priority, seq) key
    fn cmp(&self, other: &Self) -> Ordering {
        other.key().cmp(&self.key())
    }
}

/// Bounded-concurrency, priority-ordered executor of work items.
///
/// Concurrency is structural: `run` drives `min(max_concurrent, items)`
/// cooperative worker futures joined in the calling task, so the number of
/// simultaneously running items can never exceed the bound regardless of
/// retry volume. Driven by [`BatchRunner`](super::BatchRunner).
pub struct Scheduler<T> {
    config: SchedulerConfig,
    pacer: Arc<Pacer>,
    cancel: CancellationToken,
    queue: Mutex<BinaryHeap<QueuedItem<T>>>,
    next_seq: AtomicU64,
    total: AtomicUsize,
    succeeded: AtomicUsize,
    failed: AtomicUsize,
    retried: AtomicUsize,
    failures: Mutex<Vec<ItemFailure>>,
    fatal: Mutex<Option<Error>>,
}

impl<T> Scheduler<T> {
    pub fn new(pacer: Arc<Pacer>, config: SchedulerConfig, cancel: CancellationToken) -> Self {
        Self {
            config,
            pacer,
            cancel,
            queue: Mutex::new(BinaryHeap::new()),
            next_seq: AtomicU64::new(0),
            total: AtomicUsize::new(0),
            succeeded: AtomicUsize::new(0),
            failed: AtomicUsize::new(0),
            retried: AtomicUsize::new(0),
            failures: Mutex::new(Vec::new()),
            fatal: Mutex::new(None),
        }
    }

    /// Insert an item into the priority queue.
    pub fn enqueue(&self, item: WorkItem<T>) {
        let seq = self.next_seq.fetch_add(1, AtomicOrdering::SeqCst);
        let queued = QueuedItem {
            priority: item.priority,
            seq,
            attempt: 0,
            quota_requeues: 0,
            item,
        };
        self.queue.lock().push(queued);
        self.total.fetch_add(1, AtomicOrdering::SeqCst);
    }

    /// Number of items enqueued for this run.
    pub fn queued_total(&self) -> usize {
        self.total.load(AtomicOrdering::SeqCst)
    }

    /// Drive all enqueued items to a terminal state.
    ///
    /// Returns `Err` only for fatal-run errors; item-scoped failures are
    /// recorded and never escape.
    pub(crate) async fn run<F, Fut>(&self, action: &F, events: &ProgressEmitter) -> Result<()>
    where
        T: Clone + Send,
        F: Fn(T) -> Fut + Sync,
        Fut: Future<Output = Result<()>> + Send,
    {
        let total = self.total.load(AtomicOrdering::SeqCst);
        if total == 0 {
            return Ok(());
        }

        let workers = self.config.max_concurrent.min(total).max(1);
        debug!("Scheduler starting: {} items, {} workers", total, workers);

        let loops: Vec<_> = (0..workers)
            .map(|worker| self.worker_loop(worker, action, events))
            .collect();
        futures::future::join_all(loops).await;

        if let Some(err) = self.fatal.lock().take() {
            return Err(err);
        }
        Ok(())
    }

    async fn worker_loop<F, Fut>(&self, worker: usize, action: &F, events: &ProgressEmitter)
    where
        T: Clone + Send,
        F: Fn(T) -> Fut + Sync,
        Fut: Future<Output = Result<()>> + Send,
    {
        loop {
            if self.cancel.is_cancelled() {
                break;
            }
            if self.terminal_count() >= self.total.load(AtomicOrdering::SeqCst) {
                break;
            }

            let next = self.queue.lock().pop();
            let Some(queued) = next else {
                // Queue drained but other workers still have items in
                // flight that may requeue; poll instead of spinning.
                if !self.sleep_unless_cancelled(self.config.idle_poll()).await {
                    break;
                }
                continue;
            };

            let pool = queued.item.pool;
            let delay = self.pacer.recommended_delay(pool);
            if !delay.is_zero() {
                debug!(
                    "worker {}: pacing {} for {:.2}s before {}",
                    worker,
                    pool,
                    delay.as_secs_f64(),
                    queued.item.label
                );
                if !self.sleep_unless_cancelled(delay).await {
                    // No request in flight yet: back to pending, left
                    // unrepresented in the outcome
                    self.queue.lock().push(queued);
                    break;
                }
            }

            self.pacer.on_request_issued(pool);

            match action(queued.item.payload.clone()).await {
                Ok(()) => {
                    self.succeeded.fetch_add(1, AtomicOrdering::SeqCst);
                    debug!("{} succeeded", queued.item.label);
                    events.emit(BatchEvent::ItemSucceeded {
                        label: queued.item.label.clone(),
                    });
                }
                Err(err) => {
                    if !self.handle_failure(queued, err, events).await {
                        break;
                    }
                }
            }
        }
    }

    /// Route a failed item per its retry class. Returns false when the
    /// worker should stop (fatal error or cancellation).
    async fn handle_failure(
        &self,
        mut queued: QueuedItem<T>,
        err: Error,
        events: &ProgressEmitter,
    ) -> bool {
        match err.retry_class() {
            RetryClass::QuotaExhausted { pool, reset_at } => {
                // External-quota event: spend a requeue, never an attempt
                queued.quota_requeues += 1;
                if queued.quota_requeues > self.config.max_quota_requeues {
                    self.record_failure(
                        &queued.item,
                        format!(
                            "{} quota never recovered after {} forced waits",
                            pool, self.config.max_quota_requeues
                        ),
                        events,
                    );
                    return true;
                }

                let wait = self.pacer.force_wait(pool, reset_at);
                warn!(
                    "{} hit {} quota exhaustion; requeueing at high priority (wait {:.1}s)",
                    queued.item.label,
                    pool,
                    wait.as_secs_f64()
                );
                events.emit(BatchEvent::ItemQuotaDeferred {
                    label: queued.item.label.clone(),
                    wait_ms: wait.as_millis() as u64,
                });

                queued.priority = Priority::High;
                self.queue.lock().push(queued);
                true
            }
            RetryClass::Transient => {
                if queued.attempt < self.config.max_retries {
                    queued.attempt += 1;
                    self.retried.fetch_add(1, AtomicOrdering::SeqCst);
                    let backoff = self.config.backoff_for(queued.attempt);
                    warn!(
                        "{} failed (attempt {}/{}): {}; retrying in {:.1}s",
                        queued.item.label,
                        queued.attempt,
                        self.config.max_retries,
                        err,
                        backoff.as_secs_f64()
                    );
                    events.emit(BatchEvent::ItemRetried {
                        label: queued.item.label.clone(),
                        attempt: queued.attempt,
                        max_retries: self.config.max_retries,
                        backoff_ms: backoff.as_millis() as u64,
                    });

                    let interrupted = !self.sleep_unless_cancelled(backoff).await;
                    // Requeue at original priority either way; if cancelled
                    // it simply stays pending
                    self.queue.lock().push(queued);
                    !interrupted
                } else {
                    self.record_failure(&queued.item, err.to_string(), events);
                    true
                }
            }
            RetryClass::PermanentItem => {
                self.record_failure(&queued.item, err.to_string(), events);
                true
            }
            RetryClass::FatalRun => {
                error!("Fatal error while processing {}: {}", queued.item.label, err);
                {
                    let mut fatal = self.fatal.lock();
                    if fatal.is_none() {
                        *fatal = Some(err);
                    }
                }
                self.cancel.cancel();
                false
            }
        }
    }

    fn record_failure(&self, item: &WorkItem<T>, reason: String, events: &ProgressEmitter) {
        warn!("{} permanently failed: {}", item.label, reason);
        self.failed.fetch_add(1, AtomicOrdering::SeqCst);
        self.failures.lock().push(ItemFailure {
            label: item.label.clone(),
            reason: reason.clone(),
        });
        events.emit(BatchEvent::ItemFailed {
            label: item.label.clone(),
            reason,
        });
    }

    fn terminal_count(&self) -> usize {
        self.succeeded.load(AtomicOrdering::SeqCst) + self.failed.load(AtomicOrdering::SeqCst)
    }

    /// Sleep that returns false if the run is cancelled first.
    async fn sleep_unless_cancelled(&self, duration: Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(duration) => true,
            _ = self.cancel.cancelled() => false,
        }
    }

    pub(crate) fn counts(&self) -> (usize, usize, usize) {
        (
            self.succeeded.load(AtomicOrdering::SeqCst),
            self.failed.load(AtomicOrdering::SeqCst),
            self.retried.load(AtomicOrdering::SeqCst),
        )
    }

    pub(crate) fn drain_failures(&self) -> Vec<ItemFailure> {
        std::mem::take(&mut *self.failures.lock())
    }
}
