//! Bounded-loss commit batching
//!
//! Completed work is persisted in fixed-size batches instead of one
//! end-of-run transaction, so a late failure loses at most one batch.
//! The ledger and the sink call are serialized under a single async lock;
//! holding it across the commit await is the mutual exclusion that keeps
//! concurrent workers from interleaving commits.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::error::{Error, Result};

/// Boundary trait for the storage layer's transaction commit.
///
/// `count` is the number of buffered successes being flushed by this call.
/// Implementations must be thread-safe (`Send + Sync`).
#[async_trait]
pub trait CommitSink: Send + Sync {
    async fn commit(&self, count: usize) -> Result<()>;
}

#[derive(Debug, Default)]
struct CommitLedger {
    uncommitted: usize,
    total_committed: usize,
}

/// Per-run coordinator of commit boundaries.
///
/// Workers call [`record_success`](Self::record_success) after each
/// persisted item; every `batch_size` successes triggers one commit.
/// [`finalize`](Self::finalize) flushes the remainder at run end.
pub struct CommitCoordinator {
    sink: Arc<dyn CommitSink>,
    batch_size: usize,
    ledger: tokio::sync::Mutex<CommitLedger>,
}

impl CommitCoordinator {
    pub fn new(sink: Arc<dyn CommitSink>, batch_size: usize) -> Self {
        Self {
            sink,
            batch_size: batch_size.max(1),
            ledger: tokio::sync::Mutex::new(CommitLedger::default()),
        }
    }

    /// Configured batch size.
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Record one successful operation; commits automatically when the
    /// buffer reaches the batch size.
    ///
    /// Returns the number of items committed by this call (0 below the
    /// threshold). A failed commit propagates as a fatal error; previously
    /// committed batches stay durable.
    pub async fn record_success(&self) -> Result<usize> {
        let mut ledger = self.ledger.lock().await;
        ledger.uncommitted += 1;
        if ledger.uncommitted >= self.batch_size {
            return self.commit_locked(&mut ledger).await;
        }
        Ok(0)
    }

    /// Force an out-of-band commit of whatever is buffered.
    pub async fn commit(&self) -> Result<usize> {
        let mut ledger = self.ledger.lock().await;
        self.commit_locked(&mut ledger).await
    }

    /// Commit any remainder smaller than a batch at run end. Idempotent if
    /// nothing is pending.
    pub async fn finalize(&self) -> Result<usize> {
        let mut ledger = self.ledger.lock().await;
        let committed = self.commit_locked(&mut ledger).await?;
        info!(
            "Commit coordinator finalized ({} flushed, {} total committed)",
            committed, ledger.total_committed
        );
        Ok(committed)
    }

    /// Items buffered since the last commit.
    pub async fn uncommitted(&self) -> usize {
        self.ledger.lock().await.uncommitted
    }

    /// Items committed across all batches this run. Monotonic.
    pub async fn total_committed(&self) -> usize {
        self.ledger.lock().await.total_committed
    }

    async fn commit_locked(&self, ledger: &mut CommitLedger) -> Result<usize> {
        if ledger.uncommitted == 0 {
            return Ok(0);
        }

        let count = ledger.uncommitted;
        self.sink
            .commit(count)
            .await
            .map_err(|e| Error::Commit(e.to_string()))?;

        ledger.uncommitted = 0;
        ledger.total_committed += count;
        debug!(
            "Committed batch of {} items (total: {})",
            count, ledger.total_committed
        );
        Ok(count)
    }
}
