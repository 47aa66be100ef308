//! Quota state tracking from response metadata
//!
//! Tracks quota passively from metadata the client layer hands back after
//! each response, so querying state costs nothing. One probe at startup
//! seeds the map before any paced traffic begins.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::quota::{Pool, PoolQuota, QuotaSnapshot, QuotaStatus};
use crate::AUTHENTICATED_LIMIT_FLOOR;

/// Boundary trait for the one startup probe that seeds quota state.
///
/// The probe endpoint on the remote is expected to be free (it does not
/// count against any pool). Implementations must be thread-safe
/// (`Send + Sync`) for use across async tasks.
#[async_trait]
pub trait QuotaProbe: Send + Sync {
    /// Fetch current quota for every pool the remote reports.
    async fn fetch_quota(&self) -> Result<QuotaSnapshot>;
}

/// Tracks quota state for all pools, updated only from response metadata.
///
/// Single writer: nothing outside this type mutates the pool map. Reads
/// are lock-cheap and never touch the network.
pub struct QuotaTracker {
    pools: Arc<RwLock<HashMap<Pool, PoolQuota>>>,
}

impl QuotaTracker {
    /// Create an empty tracker (no quota data until seeded or updated).
    pub fn new() -> Self {
        Self {
            pools: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Seed quota state from one probe call before paced traffic begins.
    ///
    /// Returns the snapshot so callers can inspect it. Probe failure is an
    /// error; the caller decides whether to proceed unseeded.
    pub async fn initialize(&self, probe: &dyn QuotaProbe) -> Result<QuotaSnapshot> {
        let snapshot = probe.fetch_quota().await?;

        {
            let mut pools = self.pools.write();
            for (pool, quota) in &snapshot.pools {
                pools.insert(*pool, *quota);
            }
        }

        if let Some(core) = snapshot.core() {
            if core.limit < AUTHENTICATED_LIMIT_FLOOR {
                warn!(
                    "Credential looks unauthenticated (core limit={}, expected >={})",
                    core.limit, AUTHENTICATED_LIMIT_FLOOR
                );
            }
            info!(
                "Quota tracker initialized (core remaining={}/{}, resets in {}s)",
                core.remaining,
                core.limit,
                core.seconds_until_reset()
            );
        } else {
            info!(
                "Quota tracker initialized ({} pools, no core data)",
                snapshot.pools.len()
            );
        }

        Ok(snapshot)
    }

    /// Replace quota state for one pool from fresh response metadata.
    ///
    /// Last write wins; the record is replaced wholesale, never adjusted
    /// locally. Band transitions are logged, degradations at WARN.
    pub fn update_from_metadata(&self, quota: PoolQuota) {
        let pool = quota.pool;
        let new_status = quota.status();

        let previous = self.pools.write().insert(pool, quota);

        if let Some(prev) = previous {
            let old_status = prev.status();
            if old_status != new_status {
                if old_status.is_degradation_to(new_status) {
                    warn!(
                        "{} quota degraded {} -> {} ({}/{} remaining)",
                        pool, old_status, new_status, quota.remaining, quota.limit
                    );
                } else {
                    debug!(
                        "{} quota improved {} -> {} ({}/{} remaining)",
                        pool, old_status, new_status, quota.remaining, quota.limit
                    );
                }
            }
        }
    }

    /// Current quota for a pool, if any metadata has been seen.
    pub fn quota(&self, pool: Pool) -> Option<PoolQuota> {
        self.pools.read().get(&pool).copied()
    }

    /// Health band for a pool. Unknown pools report HEALTHY: with no data
    /// there is nothing to throttle against yet.
    pub fn status_of(&self, pool: Pool) -> QuotaStatus {
        self.quota(pool)
            .map(|q| q.status())
            .unwrap_or(QuotaStatus::Healthy)
    }

    /// Snapshot of every pool currently known.
    pub fn snapshot(&self) -> QuotaSnapshot {
        QuotaSnapshot::new(self.pools.read().clone())
    }
}

impl Default for QuotaTracker {
    fn default() -> Self {
        Self::new()
    }
}
