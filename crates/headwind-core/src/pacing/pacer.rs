//! Adaptive request pacing
//!
//! Delay before each request is `time_until_reset / (remaining - buffer)`,
//! scaled by a multiplier that grows as quota health degrades, clamped to
//! configured bounds. A forced wait, set when the remote reports explicit
//! exhaustion, overrides the formula until the window it named rolls over.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, info};

use crate::config::PacerConfig;
use crate::quota::{Pool, PoolQuota, QuotaStatus, QuotaTracker};

/// Sliding window for request-velocity bookkeeping
const VELOCITY_WINDOW_SECS: i64 = 60;

#[derive(Debug, Default)]
struct PoolPacing {
    /// Last issuance, for the cold-start minimum interval
    last_issued: Option<DateTime<Utc>>,
    /// Issuance instants in the last minute, pruned on read
    issued_window: Vec<DateTime<Utc>>,
    /// Active forced wait, if any
    wait_until: Option<DateTime<Utc>>,
}

/// Computes recommended delays from tracker state.
///
/// Holds a read-only reference to the [`QuotaTracker`] plus its own
/// transient bookkeeping; it never mutates quota state directly.
pub struct Pacer {
    tracker: Arc<QuotaTracker>,
    config: PacerConfig,
    state: RwLock<HashMap<Pool, PoolPacing>>,
}

impl Pacer {
    pub fn new(tracker: Arc<QuotaTracker>, config: PacerConfig) -> Self {
        Self {
            tracker,
            config,
            state: RwLock::new(HashMap::new()),
        }
    }

    /// The tracker this pacer reads from.
    pub fn tracker(&self) -> &Arc<QuotaTracker> {
        &self.tracker
    }

    /// Recommended delay before the next request in `pool`.
    ///
    /// An active forced wait takes precedence; otherwise the adaptive
    /// formula applies, clamped to `[min_delay, max_delay]`. With no quota
    /// data yet (cold start) the delay is zero for the first request and
    /// whatever remains of the minimum interval thereafter. Never negative,
    /// never unbounded.
    pub fn recommended_delay(&self, pool: Pool) -> Duration {
        let now = Utc::now();

        {
            let mut state = self.state.write();
            let pacing = state.entry(pool).or_default();
            if let Some(wait_until) = pacing.wait_until {
                let remaining = (wait_until - now).num_milliseconds();
                if remaining > 0 {
                    return Duration::from_millis(remaining as u64);
                }
                pacing.wait_until = None;
            }
        }

        match self.tracker.quota(pool) {
            Some(quota) => self.adaptive_delay(&quota),
            None => self.cold_start_delay(pool, now),
        }
    }

    fn adaptive_delay(&self, quota: &PoolQuota) -> Duration {
        let seconds_until_reset = quota.seconds_until_reset();

        // Reset imminent or past: the window is about to refill anyway
        if seconds_until_reset <= 0 {
            return self.config.min_delay();
        }

        let buffer = quota.limit as f64 * self.config.reserve_buffer_pct;
        let effective = (quota.remaining as f64 - buffer).max(1.0);
        let base_delay = seconds_until_reset as f64 / effective;

        let multiplier = throttle_multiplier(quota.status());
        let delay = Duration::from_secs_f64(base_delay * multiplier);

        delay.clamp(self.config.min_delay(), self.config.max_delay())
    }

    fn cold_start_delay(&self, pool: Pool, now: DateTime<Utc>) -> Duration {
        let state = self.state.read();
        let last_issued = state.get(&pool).and_then(|p| p.last_issued);
        match last_issued {
            // Nothing to pace against yet
            None => Duration::ZERO,
            Some(last) => {
                let since = (now - last).num_milliseconds().max(0) as u64;
                self.config
                    .min_delay()
                    .saturating_sub(Duration::from_millis(since))
            }
        }
    }

    /// Record that a request is being issued in `pool`.
    pub fn on_request_issued(&self, pool: Pool) {
        let now = Utc::now();
        let cutoff = now - chrono::Duration::seconds(VELOCITY_WINDOW_SECS);

        let mut state = self.state.write();
        let pacing = state.entry(pool).or_default();
        pacing.last_issued = Some(now);
        pacing.issued_window.retain(|t| *t > cutoff);
        pacing.issued_window.push(now);
    }

    /// Forward fresh response metadata to the tracker.
    ///
    /// Nothing is cached here; delays are always recomputed on demand from
    /// the tracker's latest state.
    pub fn on_request_completed(&self, metadata: PoolQuota) {
        self.tracker.update_from_metadata(metadata);
    }

    /// Set a forced wait anchored to an explicit exhaustion error's reset
    /// time, plus the configured safety margin.
    ///
    /// The predictive formula assumes metadata is current; an explicit
    /// exhaustion error means it wasn't, so the error's own reset time is
    /// trusted instead. Returns the wait remaining from now.
    pub fn force_wait(&self, pool: Pool, reset_at: DateTime<Utc>) -> Duration {
        let margin = chrono::Duration::from_std(self.config.force_wait_margin())
            .unwrap_or_else(|_| chrono::Duration::seconds(5));
        let wait_until = reset_at + margin;

        self.state.write().entry(pool).or_default().wait_until = Some(wait_until);

        let remaining = (wait_until - Utc::now()).num_milliseconds().max(0) as u64;
        info!(
            "{} forced wait until {} ({:.1}s)",
            pool,
            wait_until.to_rfc3339(),
            remaining as f64 / 1000.0
        );
        Duration::from_millis(remaining)
    }

    /// Drop an active forced wait early (e.g., metadata shows the window
    /// already rolled over).
    pub fn clear_forced_wait(&self, pool: Pool) {
        if let Some(pacing) = self.state.write().get_mut(&pool) {
            pacing.wait_until = None;
        }
    }

    /// Sleep out the recommended delay, then record issuance.
    ///
    /// Convenience for unscheduled call sites such as a discovery probe.
    /// The scheduler does not use this; its sleeps must be cancellable.
    pub async fn pace(&self, pool: Pool) {
        let delay = self.recommended_delay(pool);
        if !delay.is_zero() {
            debug!("Pacing {} for {:.2}s", pool, delay.as_secs_f64());
            tokio::time::sleep(delay).await;
        }
        self.on_request_issued(pool);
    }

    /// Current pacing view across all pools, for logs and assertions.
    pub fn stats(&self) -> PacerStats {
        let now = Utc::now();
        let cutoff = now - chrono::Duration::seconds(VELOCITY_WINDOW_SECS);
        let snapshot = self.tracker.snapshot();

        let mut pools = Vec::new();
        let mut state = self.state.write();
        for (pool, quota) in &snapshot.pools {
            let (requests_last_minute, forced_wait_ms) = match state.get_mut(pool) {
                Some(pacing) => {
                    pacing.issued_window.retain(|t| *t > cutoff);
                    let wait_ms = pacing
                        .wait_until
                        .map(|w| (w - now).num_milliseconds().max(0) as u64)
                        .unwrap_or(0);
                    (pacing.issued_window.len(), wait_ms)
                }
                None => (0, 0),
            };

            pools.push(PoolPacerStats {
                pool: *pool,
                limit: quota.limit,
                remaining: quota.remaining,
                status: quota.status(),
                seconds_until_reset: quota.seconds_until_reset(),
                recommended_delay_ms: self.adaptive_delay(quota).as_millis() as u64,
                requests_last_minute,
                forced_wait_remaining_ms: forced_wait_ms,
            });
        }
        pools.sort_by_key(|p| p.pool.as_str());

        PacerStats { pools }
    }
}

/// Throttle multiplier by quota health band.
fn throttle_multiplier(status: QuotaStatus) -> f64 {
    match status {
        QuotaStatus::Healthy => 1.0,
        QuotaStatus::Warning => 1.5,
        QuotaStatus::Critical => 2.0,
        QuotaStatus::Exhausted => 4.0,
    }
}

/// Per-pool pacing view
#[derive(Debug, Clone, Serialize)]
pub struct PoolPacerStats {
    pub pool: Pool,
    pub limit: u32,
    pub remaining: u32,
    pub status: QuotaStatus,
    pub seconds_until_reset: i64,
    pub recommended_delay_ms: u64,
    pub requests_last_minute: usize,
    pub forced_wait_remaining_ms: u64,
}

/// Pacer statistics for monitoring
#[derive(Debug, Clone, Serialize)]
pub struct PacerStats {
    pub pools: Vec<PoolPacerStats>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    fn pacer_with(quota: Option<PoolQuota>, config: PacerConfig) -> Pacer {
        let tracker = Arc::new(QuotaTracker::new());
        if let Some(q) = quota {
            tracker.update_from_metadata(q);
        }
        Pacer::new(tracker, config)
    }

    fn quota(limit: u32, remaining: u32, reset_in_secs: i64) -> PoolQuota {
        PoolQuota::new(
            Pool::Core,
            limit,
            remaining,
            Utc::now() + ChronoDuration::seconds(reset_in_secs),
        )
    }

    #[test]
    fn test_healthy_spread_scenario() {
        // limit=5000, remaining=4850, reset in 42m30s:
        // buffer=500, effective=4350, base=2550/4350=0.586s, healthy x1.0
        let pacer = pacer_with(Some(quota(5000, 4850, 2550)), PacerConfig::default());
        let delay = pacer.recommended_delay(Pool::Core).as_secs_f64();
        assert!((0.55..=0.62).contains(&delay), "delay was {delay}");
    }

    #[test]
    fn test_exhausted_pool_clamps_to_max() {
        // remaining=0: effective floors at 1, base=120s, x4.0 -> clamp 60s
        let pacer = pacer_with(Some(quota(5000, 0, 120)), PacerConfig::default());
        assert_eq!(pacer.recommended_delay(Pool::Core), Duration::from_secs(60));
    }

    #[test]
    fn test_reset_in_past_uses_min_delay() {
        let pacer = pacer_with(Some(quota(5000, 10, -30)), PacerConfig::default());
        assert_eq!(pacer.recommended_delay(Pool::Core), Duration::from_millis(50));
    }

    #[test]
    fn test_delay_never_below_min() {
        // Huge remaining over a short window would compute below the floor
        let pacer = pacer_with(Some(quota(100_000, 99_000, 10)), PacerConfig::default());
        assert_eq!(pacer.recommended_delay(Pool::Core), Duration::from_millis(50));
    }

    #[test]
    fn test_delay_bounds_hold_across_inputs() {
        let config = PacerConfig::default();
        let cases = [
            quota(5000, 5000, 3600),
            quota(5000, 2400, 3600),
            quota(5000, 600, 3600),
            quota(5000, 100, 3600),
            quota(5000, 0, 3600),
            quota(5000, 0, -10),
            quota(1, 1, 1),
        ];
        for q in cases {
            let pacer = pacer_with(Some(q), config.clone());
            let delay = pacer.recommended_delay(Pool::Core);
            assert!(delay >= Duration::from_millis(50), "below floor for {q:?}");
            assert!(delay <= Duration::from_secs(60), "above ceiling for {q:?}");
        }
    }

    #[test]
    fn test_cold_start_first_request_immediate() {
        let pacer = pacer_with(None, PacerConfig::default());
        assert_eq!(pacer.recommended_delay(Pool::Core), Duration::ZERO);
    }

    #[test]
    fn test_cold_start_min_interval_after_issuance() {
        let pacer = pacer_with(None, PacerConfig::default());
        pacer.on_request_issued(Pool::Core);
        let delay = pacer.recommended_delay(Pool::Core);
        assert!(delay <= Duration::from_millis(50));
        assert!(delay > Duration::ZERO);
    }

    #[test]
    fn test_force_wait_anchors_to_reset_time() {
        let pacer = pacer_with(Some(quota(5000, 0, 120)), PacerConfig::default());
        let wait = pacer.force_wait(Pool::Core, Utc::now() + ChronoDuration::seconds(120));
        // 120s + 5s margin, not the formula's clamped 60s
        let secs = wait.as_secs_f64();
        assert!((124.0..=126.0).contains(&secs), "wait was {secs}");
    }

    #[test]
    fn test_forced_wait_overrides_formula() {
        let pacer = pacer_with(Some(quota(5000, 4850, 2550)), PacerConfig::default());
        pacer.force_wait(Pool::Core, Utc::now() + ChronoDuration::seconds(90));
        let delay = pacer.recommended_delay(Pool::Core);
        assert!(delay >= Duration::from_secs(90));
    }

    #[test]
    fn test_expired_forced_wait_falls_back_to_formula() {
        let pacer = pacer_with(Some(quota(5000, 4850, 2550)), PacerConfig::default());
        pacer.force_wait(Pool::Core, Utc::now() - ChronoDuration::seconds(30));
        let delay = pacer.recommended_delay(Pool::Core).as_secs_f64();
        assert!((0.55..=0.62).contains(&delay), "delay was {delay}");
    }

    #[test]
    fn test_clear_forced_wait() {
        let pacer = pacer_with(Some(quota(5000, 4850, 2550)), PacerConfig::default());
        pacer.force_wait(Pool::Core, Utc::now() + ChronoDuration::seconds(300));
        pacer.clear_forced_wait(Pool::Core);
        assert!(pacer.recommended_delay(Pool::Core) < Duration::from_secs(1));
    }

    #[test]
    fn test_forced_wait_is_per_pool() {
        let pacer = pacer_with(Some(quota(5000, 4850, 2550)), PacerConfig::default());
        pacer.force_wait(Pool::Search, Utc::now() + ChronoDuration::seconds(300));
        assert!(pacer.recommended_delay(Pool::Core) < Duration::from_secs(1));
    }

    #[test]
    fn test_stats_reports_velocity_and_wait() {
        let pacer = pacer_with(Some(quota(5000, 4850, 2550)), PacerConfig::default());
        pacer.on_request_issued(Pool::Core);
        pacer.on_request_issued(Pool::Core);
        pacer.force_wait(Pool::Core, Utc::now() + ChronoDuration::seconds(100));

        let stats = pacer.stats();
        let core = stats.pools.iter().find(|p| p.pool == Pool::Core).unwrap();
        assert_eq!(core.requests_last_minute, 2);
        assert!(core.forced_wait_remaining_ms > 0);
        assert_eq!(core.status, QuotaStatus::Healthy);
    }

    #[test]
    fn test_warning_multiplier_applied() {
        // remaining 40% -> WARNING -> x1.5
        // buffer=500, effective=1500, base=3000/1500=2.0s, x1.5 = 3.0s
        let pacer = pacer_with(Some(quota(5000, 2000, 3000)), PacerConfig::default());
        let delay = pacer.recommended_delay(Pool::Core).as_secs_f64();
        assert!((2.9..=3.1).contains(&delay), "delay was {delay}");
    }
}
