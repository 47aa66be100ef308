//! Quota pools, health bands, and per-pool quota records
//!
//! Every outbound request is metered against exactly one pool. Quota state
//! is only ever replaced wholesale from response metadata; the remote is
//! authoritative, nothing here is decremented locally.

mod tracker;

pub use tracker::*;

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Independently-metered quota pools on the remote API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Pool {
    /// Default pool for most operations
    Core,
    /// Search endpoints (much smaller window)
    Search,
    /// GraphQL endpoints
    Graphql,
    /// Code search endpoints
    CodeSearch,
}

impl Pool {
    /// All pools, in the order the remote reports them.
    pub const ALL: [Pool; 4] = [Pool::Core, Pool::Search, Pool::Graphql, Pool::CodeSearch];

    /// Wire name of the pool as it appears in response metadata.
    pub fn as_str(&self) -> &'static str {
        match self {
            Pool::Core => "core",
            Pool::Search => "search",
            Pool::Graphql => "graphql",
            Pool::CodeSearch => "code_search",
        }
    }
}

impl fmt::Display for Pool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Pool {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "core" => Ok(Pool::Core),
            "search" => Ok(Pool::Search),
            "graphql" => Ok(Pool::Graphql),
            "code_search" => Ok(Pool::CodeSearch),
            other => Err(Error::UnknownPool(other.to_string())),
        }
    }
}

/// Quota health bands, derived from the remaining/limit ratio.
///
/// A pure step function with boundaries at 50%, 20%, and 5% remaining;
/// `remaining == 0` is always hard-exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuotaStatus {
    Healthy,
    Warning,
    Critical,
    Exhausted,
}

impl QuotaStatus {
    /// Derive the band from raw quota numbers.
    pub fn from_quota(remaining: u32, limit: u32) -> Self {
        if remaining == 0 || limit == 0 {
            return QuotaStatus::Exhausted;
        }
        let ratio = remaining as f64 / limit as f64;
        if ratio > 0.50 {
            QuotaStatus::Healthy
        } else if ratio > 0.20 {
            QuotaStatus::Warning
        } else if ratio > 0.05 {
            QuotaStatus::Critical
        } else {
            QuotaStatus::Exhausted
        }
    }

    /// Whether moving to `other` from this band is a degradation.
    pub fn is_degradation_to(&self, other: QuotaStatus) -> bool {
        other > *self
    }
}

impl fmt::Display for QuotaStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            QuotaStatus::Healthy => "healthy",
            QuotaStatus::Warning => "warning",
            QuotaStatus::Critical => "critical",
            QuotaStatus::Exhausted => "exhausted",
        };
        f.write_str(s)
    }
}

/// Quota state for one pool, as last reported by the remote.
///
/// Doubles as the rate-limit metadata struct client layers hand back in
/// after each response.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PoolQuota {
    pub pool: Pool,
    /// Maximum requests per window
    pub limit: u32,
    /// Requests remaining in the current window
    pub remaining: u32,
    /// UTC time the window rolls over
    pub reset_at: DateTime<Utc>,
}

impl PoolQuota {
    pub fn new(pool: Pool, limit: u32, remaining: u32, reset_at: DateTime<Utc>) -> Self {
        Self {
            pool,
            limit,
            remaining,
            reset_at,
        }
    }

    /// Fraction of the window still available (0.0 to 1.0).
    pub fn remaining_ratio(&self) -> f64 {
        if self.limit == 0 {
            return 0.0;
        }
        self.remaining as f64 / self.limit as f64
    }

    /// Seconds until the window resets (0 if already past).
    pub fn seconds_until_reset(&self) -> i64 {
        (self.reset_at - Utc::now()).num_seconds().max(0)
    }

    /// Current health band for this pool.
    pub fn status(&self) -> QuotaStatus {
        QuotaStatus::from_quota(self.remaining, self.limit)
    }
}

/// Point-in-time view of every pool with known quota data.
///
/// Produced by the initialize probe and by [`QuotaTracker::snapshot`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotaSnapshot {
    /// When this snapshot was taken
    pub taken_at: DateTime<Utc>,
    /// Quota state by pool
    pub pools: HashMap<Pool, PoolQuota>,
}

impl QuotaSnapshot {
    pub fn new(pools: HashMap<Pool, PoolQuota>) -> Self {
        Self {
            taken_at: Utc::now(),
            pools,
        }
    }

    /// Quota for a specific pool, if known.
    pub fn get(&self, pool: Pool) -> Option<&PoolQuota> {
        self.pools.get(&pool)
    }

    /// Convenience accessor for the core pool (most common).
    pub fn core(&self) -> Option<&PoolQuota> {
        self.pools.get(&Pool::Core)
    }
}
