//! Headwind Core Library
//!
//! Adaptive pacing, priority scheduling, and bounded-loss commit batching
//! for ingesting data from quota-limited remote APIs.

pub mod commit;
pub mod config;
pub mod error;
pub mod pacing;
pub mod quota;

pub use commit::{CommitCoordinator, CommitSink};
pub use config::Config;
pub use error::{Error, Result, RetryClass};
pub use pacing::{
    BatchEvent, BatchOutcome, BatchRunner, ItemFailure, Pacer, PacerStats, Priority,
    ProgressSnapshot, Scheduler, WorkItem,
};
pub use quota::{Pool, PoolQuota, QuotaProbe, QuotaSnapshot, QuotaStatus, QuotaTracker};

/// Application name for config paths
pub const APP_NAME: &str = "headwind";

/// Core-pool request limit below which a credential looks unauthenticated
pub const AUTHENTICATED_LIMIT_FLOOR: u32 = 5000;
