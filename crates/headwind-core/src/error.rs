//! Error types for Headwind

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::quota::Pool;

/// Result type alias using Headwind's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// How the scheduler treats a failed work item.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RetryClass {
    /// Quota exhausted; wait out the pool's reset. Does not spend a retry
    /// attempt, since the fault lies with the external quota, not the item.
    QuotaExhausted { pool: Pool, reset_at: DateTime<Utc> },

    /// Worth retrying with exponential backoff.
    Transient,

    /// The item itself is bad; record it and move on.
    PermanentItem,

    /// Nothing else in the run can succeed; abort it.
    FatalRun,
}

/// Main error type for Headwind
#[derive(Error, Debug)]
pub enum Error {
    // Quota errors
    #[error("{pool} quota exhausted, window resets at {reset_at}")]
    QuotaExhausted { pool: Pool, reset_at: DateTime<Utc> },

    #[error("unknown quota pool: {0}")]
    UnknownPool(String),

    // Remote call errors
    #[error("transient remote failure: {0}")]
    Transient(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid record: {0}")]
    InvalidRecord(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    // Durability errors
    #[error("commit failed: {0}")]
    Commit(String),

    // Configuration errors
    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid configuration: {field}: {reason}")]
    InvalidConfig { field: String, reason: String },

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    // Generic errors
    #[error("{0}")]
    Other(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl Error {
    /// Classify this error for the scheduler's retry policy.
    ///
    /// Untyped failures (`Other`, `Anyhow`) classify as transient: the
    /// retry budget bounds the damage when they turn out not to be.
    pub fn retry_class(&self) -> RetryClass {
        match self {
            Error::QuotaExhausted { pool, reset_at } => RetryClass::QuotaExhausted {
                pool: *pool,
                reset_at: *reset_at,
            },
            Error::Transient(_) | Error::Http(_) | Error::Io(_) => RetryClass::Transient,
            Error::Other(_) | Error::Anyhow(_) => RetryClass::Transient,
            Error::NotFound(_)
            | Error::InvalidRecord(_)
            | Error::UnknownPool(_)
            | Error::Json(_) => RetryClass::PermanentItem,
            Error::Auth(_)
            | Error::Commit(_)
            | Error::Config(_)
            | Error::InvalidConfig { .. }
            | Error::TomlParse(_) => RetryClass::FatalRun,
        }
    }

    /// Returns true if this error aborts the whole run rather than a
    /// single item.
    pub fn is_fatal(&self) -> bool {
        matches!(self.retry_class(), RetryClass::FatalRun)
    }
}
