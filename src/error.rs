//! Error types for the aggregation pipeline.
//!
//! Fatal errors abort the whole run before any writes happen. Everything
//! else is recovered at the user or subgroup level and only logged.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for pipeline operations.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// No pseudonymization salt was supplied.
    #[error("pseudonymization salt is not configured (set --salt or COHORTWISE_SALT)")]
    MissingSalt,

    /// A salt was supplied but is unusable.
    #[error("pseudonymization salt is invalid: {0}")]
    InvalidSalt(String),

    /// Configuration file or argument problem.
    #[error("configuration error: {0}")]
    Config(String),

    /// A backing store could not be reached at all.
    #[error("{store} is unavailable: {reason}")]
    StoreUnavailable { store: &'static str, reason: String },

    /// One raw-record domain could not be read for one user.
    #[error("failed to fetch {domain} records: {reason}")]
    DomainFetch { domain: &'static str, reason: String },

    /// A contribution or trend write failed.
    #[error("write failed: {0}")]
    Write(String),

    /// Another aggregation run holds the lock.
    #[error("aggregation already running (lock held at {})", .0.display())]
    AggregationLocked(PathBuf),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl PipelineError {
    /// Whether this error must abort the entire run.
    ///
    /// Domain fetches and individual writes are recoverable; salt,
    /// configuration, connectivity and lock failures are not.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            PipelineError::DomainFetch { .. } | PipelineError::Write(_)
        )
    }
}

/// Result type alias for pipeline operations.
pub type Result<T> = std::result::Result<T, PipelineError>;
