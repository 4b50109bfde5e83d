//! Error taxonomy for the memory engine.
//!
//! Recoverable conditions ([`MemoryError::NotFound`], [`MemoryError::DuplicateId`])
//! are surfaced to callers who decide what to do. [`MemoryError::DimensionMismatch`]
//! is fatal to the offending write. [`MemoryError::TenantViolation`] is an internal
//! invariant breach and should never be observed outside of tests. Storage failures
//! propagate unchanged — there is no silent partial-write state.

use thiserror::Error;

/// All errors produced by the core engine.
#[derive(Debug, Error)]
pub enum MemoryError {
    /// Operation referenced an id/edge/fact that does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Insert collided with an existing record id.
    #[error("duplicate id: {0}")]
    DuplicateId(String),

    /// Vector dimensionality disagrees with the configured sector dimensionality.
    /// The write is rejected — vectors are never truncated or padded.
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// A tenant-scoped query produced data belonging to another tenant.
    /// This is a programming error, not a user error.
    #[error("tenant violation: {0}")]
    TenantViolation(String),

    /// A maintenance callback exceeded its time budget. The task remains
    /// schedulable on its next tick.
    #[error("Task timeout")]
    TaskTimeout,

    /// The distributed maintenance lock could not be acquired. Treated as a
    /// benign skip by the scheduler, never surfaced to API callers.
    #[error("maintenance lock unavailable: {0}")]
    LockUnavailable(String),

    /// Underlying SQLite failure.
    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    /// Metadata or tag payload failed to (de)serialize.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Anything else that does not fit the taxonomy above.
    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, MemoryError>;

impl MemoryError {
    /// `true` for conditions a caller can reasonably handle and continue.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::NotFound(_) | Self::DuplicateId(_) | Self::LockUnavailable(_) | Self::TaskTimeout
        )
    }
}
