//! # Error Types
//!
//! The error taxonomy for the statement store core:
//! - **not-found** — a referenced row/file id does not exist; surfaced from
//!   the gateway and propagated unchanged.
//! - **validation** — malformed drafts, missing rollback snapshots,
//!   unsupported rollback actions.
//! - **transactional failure** — conflicts, unknown transaction handles,
//!   backend storage errors; any of these aborts the enclosing transaction.
//!
//! Partial-batch failures are *collected* into bulk outcomes rather than
//! raised (see `statements::BulkOutcome`). There is no retry anywhere in the
//! core; cleanup failures are logged and never mask the original error.

use crate::types::{BucketId, RowId, TableId};
use thiserror::Error;

/// Errors that can occur in the statement store core.
///
/// - No silent failures
/// - Use `Result<T, StoreError>` for fallible operations
/// - The core never panics; all errors are recoverable by the caller
#[derive(Debug, Error)]
pub enum StoreError {
    /// The referenced row does not exist.
    #[error("row not found: {table}/{id}")]
    NotFound { table: TableId, id: RowId },

    /// A row with the given id already exists in the table.
    #[error("row already exists: {table}/{id}")]
    Conflict { table: TableId, id: RowId },

    /// The transaction handle is unknown (never begun, or already resolved).
    #[error("unknown transaction: {0}")]
    UnknownTransaction(String),

    /// A draft or argument failed validation.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Rollback was requested for an action the engine refuses to invert.
    #[error("rollback not supported for action \"{0}\"")]
    RollbackUnsupported(String),

    /// Rollback requires a prior-state snapshot the audit entry lacks.
    #[error("audit entry {0} has no recorded prior state")]
    MissingSnapshot(RowId),

    /// The referenced stored file does not exist.
    #[error("file not found: {bucket}/{id}")]
    FileNotFound { bucket: BucketId, id: String },

    /// The identity service could not resolve the acting user.
    #[error("identity unavailable: {0}")]
    Identity(String),

    /// A serialization or deserialization error occurred.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// A backend storage error occurred.
    #[error("storage error: {0}")]
    Storage(String),
}

impl StoreError {
    /// Check whether this error is a not-found error.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. } | Self::FileNotFound { .. })
    }

    /// Wrap a serde error.
    pub(crate) fn serialization(err: impl std::fmt::Display) -> Self {
        Self::Serialization(err.to_string())
    }

    /// Wrap a backend storage error.
    pub(crate) fn storage(err: impl std::fmt::Display) -> Self {
        Self::Storage(err.to_string())
    }
}

// =============================================================================
// TESTS
// =============================================================================
