//! Error types for store operations.

use thiserror::Error;

/// Result type alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors raised by a [`TopologyStore`](crate::TopologyStore).
///
/// Any of these aborts the surrounding transaction.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// Record lookup by identity failed.
    #[error("{entity} '{key}' not found")]
    NotFound {
        /// Entity type ("interface", "vlan", ...).
        entity: &'static str,
        /// Identity or lookup key.
        key: String,
    },

    /// A uniqueness constraint would be violated.
    #[error("{entity} conflict: {message}")]
    Conflict {
        /// Entity type.
        entity: &'static str,
        /// Error message.
        message: String,
    },

    /// The record is still referenced and cannot be deleted.
    #[error("{entity} '{key}' is still in use: {message}")]
    InUse {
        /// Entity type.
        entity: &'static str,
        /// Identity of the record.
        key: String,
        /// What still references it.
        message: String,
    },

    /// The record violates a structural invariant.
    #[error("invalid {entity}: {message}")]
    Invalid {
        /// Entity type.
        entity: &'static str,
        /// Error message.
        message: String,
    },
}

impl StoreError {
    /// Creates a not-found error.
    pub fn not_found(entity: &'static str, key: impl ToString) -> Self {
        Self::NotFound {
            entity,
            key: key.to_string(),
        }
    }

    /// Creates a conflict error.
    pub fn conflict(entity: &'static str, message: impl Into<String>) -> Self {
        Self::Conflict {
            entity,
            message: message.into(),
        }
    }

    /// Creates an in-use error.
    pub fn in_use(entity: &'static str, key: impl ToString, message: impl Into<String>) -> Self {
        Self::InUse {
            entity,
            key: key.to_string(),
            message: message.into(),
        }
    }

    /// Creates an invalid-record error.
    pub fn invalid(entity: &'static str, message: impl Into<String>) -> Self {
        Self::Invalid {
            entity,
            message: message.into(),
        }
    }

    /// Returns true if retrying the whole transaction may succeed.
    ///
    /// Conflicts arise when a concurrent caller committed an overlapping
    /// identity first; everything else is deterministic.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }
}
