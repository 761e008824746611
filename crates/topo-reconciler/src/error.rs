//! Error types for topology reconciliation.

use std::fmt::Display;
use thiserror::Error;
use topo_store::StoreError;

/// Result type for reconciliation operations.
pub type Result<T> = std::result::Result<T, ReconcileError>;

/// Errors that abort a reconciliation run.
///
/// Every variant is fatal for the snapshot being processed: the surrounding
/// transaction is rolled back and nothing is persisted. Problems confined
/// to one interface or one link are not errors; they are logged and listed
/// in the [`ReconcileReport`](crate::ReconcileReport).
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// The interface parent graph is not acyclic.
    #[error("dependency cycle among interfaces: {}", .members.join(", "))]
    Cycle {
        /// Interfaces left unresolved, sorted.
        members: Vec<String>,
    },

    /// The store rejected an operation.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// The snapshot could not be decoded.
    #[error("invalid snapshot: {0}")]
    Snapshot(String),

    /// The configuration could not be loaded or is invalid.
    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ReconcileError {
    /// Creates a cycle error from the unresolved members.
    pub fn cycle<I, K>(members: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Display,
    {
        Self::Cycle {
            members: members.into_iter().map(|m| m.to_string()).collect(),
        }
    }

    /// Creates a snapshot error.
    pub fn snapshot(message: impl Into<String>) -> Self {
        Self::Snapshot(message.into())
    }

    /// Creates a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Returns true if re-running the same snapshot may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            ReconcileError::Store(err) => err.is_retryable(),
            ReconcileError::Io(_) => true,
            ReconcileError::Cycle { .. }
            | ReconcileError::Snapshot(_)
            | ReconcileError::Config(_) => false,
        }
    }
}
