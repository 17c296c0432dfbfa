//! Storage-level error types.

use thiserror::Error;

/// Errors surfaced by a [`ThrottlerStorage`](crate::ports::ThrottlerStorage) backend.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    /// The backing store is unreachable, not ready yet, or was shut down.
    #[error("Storage unavailable: {0}")]
    Connectivity(String),

    /// A stored counter record is missing fields or holds unexpected types.
    #[error("Malformed counter record: {0}")]
    DataShape(String),

    #[error("Counter key must not be empty")]
    InvalidKey,
}

impl StorageError {
    /// Whether the failure is transient and the caller may try again later.
    pub fn is_connectivity(&self) -> bool {
        matches!(self, StorageError::Connectivity(_))
    }
}
