//! Throttler storage port.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::domain::StorageRecord;
use crate::error::StorageError;

/// Throttler storage trait - abstraction over hit counter backends (MongoDB, in-memory).
///
/// The rate-limiting guard calls [`increment`](ThrottlerStorage::increment) once per
/// request and compares `total_hits` against its own limit. Storage knows nothing
/// about limits or HTTP.
#[async_trait]
pub trait ThrottlerStorage: Send + Sync {
    /// Increment the hit counter for `key` and push its expiry to `now + ttl`.
    ///
    /// Creates the record on first use, or when the previous window has expired.
    /// Records are removed by the backend once their TTL is reached.
    async fn increment(&self, key: &str, ttl: Duration) -> Result<StorageRecord, StorageError>;

    /// Release backend resources on application shutdown.
    ///
    /// Must be safe to call more than once.
    async fn shutdown(&self) {}
}

#[async_trait]
impl<T: ThrottlerStorage + ?Sized> ThrottlerStorage for Arc<T> {
    async fn increment(&self, key: &str, ttl: Duration) -> Result<StorageRecord, StorageError> {
        (**self).increment(key, ttl).await
    }

    async fn shutdown(&self) {
        (**self).shutdown().await
    }
}
