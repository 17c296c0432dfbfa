//! In-memory throttler storage - used as fallback when MongoDB is unavailable.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;

use throttler_core::domain::{CounterRecord, StorageRecord};
use throttler_core::ports::{Clock, SystemClock, ThrottlerStorage};
use throttler_core::StorageError;

/// In-memory counter store using a HashMap behind an async RwLock.
///
/// Expired records are treated as absent on increment and can be swept with
/// [`purge_expired`](Self::purge_expired).
/// Note: Counts are per-process and lost on restart.
pub struct InMemoryThrottlerStorage {
    records: RwLock<HashMap<String, CounterRecord>>,
    clock: Arc<dyn Clock>,
}

impl InMemoryThrottlerStorage {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            clock,
        }
    }

    /// Remove every record whose window has elapsed. Returns how many were removed.
    pub async fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|_, record| !record.is_expired(now));
        let purged = before - records.len();

        if purged > 0 {
            tracing::debug!(purged, "Purged expired counters");
        }
        purged
    }

    /// Number of live (unexpired) records.
    pub async fn len(&self) -> usize {
        let now = self.clock.now();
        let records = self.records.read().await;
        records.values().filter(|r| !r.is_expired(now)).count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl Default for InMemoryThrottlerStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ThrottlerStorage for InMemoryThrottlerStorage {
    async fn increment(&self, key: &str, ttl: Duration) -> Result<StorageRecord, StorageError> {
        if key.is_empty() {
            return Err(StorageError::InvalidKey);
        }

        // The write lock makes read-modify-write indivisible for concurrent callers
        let mut records = self.records.write().await;
        let now = self.clock.now();

        let record = records
            .entry(key.to_string())
            .and_modify(|record| {
                if record.is_expired(now) {
                    *record = CounterRecord::new(key, now, ttl);
                } else {
                    record.hit(now, ttl);
                }
            })
            .or_insert_with(|| CounterRecord::new(key, now, ttl));

        tracing::debug!(key = %key, total_hits = record.total_hits, "Counter incremented");

        Ok(record.to_storage_record(now))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};
    use throttler_core::ports::ManualClock;

    const MINUTE: Duration = Duration::from_secs(60);

    fn manual_storage() -> (Arc<ManualClock>, InMemoryThrottlerStorage) {
        let start: DateTime<Utc> = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let clock = Arc::new(ManualClock::new(start));
        let storage = InMemoryThrottlerStorage::with_clock(clock.clone());
        (clock, storage)
    }

    #[tokio::test]
    async fn test_first_increment_creates_record() {
        let storage = InMemoryThrottlerStorage::new();
        let record = storage.increment("client-a", MINUTE).await.unwrap();
        assert_eq!(record.total_hits, 1);
        assert!(record.time_to_expire <= 60);
        assert!(record.time_to_expire >= 59);
    }

    #[tokio::test]
    async fn test_consecutive_increments_count_up() {
        let storage = InMemoryThrottlerStorage::new();
        for expected in 1..=5 {
            let record = storage.increment("client-a", MINUTE).await.unwrap();
            assert_eq!(record.total_hits, expected);
        }

        // Other keys are independent
        let record = storage.increment("client-b", MINUTE).await.unwrap();
        assert_eq!(record.total_hits, 1);
    }

    #[tokio::test]
    async fn test_window_expiry_resets_count() {
        let (clock, storage) = manual_storage();

        let first = storage.increment("client-a", MINUTE).await.unwrap();
        assert_eq!(first.total_hits, 1);
        assert_eq!(first.time_to_expire, 60);

        let second = storage.increment("client-a", MINUTE).await.unwrap();
        assert_eq!(second.total_hits, 2);
        assert_eq!(second.time_to_expire, 60);

        clock.advance(Duration::from_secs(61));

        let third = storage.increment("client-a", MINUTE).await.unwrap();
        assert_eq!(third.total_hits, 1);
        assert_eq!(third.time_to_expire, 60);
    }

    #[tokio::test]
    async fn test_every_hit_restarts_window() {
        let (clock, storage) = manual_storage();

        assert_eq!(storage.increment("k", MINUTE).await.unwrap().total_hits, 1);
        clock.advance(Duration::from_secs(50));
        assert_eq!(storage.increment("k", MINUTE).await.unwrap().total_hits, 2);
        clock.advance(Duration::from_secs(50));

        // 100s after the first hit, but only 50s after the last one
        let record = storage.increment("k", MINUTE).await.unwrap();
        assert_eq!(record.total_hits, 3);
        assert_eq!(record.time_to_expire, 60);
    }

    #[tokio::test]
    async fn test_concurrent_increments_are_not_lost() {
        let storage = Arc::new(InMemoryThrottlerStorage::new());

        let handles: Vec<_> = (0..100)
            .map(|_| {
                let storage = storage.clone();
                tokio::spawn(async move { storage.increment("shared", MINUTE).await })
            })
            .collect();

        let mut seen = Vec::new();
        for handle in handles {
            seen.push(handle.await.unwrap().unwrap().total_hits);
        }
        seen.sort_unstable();
        assert_eq!(seen, (1..=100).collect::<Vec<_>>());

        let record = storage.increment("shared", MINUTE).await.unwrap();
        assert_eq!(record.total_hits, 101);
    }

    #[tokio::test]
    async fn test_empty_key_rejected() {
        let storage = InMemoryThrottlerStorage::new();
        let err = storage.increment("", MINUTE).await.unwrap_err();
        assert_eq!(err, StorageError::InvalidKey);
        assert!(storage.is_empty().await);
    }

    #[tokio::test]
    async fn test_zero_ttl_expires_immediately() {
        let (_clock, storage) = manual_storage();

        let record = storage.increment("k", Duration::ZERO).await.unwrap();
        assert_eq!(record.total_hits, 1);
        assert_eq!(record.time_to_expire, 0);

        let record = storage.increment("k", Duration::ZERO).await.unwrap();
        assert_eq!(record.total_hits, 1);
    }

    #[tokio::test]
    async fn test_purge_expired() {
        let (clock, storage) = manual_storage();

        storage.increment("short", Duration::from_secs(10)).await.unwrap();
        storage.increment("long", MINUTE).await.unwrap();
        assert_eq!(storage.len().await, 2);

        clock.advance(Duration::from_secs(30));
        assert_eq!(storage.len().await, 1);
        assert_eq!(storage.purge_expired().await, 1);
        assert_eq!(storage.purge_expired().await, 0);
        assert_eq!(storage.len().await, 1);
    }

    #[tokio::test]
    async fn test_shutdown_is_noop() {
        let storage = InMemoryThrottlerStorage::new();
        storage.shutdown().await;
        storage.shutdown().await;
        assert_eq!(storage.increment("k", MINUTE).await.unwrap().total_hits, 1);
    }
}
