use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Counter record - hit count and expiry of one throttled key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CounterRecord {
    pub key: String,
    pub total_hits: u64,
    pub expire_at: DateTime<Utc>,
}

impl CounterRecord {
    /// Create the first record of a window.
    pub fn new(key: impl Into<String>, now: DateTime<Utc>, ttl: Duration) -> Self {
        Self {
            key: key.into(),
            total_hits: 1,
            expire_at: expiry_after(now, ttl),
        }
    }

    /// Whether the window has elapsed at `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expire_at <= now
    }

    /// Register one more hit and push the expiry to `now + ttl`.
    ///
    /// The window restarts on every hit rather than being anchored to the first one.
    pub fn hit(&mut self, now: DateTime<Utc>, ttl: Duration) {
        self.total_hits = self.total_hits.saturating_add(1);
        self.expire_at = expiry_after(now, ttl);
    }

    /// Whole seconds left until expiry, never negative.
    pub fn time_to_expire(&self, now: DateTime<Utc>) -> u64 {
        let remaining = self.expire_at.signed_duration_since(now);
        remaining.num_seconds().max(0) as u64
    }

    /// Snapshot returned to the caller after an increment.
    pub fn to_storage_record(&self, now: DateTime<Utc>) -> StorageRecord {
        StorageRecord {
            total_hits: self.total_hits,
            time_to_expire: self.time_to_expire(now),
        }
    }
}

/// Result of an increment, as consumed by the rate-limiting guard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageRecord {
    /// Hits observed for the key in its current window, including this one.
    pub total_hits: u64,
    /// Seconds until the window expires.
    pub time_to_expire: u64,
}

/// `now + ttl` at millisecond precision, saturating at the far future.
pub fn expiry_after(now: DateTime<Utc>, ttl: Duration) -> DateTime<Utc> {
    let millis = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
    ChronoDuration::try_milliseconds(millis)
        .and_then(|delta| now.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn test_new_record_starts_at_one() {
        let record = CounterRecord::new("client-a", at(0), Duration::from_secs(60));
        assert_eq!(record.total_hits, 1);
        assert_eq!(record.expire_at, at(60));
        assert_eq!(record.time_to_expire(at(0)), 60);
    }

    #[test]
    fn test_hit_resets_window() {
        let ttl = Duration::from_secs(60);
        let mut record = CounterRecord::new("client-a", at(0), ttl);

        record.hit(at(50), ttl);
        assert_eq!(record.total_hits, 2);
        assert_eq!(record.expire_at, at(110));
        assert!(!record.is_expired(at(100)));
        assert!(record.is_expired(at(110)));
    }

    #[test]
    fn test_time_to_expire_floors_and_clamps() {
        let now = at(0);
        let record = CounterRecord {
            key: "k".to_string(),
            total_hits: 1,
            expire_at: now + ChronoDuration::milliseconds(59_999),
        };
        assert_eq!(record.time_to_expire(now), 59);

        // Clock skew between the write and the read-back.
        let stale = CounterRecord {
            expire_at: now - ChronoDuration::milliseconds(1_500),
            ..record
        };
        assert_eq!(stale.time_to_expire(now), 0);
    }

    #[test]
    fn test_expiry_after_keeps_milliseconds() {
        let expiry = expiry_after(at(0), Duration::from_millis(1_250));
        assert_eq!(expiry, at(0) + ChronoDuration::milliseconds(1_250));
    }

    #[test]
    fn test_expiry_after_saturates() {
        assert_eq!(
            expiry_after(at(0), Duration::MAX),
            DateTime::<Utc>::MAX_UTC
        );
    }

    #[test]
    fn test_storage_record_serializes_camel_case() {
        let record = StorageRecord {
            total_hits: 2,
            time_to_expire: 60,
        };
        let json = serde_json::to_value(record).unwrap();
        assert_eq!(json, serde_json::json!({ "totalHits": 2, "timeToExpire": 60 }));
    }
}
