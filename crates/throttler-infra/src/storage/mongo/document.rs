//! Counter document layout and the atomic increment pipeline.

use chrono::{DateTime, Utc};
use mongodb::bson::{Bson, DateTime as BsonDateTime, Document, doc};
use mongodb::error::{Error as MongoError, ErrorKind, WriteFailure};

use throttler_core::domain::CounterRecord;
use throttler_core::StorageError;

pub(crate) const TOTAL_HITS: &str = "totalHits";
pub(crate) const EXPIRE_AT: &str = "expireAt";

const DUPLICATE_KEY_CODE: i32 = 11000;

pub(crate) fn to_bson_datetime(at: DateTime<Utc>) -> BsonDateTime {
    BsonDateTime::from_millis(at.timestamp_millis())
}

/// Single-stage update pipeline: restart the count if the stored window has
/// already elapsed (or the document is new), otherwise add one. The expiry is
/// pushed to `expire_at` in both cases.
pub(crate) fn increment_pipeline(now: DateTime<Utc>, expire_at: DateTime<Utc>) -> Vec<Document> {
    vec![doc! {
        "$set": {
            "totalHits": {
                "$cond": {
                    "if": { "$gt": ["$expireAt", to_bson_datetime(now)] },
                    "then": { "$add": ["$totalHits", 1] },
                    "else": 1,
                }
            },
            "expireAt": to_bson_datetime(expire_at),
        }
    }]
}

/// Read a counter document returned by the update.
pub(crate) fn parse_counter(key: &str, document: &Document) -> Result<CounterRecord, StorageError> {
    let total_hits = match document.get(TOTAL_HITS) {
        Some(Bson::Int32(hits)) if *hits >= 1 => *hits as u64,
        Some(Bson::Int64(hits)) if *hits >= 1 => *hits as u64,
        Some(Bson::Double(hits)) if *hits >= 1.0 && hits.fract() == 0.0 => *hits as u64,
        Some(other) => {
            return Err(StorageError::DataShape(format!(
                "`{TOTAL_HITS}` for key {key:?} is not a positive integer: {other}"
            )));
        }
        None => {
            return Err(StorageError::DataShape(format!(
                "`{TOTAL_HITS}` missing for key {key:?}"
            )));
        }
    };

    let expire_at = document.get_datetime(EXPIRE_AT).map_err(|e| {
        StorageError::DataShape(format!("`{EXPIRE_AT}` unusable for key {key:?}: {e}"))
    })?;
    let expire_at = DateTime::from_timestamp_millis(expire_at.timestamp_millis()).ok_or_else(
        || StorageError::DataShape(format!("`{EXPIRE_AT}` out of range for key {key:?}")),
    )?;

    Ok(CounterRecord {
        key: key.to_string(),
        total_hits,
        expire_at,
    })
}

/// Two first-hit upserts raced on the unique `key` index.
pub(crate) fn is_duplicate_key(error: &MongoError) -> bool {
    match error.kind.as_ref() {
        ErrorKind::Command(command) => command.code == DUPLICATE_KEY_CODE,
        ErrorKind::Write(WriteFailure::WriteError(write)) => write.code == DUPLICATE_KEY_CODE,
        _ => false,
    }
}

pub(crate) fn connectivity(error: MongoError) -> StorageError {
    StorageError::Connectivity(error.to_string())
}
