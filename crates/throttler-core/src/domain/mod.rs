//! Domain entities - the counter records a storage backend persists.

mod counter;

pub use counter::{CounterRecord, StorageRecord, expiry_after};
