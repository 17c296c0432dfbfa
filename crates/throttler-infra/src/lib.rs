//! # Throttler Infrastructure
//!
//! Concrete implementations of the storage port defined in `throttler-core`.
//!
//! ## Feature Flags
//!
//! - `full` (default) - All features enabled
//! - `minimal` - No external dependencies, in-memory only
//! - `mongodb` - MongoDB counter storage with a TTL-indexed collection

pub mod storage;

// Re-exports - In-Memory
pub use storage::InMemoryThrottlerStorage;

// Re-exports - MongoDB
#[cfg(feature = "mongodb")]
pub use storage::{MongoConfig, MongoThrottlerStorage};
