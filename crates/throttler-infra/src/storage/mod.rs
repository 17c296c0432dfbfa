//! Throttler storage implementations - MongoDB and in-memory fallback.

mod memory;

pub use memory::InMemoryThrottlerStorage;

#[cfg(feature = "mongodb")]
mod mongo;
#[cfg(feature = "mongodb")]
pub use mongo::{DEFAULT_COLLECTION, MongoConfig, MongoThrottlerStorage};
