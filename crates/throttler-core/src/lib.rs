//! # Throttler Core
//!
//! The domain layer of the throttler storage workspace.
//! This crate contains the counter model and the storage port, with zero
//! infrastructure dependencies.

pub mod domain;
pub mod error;
pub mod ports;

pub use domain::{CounterRecord, StorageRecord};
pub use error::StorageError;
