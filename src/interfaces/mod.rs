//! Abstract interfaces for engine components.
//!
//! The store trait defines the persistence contract: plain row access for
//! reads, and whole-operation methods for every multi-row mutation so each
//! backend can make them atomic.

pub mod store;

pub use store::{CommissionStore, StorageError};
