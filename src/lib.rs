//! Multi-level referral commission engine.
//!
//! Affiliates form a referral forest; verified sales distribute capped,
//! level-weighted commissions up the chain; a ledger tracks pending and
//! released balances per affiliate. The engine is storage-agnostic:
//! SQLite and PostgreSQL backends are feature-gated, and an in-memory
//! store is always available for tests and embedding.
//!
//! ```no_run
//! use affiliate_engine::config::Config;
//! use affiliate_engine::storage::init_storage;
//! use affiliate_engine::CommissionEngine;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::load()?;
//! let store = init_storage(&config.storage).await?;
//! let engine = CommissionEngine::with_config(store, config.referral);
//! let affiliate = engine.enroll_affiliate(None).await?;
//! println!("referral code: {}", affiliate.referral_code);
//! # Ok(())
//! # }
//! ```

pub mod bootstrap;
pub mod codes;
pub mod config;
pub mod distributor;
pub mod error;
pub mod graph;
pub mod interfaces;
pub mod lifecycle;
pub mod storage;
pub mod types;

pub use error::{EngineError, ErrorKind, Result};
pub use lifecycle::CommissionEngine;
