//! Economy Core
//!
//! In-process economy ledger: concurrency-safe per-account balances,
//! pluggable storage engines, rate-limited writes, and TTL-cached
//! statistics.
//!
//! # Architecture
//!
//! - **In-memory authority**: balances live in a concurrent account table;
//!   mutations commit under per-account locks and are persisted
//!   asynchronously
//! - **Single I/O writer**: one worker task owns the storage engine, so
//!   engines never see concurrent access
//! - **Pluggable persistence**: RocksDB, Postgres, or flat JSON files
//!   behind one [`storage::StorageEngine`] contract
//! - **Explicit lifecycle**: [`Economy::open`] to [`Economy::shutdown`],
//!   no global instance
//!
//! # Invariants
//!
//! - `0 <= balance <= max_balance` at every observable point
//! - Lifetime earned/spent counters never decrease (admin overwrites
//!   bypass them)
//! - Transfers are atomic: no interleaving observes a partial move
//! - The transaction log is append-only

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

pub mod config;
pub mod error;
pub mod facade;
pub mod ledger;
pub mod metrics;
pub mod names;
pub mod ratelimit;
pub mod stats;
pub mod storage;
pub mod types;

// Re-exports
pub use config::Config;
pub use error::{Error, Result};
pub use facade::Economy;
pub use ledger::{Ledger, TransferOutcome};
pub use names::{NameResolver, NameService};
pub use ratelimit::RateLimiter;
pub use stats::Statistics;
pub use storage::{BackendKind, StorageEngine};
pub use types::{
    Account, AccountId, BalanceSnapshot, LeaderboardEntry, TransactionEntry, TransactionKind,
};
