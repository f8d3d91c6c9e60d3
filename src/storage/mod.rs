//! Persistence layer
//!
//! Every engine implements the same [`StorageEngine`] contract; the
//! [`worker`] module serializes all physical I/O for one backend instance
//! on a dedicated task so application threads never touch the underlying
//! connection or file handle.
//!
//! Engines:
//! - [`rocks`] - embedded RocksDB database
//! - [`postgres`] - pooled networked Postgres via sqlx
//! - [`json`] - per-account flat files

pub mod json;
pub mod postgres;
pub mod rocks;
pub mod worker;

pub use worker::{spawn_storage_worker, StorageHandle};

use crate::config::Config;
use crate::error::Result;
use crate::types::{Account, AccountId, BalanceSnapshot, LeaderboardEntry, TransactionEntry};
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Closed set of persistence engines, resolved once at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Embedded RocksDB database
    #[default]
    Rocks,
    /// Pooled Postgres via sqlx
    Postgres,
    /// Per-account flat JSON files
    Json,
}

impl BackendKind {
    /// Parse the configuration string form
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "rocks" | "rocksdb" => Some(BackendKind::Rocks),
            "postgres" | "postgresql" => Some(BackendKind::Postgres),
            "json" => Some(BackendKind::Json),
            _ => None,
        }
    }

    /// Display name for logging
    pub fn name(&self) -> &'static str {
        match self {
            BackendKind::Rocks => "rocksdb",
            BackendKind::Postgres => "postgres",
            BackendKind::Json => "json",
        }
    }
}

/// Uniform persistence contract implemented by every engine.
///
/// Engines are owned exclusively by their worker task, so methods take
/// `&mut self` and need not be `Sync`. The required operations must behave
/// identically across engines; the extension operations default to no-ops
/// for engines that cannot support them.
#[async_trait]
pub trait StorageEngine: Send {
    /// Engine display name for logging
    fn name(&self) -> &'static str;

    /// Idempotent schema/connection setup. Failure here aborts startup.
    async fn initialize(&mut self) -> Result<()>;

    /// Return the stored account, or create-and-persist one with the given
    /// starting balance if absent.
    async fn load_or_create(
        &mut self,
        id: AccountId,
        starting_balance: Decimal,
    ) -> Result<Account>;

    /// Full upsert of one account
    async fn save_account(&mut self, account: &Account) -> Result<()>;

    /// Batched upsert, a single underlying transaction where supported
    async fn save_all(&mut self, accounts: &[Account]) -> Result<()>;

    /// Full account table, used for startup warm-cache and migration
    async fn load_all(&mut self) -> Result<Vec<Account>>;

    /// Whether the account has stored data
    async fn exists(&mut self, id: AccountId) -> Result<bool>;

    /// Delete an account's stored data (explicit admin/erasure only)
    async fn delete(&mut self, id: AccountId) -> Result<()>;

    /// Append one transaction-log record, returning its assigned id
    async fn append_transaction(&mut self, entry: &TransactionEntry) -> Result<u64>;

    /// Most recent transactions touching the account, newest first
    async fn transactions_for(
        &mut self,
        id: AccountId,
        limit: usize,
    ) -> Result<Vec<TransactionEntry>>;

    /// Flush and release resources
    async fn shutdown(&mut self) -> Result<()>;

    // Extensions. Default implementations are no-ops so engines without
    // the capability still satisfy the contract.

    /// Stored display name for the account
    async fn name_of(&mut self, _id: AccountId) -> Result<Option<String>> {
        Ok(None)
    }

    /// Reverse lookup: account id by display name (case-insensitive)
    async fn id_by_name(&mut self, _name: &str) -> Result<Option<AccountId>> {
        Ok(None)
    }

    /// Update the stored display name
    async fn set_name(&mut self, _id: AccountId, _name: &str) -> Result<()> {
        Ok(())
    }

    /// All stored display names, used for cache warmup at startup
    async fn all_names(&mut self) -> Result<HashMap<AccountId, String>> {
        Ok(HashMap::new())
    }

    /// Display-preference flag (defaults to visible)
    async fn stats_visible(&mut self, _id: AccountId) -> Result<bool> {
        Ok(true)
    }

    /// Update the display-preference flag
    async fn set_stats_visible(&mut self, _id: AccountId, _visible: bool) -> Result<()> {
        Ok(())
    }

    /// Paginated top-N balances, descending
    async fn top_balances(
        &mut self,
        _limit: usize,
        _offset: usize,
    ) -> Result<Vec<LeaderboardEntry>> {
        Ok(Vec::new())
    }

    /// Paginated top-N by balance change versus the snapshot taken
    /// `days` days ago
    async fn top_trends(
        &mut self,
        _limit: usize,
        _offset: usize,
        _days: u32,
    ) -> Result<Vec<LeaderboardEntry>> {
        Ok(Vec::new())
    }

    /// Total stored accounts
    async fn count_accounts(&mut self) -> Result<u64> {
        Ok(0)
    }

    /// Accounts with a balance strictly greater than `amount`
    async fn count_richer_than(&mut self, _amount: Decimal) -> Result<u64> {
        Ok(0)
    }

    /// Idempotent upsert of daily balance snapshots, keyed (day, account)
    async fn save_snapshots(&mut self, _snapshots: &[BalanceSnapshot]) -> Result<()> {
        Ok(())
    }
}

/// Construct and initialize the engine selected by the configuration.
pub async fn open_engine(config: &Config) -> Result<Box<dyn StorageEngine>> {
    let mut engine: Box<dyn StorageEngine> = match config.storage.backend {
        BackendKind::Rocks => Box::new(rocks::RocksEngine::open(&config.storage.rocks)?),
        BackendKind::Postgres => {
            Box::new(postgres::PostgresEngine::connect(&config.storage.postgres).await?)
        }
        BackendKind::Json => Box::new(json::JsonEngine::new(&config.storage.json)),
    };

    engine.initialize().await?;
    tracing::info!(backend = engine.name(), "Storage engine initialized");
    Ok(engine)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_kind_parse() {
        assert_eq!(BackendKind::parse("rocksdb"), Some(BackendKind::Rocks));
        assert_eq!(BackendKind::parse("POSTGRES"), Some(BackendKind::Postgres));
        assert_eq!(BackendKind::parse("json"), Some(BackendKind::Json));
        assert_eq!(BackendKind::parse("mysql"), None);
    }
}
