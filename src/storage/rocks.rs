//! Embedded RocksDB engine
//!
//! # Column Families
//!
//! - `accounts` - Account records (key: account uuid bytes)
//! - `transactions` - Append-only transaction log (key: big-endian id)
//! - `names` - Display-name forward and reverse index
//! - `snapshots` - Daily balance snapshots (key: iso-day || account uuid)

use crate::config::RocksConfig;
use crate::error::{Error, Result};
use crate::storage::StorageEngine;
use crate::types::{Account, AccountId, BalanceSnapshot, LeaderboardEntry, TransactionEntry};
use async_trait::async_trait;
use chrono::NaiveDate;
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, IteratorMode, Options, WriteBatch, DB};
use rust_decimal::Decimal;
use std::collections::HashMap;
use uuid::Uuid;

/// Column family names
const CF_ACCOUNTS: &str = "accounts";
const CF_TRANSACTIONS: &str = "transactions";
const CF_NAMES: &str = "names";
const CF_SNAPSHOTS: &str = "snapshots";

/// Name index key prefixes within `names`
const NAME_FORWARD: u8 = 0; // prefix || uuid -> name
const NAME_REVERSE: u8 = 1; // prefix || lowercase name -> uuid

/// Embedded RocksDB engine
pub struct RocksEngine {
    db: DB,
    next_tx_id: u64,
}

impl RocksEngine {
    /// Open or create the database
    pub fn open(config: &RocksConfig) -> Result<Self> {
        let path = &config.data_dir;
        std::fs::create_dir_all(path)?;

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);

        let cf_descriptors = vec![
            ColumnFamilyDescriptor::new(CF_ACCOUNTS, cf_options_lz4()),
            ColumnFamilyDescriptor::new(CF_TRANSACTIONS, cf_options_zstd()),
            ColumnFamilyDescriptor::new(CF_NAMES, cf_options_lz4()),
            ColumnFamilyDescriptor::new(CF_SNAPSHOTS, cf_options_zstd()),
        ];

        let db = DB::open_cf_descriptors(&db_opts, path, cf_descriptors)?;
        tracing::info!("Opened RocksDB at {:?}", path);

        Ok(Self { db, next_tx_id: 1 })
    }

    fn cf_handle(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| Error::Storage(format!("Column family {} not found", name)))
    }

    fn get_account(&self, id: AccountId) -> Result<Option<Account>> {
        let cf = self.cf_handle(CF_ACCOUNTS)?;
        match self.db.get_cf(cf, id.as_bytes())? {
            Some(value) => Ok(Some(bincode::deserialize(&value)?)),
            None => Ok(None),
        }
    }

    fn put_account(&self, batch: &mut WriteBatch, account: &Account) -> Result<()> {
        let cf = self.cf_handle(CF_ACCOUNTS)?;
        let value = bincode::serialize(account)?;
        batch.put_cf(cf, account.id.as_bytes(), &value);
        Ok(())
    }

    /// Resume the transaction-log sequence from the highest stored key
    fn seed_tx_sequence(&mut self) -> Result<()> {
        let last = {
            let cf = self.cf_handle(CF_TRANSACTIONS)?;
            let mut iter = self.db.iterator_cf(cf, IteratorMode::End);
            match iter.next() {
                Some(item) => {
                    let (key, _) = item?;
                    if key.len() == 8 {
                        u64::from_be_bytes(key[..8].try_into().unwrap_or([0u8; 8]))
                    } else {
                        0
                    }
                }
                None => 0,
            }
        };
        self.next_tx_id = last + 1;
        Ok(())
    }

    /// All accounts paired with their resolved display names
    fn accounts_with_names(&mut self) -> Result<Vec<(Account, Option<String>)>> {
        let cf = self.cf_handle(CF_ACCOUNTS)?;
        let mut rows = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (_, value) = item?;
            let account: Account = bincode::deserialize(&value)?;
            let name = self.forward_name(account.id)?;
            rows.push((account, name));
        }
        Ok(rows)
    }

    fn forward_name(&self, id: AccountId) -> Result<Option<String>> {
        let cf = self.cf_handle(CF_NAMES)?;
        match self.db.get_cf(cf, name_forward_key(id))? {
            Some(value) => Ok(Some(String::from_utf8_lossy(&value).into_owned())),
            None => Ok(None),
        }
    }

    fn snapshot_balance(&self, day: NaiveDate, id: AccountId) -> Result<Option<Decimal>> {
        let cf = self.cf_handle(CF_SNAPSHOTS)?;
        match self.db.get_cf(cf, snapshot_key(day, id))? {
            Some(value) => Ok(Some(bincode::deserialize(&value)?)),
            None => Ok(None),
        }
    }
}

fn cf_options_lz4() -> Options {
    let mut opts = Options::default();
    opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
    opts
}

fn cf_options_zstd() -> Options {
    let mut opts = Options::default();
    opts.set_compression_type(rocksdb::DBCompressionType::Zstd);
    opts
}

fn name_forward_key(id: AccountId) -> Vec<u8> {
    let mut key = vec![NAME_FORWARD];
    key.extend_from_slice(id.as_bytes());
    key
}

fn name_reverse_key(name: &str) -> Vec<u8> {
    let mut key = vec![NAME_REVERSE];
    key.extend_from_slice(name.to_lowercase().as_bytes());
    key
}

fn snapshot_key(day: NaiveDate, id: AccountId) -> Vec<u8> {
    // ISO day string keeps the per-day prefix fixed at 10 bytes
    let mut key = day.format("%Y-%m-%d").to_string().into_bytes();
    key.extend_from_slice(id.as_bytes());
    key
}

#[async_trait]
impl StorageEngine for RocksEngine {
    fn name(&self) -> &'static str {
        "rocksdb"
    }

    async fn initialize(&mut self) -> Result<()> {
        self.seed_tx_sequence()
    }

    async fn load_or_create(
        &mut self,
        id: AccountId,
        starting_balance: Decimal,
    ) -> Result<Account> {
        if let Some(account) = self.get_account(id)? {
            return Ok(account);
        }

        let account = Account::new(id, starting_balance);
        self.save_account(&account).await?;
        tracing::debug!(%id, "Created account record");
        Ok(account)
    }

    async fn save_account(&mut self, account: &Account) -> Result<()> {
        let mut batch = WriteBatch::default();
        self.put_account(&mut batch, account)?;
        self.db.write(batch)?;
        Ok(())
    }

    async fn save_all(&mut self, accounts: &[Account]) -> Result<()> {
        let mut batch = WriteBatch::default();
        for account in accounts {
            self.put_account(&mut batch, account)?;
        }
        self.db.write(batch)?;
        Ok(())
    }

    async fn load_all(&mut self) -> Result<Vec<Account>> {
        let cf = self.cf_handle(CF_ACCOUNTS)?;
        let mut accounts = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (_, value) = item?;
            accounts.push(bincode::deserialize(&value)?);
        }
        Ok(accounts)
    }

    async fn exists(&mut self, id: AccountId) -> Result<bool> {
        Ok(self.get_account(id)?.is_some())
    }

    async fn delete(&mut self, id: AccountId) -> Result<()> {
        let mut batch = WriteBatch::default();
        let cf_accounts = self.cf_handle(CF_ACCOUNTS)?;
        batch.delete_cf(cf_accounts, id.as_bytes());

        let cf_names = self.cf_handle(CF_NAMES)?;
        if let Some(name) = self.forward_name(id)? {
            batch.delete_cf(cf_names, name_reverse_key(&name));
        }
        batch.delete_cf(cf_names, name_forward_key(id));

        self.db.write(batch)?;
        Ok(())
    }

    async fn append_transaction(&mut self, entry: &TransactionEntry) -> Result<u64> {
        let cf = self.cf_handle(CF_TRANSACTIONS)?;
        let id = self.next_tx_id;

        let mut stored = entry.clone();
        stored.id = id;
        let value = bincode::serialize(&stored)?;

        self.db.put_cf(cf, id.to_be_bytes(), &value)?;
        self.next_tx_id += 1;
        Ok(id)
    }

    async fn transactions_for(
        &mut self,
        id: AccountId,
        limit: usize,
    ) -> Result<Vec<TransactionEntry>> {
        let cf = self.cf_handle(CF_TRANSACTIONS)?;
        let mut entries = Vec::new();

        // Newest first: ids are assigned in increasing order
        for item in self.db.iterator_cf(cf, IteratorMode::End) {
            let (_, value) = item?;
            let entry: TransactionEntry = bincode::deserialize(&value)?;
            if entry.source == Some(id) || entry.target == Some(id) {
                entries.push(entry);
                if entries.len() >= limit {
                    break;
                }
            }
        }

        Ok(entries)
    }

    async fn shutdown(&mut self) -> Result<()> {
        self.db.flush()?;
        tracing::info!("RocksDB flushed and closing");
        Ok(())
    }

    async fn name_of(&mut self, id: AccountId) -> Result<Option<String>> {
        self.forward_name(id)
    }

    async fn id_by_name(&mut self, name: &str) -> Result<Option<AccountId>> {
        let cf = self.cf_handle(CF_NAMES)?;
        match self.db.get_cf(cf, name_reverse_key(name))? {
            Some(value) => {
                let bytes: [u8; 16] = value
                    .as_slice()
                    .try_into()
                    .map_err(|_| Error::Storage("Corrupt name index entry".to_string()))?;
                Ok(Some(AccountId::new(Uuid::from_bytes(bytes))))
            }
            None => Ok(None),
        }
    }

    async fn set_name(&mut self, id: AccountId, name: &str) -> Result<()> {
        let cf = self.cf_handle(CF_NAMES)?;
        let mut batch = WriteBatch::default();

        // Drop the stale reverse entry when the name changes
        if let Some(old) = self.forward_name(id)? {
            if !old.eq_ignore_ascii_case(name) {
                batch.delete_cf(cf, name_reverse_key(&old));
            }
        }

        batch.put_cf(cf, name_forward_key(id), name.as_bytes());
        batch.put_cf(cf, name_reverse_key(name), id.as_bytes());
        self.db.write(batch)?;
        Ok(())
    }

    async fn all_names(&mut self) -> Result<HashMap<AccountId, String>> {
        let cf = self.cf_handle(CF_NAMES)?;
        let mut names = HashMap::new();

        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (key, value) = item?;
            if key.first() == Some(&NAME_FORWARD) && key.len() == 17 {
                let bytes: [u8; 16] = key[1..17]
                    .try_into()
                    .map_err(|_| Error::Storage("Corrupt name index entry".to_string()))?;
                names.insert(
                    AccountId::new(Uuid::from_bytes(bytes)),
                    String::from_utf8_lossy(&value).into_owned(),
                );
            }
        }

        Ok(names)
    }

    async fn stats_visible(&mut self, id: AccountId) -> Result<bool> {
        Ok(self.get_account(id)?.map_or(true, |a| a.stats_visible))
    }

    async fn set_stats_visible(&mut self, id: AccountId, visible: bool) -> Result<()> {
        if let Some(mut account) = self.get_account(id)? {
            account.stats_visible = visible;
            self.save_account(&account).await?;
        }
        Ok(())
    }

    async fn top_balances(&mut self, limit: usize, offset: usize) -> Result<Vec<LeaderboardEntry>> {
        let mut rows = self.accounts_with_names()?;
        rows.retain(|(a, _)| a.stats_visible);
        rows.sort_by(|(a, _), (b, _)| b.balance.cmp(&a.balance).then(a.id.cmp(&b.id)));

        Ok(rows
            .into_iter()
            .skip(offset)
            .take(limit)
            .map(|(account, name)| LeaderboardEntry {
                account: account.id,
                display_name: name,
                balance: account.balance,
                trend: Decimal::ZERO,
            })
            .collect())
    }

    async fn top_trends(
        &mut self,
        limit: usize,
        offset: usize,
        days: u32,
    ) -> Result<Vec<LeaderboardEntry>> {
        let reference_day = (chrono::Utc::now() - chrono::Duration::days(i64::from(days)))
            .date_naive();

        let mut rows = Vec::new();
        for (account, name) in self.accounts_with_names()? {
            if !account.stats_visible {
                continue;
            }
            // Missing snapshot counts as zero baseline, matching a fresh
            // account that did not exist on the reference day
            let baseline = self
                .snapshot_balance(reference_day, account.id)?
                .unwrap_or(Decimal::ZERO);
            rows.push(LeaderboardEntry {
                account: account.id,
                display_name: name,
                trend: account.balance - baseline,
                balance: account.balance,
            });
        }

        rows.sort_by(|a, b| b.trend.cmp(&a.trend).then(a.account.cmp(&b.account)));
        Ok(rows.into_iter().skip(offset).take(limit).collect())
    }

    async fn count_accounts(&mut self) -> Result<u64> {
        let cf = self.cf_handle(CF_ACCOUNTS)?;
        let mut count = 0u64;
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            item?;
            count += 1;
        }
        Ok(count)
    }

    async fn count_richer_than(&mut self, amount: Decimal) -> Result<u64> {
        let cf = self.cf_handle(CF_ACCOUNTS)?;
        let mut count = 0u64;
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (_, value) = item?;
            let account: Account = bincode::deserialize(&value)?;
            if account.balance > amount {
                count += 1;
            }
        }
        Ok(count)
    }

    async fn save_snapshots(&mut self, snapshots: &[BalanceSnapshot]) -> Result<()> {
        let cf = self.cf_handle(CF_SNAPSHOTS)?;
        let mut batch = WriteBatch::default();
        for snapshot in snapshots {
            let value = bincode::serialize(&snapshot.balance)?;
            batch.put_cf(cf, snapshot_key(snapshot.day, snapshot.account), &value);
        }
        self.db.write(batch)?;
        Ok(())
    }
}
