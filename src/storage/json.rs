//! Flat-file JSON engine
//!
//! Layout under the data directory:
//!
//! - `accounts/<uuid>.json` - one file per account
//! - `transactions.log` - transaction log, one JSON object per line
//! - `snapshots/<day>.json` - balance map for one calendar day
//! - `names.json` - display-name map
//!
//! Account and snapshot writes go through a temp file and rename so a
//! crash never leaves a half-written record behind.

use crate::config::JsonConfig;
use crate::error::{Error, Result};
use crate::storage::StorageEngine;
use crate::types::{Account, AccountId, BalanceSnapshot, LeaderboardEntry, TransactionEntry};
use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Flat-file JSON engine
pub struct JsonEngine {
    root: PathBuf,
    names: HashMap<AccountId, String>,
    next_tx_id: u64,
}

impl JsonEngine {
    /// Create an engine rooted at the configured directory
    pub fn new(config: &JsonConfig) -> Self {
        Self {
            root: config.data_dir.clone(),
            names: HashMap::new(),
            next_tx_id: 1,
        }
    }

    fn accounts_dir(&self) -> PathBuf {
        self.root.join("accounts")
    }

    fn snapshots_dir(&self) -> PathBuf {
        self.root.join("snapshots")
    }

    fn account_path(&self, id: AccountId) -> PathBuf {
        self.accounts_dir().join(format!("{}.json", id))
    }

    fn log_path(&self) -> PathBuf {
        self.root.join("transactions.log")
    }

    fn names_path(&self) -> PathBuf {
        self.root.join("names.json")
    }

    fn snapshot_path(&self, day: NaiveDate) -> PathBuf {
        self.snapshots_dir()
            .join(format!("{}.json", day.format("%Y-%m-%d")))
    }

    fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, bytes)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    fn read_account(&self, id: AccountId) -> Result<Option<Account>> {
        let path = self.account_path(id);
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(path)?;
        Ok(Some(serde_json::from_str(&content)?))
    }

    fn write_account(&self, account: &Account) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(account)?;
        Self::write_atomic(&self.account_path(account.id), &bytes)
    }

    fn persist_names(&self) -> Result<()> {
        let by_uuid: HashMap<Uuid, &String> = self
            .names
            .iter()
            .map(|(id, name)| (id.as_uuid(), name))
            .collect();
        let bytes = serde_json::to_vec_pretty(&by_uuid)?;
        Self::write_atomic(&self.names_path(), &bytes)
    }

    fn read_log(&self) -> Result<Vec<TransactionEntry>> {
        let path = self.log_path();
        if !path.exists() {
            return Ok(Vec::new());
        }
        let content = std::fs::read_to_string(path)?;
        content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| serde_json::from_str(line).map_err(Error::from))
            .collect()
    }

    fn read_snapshot(&self, day: NaiveDate) -> Result<HashMap<Uuid, Decimal>> {
        let path = self.snapshot_path(day);
        if !path.exists() {
            return Ok(HashMap::new());
        }
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }
}

#[async_trait]
impl StorageEngine for JsonEngine {
    fn name(&self) -> &'static str {
        "json"
    }

    async fn initialize(&mut self) -> Result<()> {
        std::fs::create_dir_all(self.accounts_dir())?;
        std::fs::create_dir_all(self.snapshots_dir())?;

        if self.names_path().exists() {
            let content = std::fs::read_to_string(self.names_path())?;
            let by_uuid: HashMap<Uuid, String> = serde_json::from_str(&content)?;
            self.names = by_uuid
                .into_iter()
                .map(|(uuid, name)| (AccountId::new(uuid), name))
                .collect();
        }

        // Resume the log sequence from the last stored entry
        if let Some(last) = self.read_log()?.last() {
            self.next_tx_id = last.id + 1;
        }

        tracing::info!("JSON storage ready at {:?}", self.root);
        Ok(())
    }

    async fn load_or_create(
        &mut self,
        id: AccountId,
        starting_balance: Decimal,
    ) -> Result<Account> {
        if let Some(account) = self.read_account(id)? {
            return Ok(account);
        }

        let account = Account::new(id, starting_balance);
        self.write_account(&account)?;
        tracing::debug!(%id, "Created account file");
        Ok(account)
    }

    async fn save_account(&mut self, account: &Account) -> Result<()> {
        self.write_account(account)
    }

    async fn save_all(&mut self, accounts: &[Account]) -> Result<()> {
        for account in accounts {
            self.write_account(account)?;
        }
        Ok(())
    }

    async fn load_all(&mut self) -> Result<Vec<Account>> {
        let mut accounts = Vec::new();
        for entry in std::fs::read_dir(self.accounts_dir())? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                let content = std::fs::read_to_string(&path)?;
                accounts.push(serde_json::from_str(&content)?);
            }
        }
        Ok(accounts)
    }

    async fn exists(&mut self, id: AccountId) -> Result<bool> {
        Ok(self.account_path(id).exists())
    }

    async fn delete(&mut self, id: AccountId) -> Result<()> {
        let path = self.account_path(id);
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        if self.names.remove(&id).is_some() {
            self.persist_names()?;
        }
        Ok(())
    }

    async fn append_transaction(&mut self, entry: &TransactionEntry) -> Result<u64> {
        let id = self.next_tx_id;
        let mut stored = entry.clone();
        stored.id = id;

        let mut line = serde_json::to_string(&stored)?;
        line.push('\n');

        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.log_path())?;
        file.write_all(line.as_bytes())?;

        self.next_tx_id += 1;
        Ok(id)
    }

    async fn transactions_for(
        &mut self,
        id: AccountId,
        limit: usize,
    ) -> Result<Vec<TransactionEntry>> {
        let mut entries: Vec<TransactionEntry> = self
            .read_log()?
            .into_iter()
            .filter(|e| e.source == Some(id) || e.target == Some(id))
            .collect();
        entries.reverse();
        entries.truncate(limit);
        Ok(entries)
    }

    async fn shutdown(&mut self) -> Result<()> {
        self.persist_names()
    }

    async fn name_of(&mut self, id: AccountId) -> Result<Option<String>> {
        Ok(self.names.get(&id).cloned())
    }

    async fn id_by_name(&mut self, name: &str) -> Result<Option<AccountId>> {
        Ok(self
            .names
            .iter()
            .find(|(_, n)| n.eq_ignore_ascii_case(name))
            .map(|(id, _)| *id))
    }

    async fn set_name(&mut self, id: AccountId, name: &str) -> Result<()> {
        self.names.insert(id, name.to_string());
        self.persist_names()
    }

    async fn all_names(&mut self) -> Result<HashMap<AccountId, String>> {
        Ok(self.names.clone())
    }

    async fn stats_visible(&mut self, id: AccountId) -> Result<bool> {
        Ok(self.read_account(id)?.map_or(true, |a| a.stats_visible))
    }

    async fn set_stats_visible(&mut self, id: AccountId, visible: bool) -> Result<()> {
        if let Some(mut account) = self.read_account(id)? {
            account.stats_visible = visible;
            self.write_account(&account)?;
        }
        Ok(())
    }

    async fn top_balances(&mut self, limit: usize, offset: usize) -> Result<Vec<LeaderboardEntry>> {
        let mut accounts = self.load_all().await?;
        accounts.retain(|a| a.stats_visible);
        accounts.sort_by(|a, b| b.balance.cmp(&a.balance).then(a.id.cmp(&b.id)));

        Ok(accounts
            .into_iter()
            .skip(offset)
            .take(limit)
            .map(|a| LeaderboardEntry {
                display_name: self.names.get(&a.id).cloned(),
                account: a.id,
                balance: a.balance,
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
        let reference_day =
            (chrono::Utc::now() - chrono::Duration::days(i64::from(days))).date_naive();
        let snapshot = self.read_snapshot(reference_day)?;

        let mut rows: Vec<LeaderboardEntry> = self
            .load_all()
            .await?
            .into_iter()
            .filter(|a| a.stats_visible)
            .map(|a| {
                let baseline = snapshot
                    .get(&a.id.as_uuid())
                    .copied()
                    .unwrap_or(Decimal::ZERO);
                LeaderboardEntry {
                    display_name: self.names.get(&a.id).cloned(),
                    account: a.id,
                    trend: a.balance - baseline,
                    balance: a.balance,
                }
            })
            .collect();

        rows.sort_by(|a, b| b.trend.cmp(&a.trend).then(a.account.cmp(&b.account)));
        Ok(rows.into_iter().skip(offset).take(limit).collect())
    }

    async fn count_accounts(&mut self) -> Result<u64> {
        Ok(self.load_all().await?.len() as u64)
    }

    async fn count_richer_than(&mut self, amount: Decimal) -> Result<u64> {
        Ok(self
            .load_all()
            .await?
            .iter()
            .filter(|a| a.balance > amount)
            .count() as u64)
    }

    async fn save_snapshots(&mut self, snapshots: &[BalanceSnapshot]) -> Result<()> {
        // Merge with any existing capture per day (idempotent upsert)
        let mut by_day: HashMap<NaiveDate, Vec<&BalanceSnapshot>> = HashMap::new();
        for snapshot in snapshots {
            by_day.entry(snapshot.day).or_default().push(snapshot);
        }

        for (day, entries) in by_day {
            let mut stored = self.read_snapshot(day)?;
            for entry in entries {
                stored.insert(entry.account.as_uuid(), entry.balance);
            }
            let bytes = serde_json::to_vec_pretty(&stored)?;
            Self::write_atomic(&self.snapshot_path(day), &bytes)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TransactionKind;
    use tempfile::TempDir;

    async fn test_engine() -> (JsonEngine, TempDir) {
        let temp = TempDir::new().unwrap();
        let config = JsonConfig {
            data_dir: temp.path().to_path_buf(),
        };
        let mut engine = JsonEngine::new(&config);
        engine.initialize().await.unwrap();
        (engine, temp)
    }

    #[tokio::test]
    async fn test_account_files_roundtrip() {
        let (mut engine, _temp) = test_engine().await;
        let id = AccountId::random();

        let mut account = engine.load_or_create(id, Decimal::new(100, 0)).await.unwrap();
        account.balance = Decimal::new(250, 0);
        engine.save_account(&account).await.unwrap();

        let reloaded = engine.load_or_create(id, Decimal::ZERO).await.unwrap();
        assert_eq!(reloaded.balance, Decimal::new(250, 0));

        engine.delete(id).await.unwrap();
        assert!(!engine.exists(id).await.unwrap());
    }

    #[tokio::test]
    async fn test_log_sequence_survives_reopen() {
        let temp = TempDir::new().unwrap();
        let config = JsonConfig {
            data_dir: temp.path().to_path_buf(),
        };
        let id = AccountId::random();
        let entry = TransactionEntry::now(
            TransactionKind::Deposit,
            None,
            Some(id),
            Decimal::new(5, 0),
            "seed",
            None,
        );

        {
            let mut engine = JsonEngine::new(&config);
            engine.initialize().await.unwrap();
            assert_eq!(engine.append_transaction(&entry).await.unwrap(), 1);
            assert_eq!(engine.append_transaction(&entry).await.unwrap(), 2);
        }

        let mut engine = JsonEngine::new(&config);
        engine.initialize().await.unwrap();
        assert_eq!(engine.append_transaction(&entry).await.unwrap(), 3);

        let history = engine.transactions_for(id, 10).await.unwrap();
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].id, 3);
    }

    #[tokio::test]
    async fn test_names_persist_across_reopen() {
        let temp = TempDir::new().unwrap();
        let config = JsonConfig {
            data_dir: temp.path().to_path_buf(),
        };
        let id = AccountId::random();

        {
            let mut engine = JsonEngine::new(&config);
            engine.initialize().await.unwrap();
            engine.set_name(id, "Carol").await.unwrap();
        }

        let mut engine = JsonEngine::new(&config);
        engine.initialize().await.unwrap();
        assert_eq!(engine.name_of(id).await.unwrap().as_deref(), Some("Carol"));
        assert_eq!(engine.id_by_name("carol").await.unwrap(), Some(id));
    }

    #[tokio::test]
    async fn test_snapshot_merge_is_idempotent() {
        let (mut engine, _temp) = test_engine().await;
        let a = AccountId::random();
        let b = AccountId::random();
        let day = chrono::Utc::now().date_naive();

        let capture = |account, balance| BalanceSnapshot {
            day,
            account,
            balance: Decimal::new(balance, 0),
        };
        engine.save_snapshots(&[capture(a, 10)]).await.unwrap();
        engine
            .save_snapshots(&[capture(a, 20), capture(b, 5)])
            .await
            .unwrap();

        let snapshot = engine.read_snapshot(day).unwrap();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot.get(&a.as_uuid()), Some(&Decimal::new(20, 0)));
    }

    #[tokio::test]
    async fn test_top_balances_sorted_desc() {
        let (mut engine, _temp) = test_engine().await;

        for balance in [300, 100, 200] {
            let account = Account::new(AccountId::random(), Decimal::new(balance, 0));
            engine.save_account(&account).await.unwrap();
        }

        let top = engine.top_balances(2, 0).await.unwrap();
        assert_eq!(top.len(), 2);
        assert_eq!(top[0].balance, Decimal::new(300, 0));
        assert_eq!(top[1].balance, Decimal::new(200, 0));
    }
}
