//! Dedicated I/O worker per backend instance
//!
//! One task owns the engine and processes requests from a bounded mailbox,
//! so concurrent application threads never race on the underlying
//! connection or file handle and callers are never blocked synchronously.
//! Durable-write callers (`save_account`, `save_all`) get their reply once
//! the write completes; transaction-log appends are enqueued without a
//! reply channel, making the log eventually consistent with memory.

use crate::error::{Error, Result};
use crate::storage::StorageEngine;
use crate::types::{Account, AccountId, BalanceSnapshot, LeaderboardEntry, TransactionEntry};
use rust_decimal::Decimal;
use std::collections::HashMap;
use tokio::sync::{mpsc, oneshot};

/// Message sent to the storage worker
pub enum StorageMessage {
    /// Load an account, creating and persisting a default if absent
    LoadOrCreate {
        id: AccountId,
        starting_balance: Decimal,
        response: oneshot::Sender<Result<Account>>,
    },

    /// Upsert one account
    Save {
        account: Box<Account>,
        response: oneshot::Sender<Result<()>>,
    },

    /// Batched upsert of dirty accounts
    SaveAll {
        accounts: Vec<Account>,
        response: oneshot::Sender<Result<()>>,
    },

    /// Full table load
    LoadAll {
        response: oneshot::Sender<Result<Vec<Account>>>,
    },

    /// Stored-data existence check
    Exists {
        id: AccountId,
        response: oneshot::Sender<Result<bool>>,
    },

    /// Delete stored data for an account
    Delete {
        id: AccountId,
        response: oneshot::Sender<Result<()>>,
    },

    /// Append a transaction-log record (no reply; fire-and-forget)
    AppendTransaction { entry: Box<TransactionEntry> },

    /// Recent transactions for an account
    TransactionsFor {
        id: AccountId,
        limit: usize,
        response: oneshot::Sender<Result<Vec<TransactionEntry>>>,
    },

    /// Stored display name lookup
    NameOf {
        id: AccountId,
        response: oneshot::Sender<Result<Option<String>>>,
    },

    /// Reverse display name lookup
    IdByName {
        name: String,
        response: oneshot::Sender<Result<Option<AccountId>>>,
    },

    /// Update stored display name (no reply; fire-and-forget)
    SetName { id: AccountId, name: String },

    /// All stored display names
    AllNames {
        response: oneshot::Sender<Result<HashMap<AccountId, String>>>,
    },

    /// Display-preference flag lookup
    StatsVisible {
        id: AccountId,
        response: oneshot::Sender<Result<bool>>,
    },

    /// Update display-preference flag
    SetStatsVisible {
        id: AccountId,
        visible: bool,
        response: oneshot::Sender<Result<()>>,
    },

    /// Paginated top balances
    TopBalances {
        limit: usize,
        offset: usize,
        response: oneshot::Sender<Result<Vec<LeaderboardEntry>>>,
    },

    /// Paginated top trends versus a snapshot day
    TopTrends {
        limit: usize,
        offset: usize,
        days: u32,
        response: oneshot::Sender<Result<Vec<LeaderboardEntry>>>,
    },

    /// Total stored accounts
    CountAccounts {
        response: oneshot::Sender<Result<u64>>,
    },

    /// Accounts with balance strictly greater than the given amount
    CountRicherThan {
        amount: Decimal,
        response: oneshot::Sender<Result<u64>>,
    },

    /// Idempotent daily snapshot upsert
    SaveSnapshots {
        snapshots: Vec<BalanceSnapshot>,
        response: oneshot::Sender<Result<()>>,
    },

    /// Flush, release resources, and stop the worker
    Shutdown {
        response: oneshot::Sender<Result<()>>,
    },
}

/// Worker task that owns the engine and drains the mailbox
struct StorageWorker {
    engine: Box<dyn StorageEngine>,
    mailbox: mpsc::Receiver<StorageMessage>,
}

impl StorageWorker {
    async fn run(mut self) {
        while let Some(msg) = self.mailbox.recv().await {
            match msg {
                StorageMessage::LoadOrCreate {
                    id,
                    starting_balance,
                    response,
                } => {
                    let result = self.engine.load_or_create(id, starting_balance).await;
                    let _ = response.send(result);
                }

                StorageMessage::Save { account, response } => {
                    let result = self.engine.save_account(&account).await;
                    let _ = response.send(result);
                }

                StorageMessage::SaveAll { accounts, response } => {
                    let result = self.engine.save_all(&accounts).await;
                    let _ = response.send(result);
                }

                StorageMessage::LoadAll { response } => {
                    let _ = response.send(self.engine.load_all().await);
                }

                StorageMessage::Exists { id, response } => {
                    let _ = response.send(self.engine.exists(id).await);
                }

                StorageMessage::Delete { id, response } => {
                    let _ = response.send(self.engine.delete(id).await);
                }

                StorageMessage::AppendTransaction { entry } => {
                    if let Err(e) = self.engine.append_transaction(&entry).await {
                        tracing::error!(kind = %entry.kind, "Failed to append transaction: {e}");
                    }
                }

                StorageMessage::TransactionsFor {
                    id,
                    limit,
                    response,
                } => {
                    let _ = response.send(self.engine.transactions_for(id, limit).await);
                }

                StorageMessage::NameOf { id, response } => {
                    let _ = response.send(self.engine.name_of(id).await);
                }

                StorageMessage::IdByName { name, response } => {
                    let _ = response.send(self.engine.id_by_name(&name).await);
                }

                StorageMessage::SetName { id, name } => {
                    if let Err(e) = self.engine.set_name(id, &name).await {
                        tracing::warn!(%id, "Failed to store display name: {e}");
                    }
                }

                StorageMessage::AllNames { response } => {
                    let _ = response.send(self.engine.all_names().await);
                }

                StorageMessage::StatsVisible { id, response } => {
                    let _ = response.send(self.engine.stats_visible(id).await);
                }

                StorageMessage::SetStatsVisible {
                    id,
                    visible,
                    response,
                } => {
                    let _ = response.send(self.engine.set_stats_visible(id, visible).await);
                }

                StorageMessage::TopBalances {
                    limit,
                    offset,
                    response,
                } => {
                    let _ = response.send(self.engine.top_balances(limit, offset).await);
                }

                StorageMessage::TopTrends {
                    limit,
                    offset,
                    days,
                    response,
                } => {
                    let _ = response.send(self.engine.top_trends(limit, offset, days).await);
                }

                StorageMessage::CountAccounts { response } => {
                    let _ = response.send(self.engine.count_accounts().await);
                }

                StorageMessage::CountRicherThan { amount, response } => {
                    let _ = response.send(self.engine.count_richer_than(amount).await);
                }

                StorageMessage::SaveSnapshots {
                    snapshots,
                    response,
                } => {
                    let _ = response.send(self.engine.save_snapshots(&snapshots).await);
                }

                StorageMessage::Shutdown { response } => {
                    let result = self.engine.shutdown().await;
                    let _ = response.send(result);
                    break;
                }
            }
        }

        tracing::debug!(engine = self.engine.name(), "Storage worker stopped");
    }
}

/// Cloneable handle for sending requests to the worker
#[derive(Clone)]
pub struct StorageHandle {
    sender: mpsc::Sender<StorageMessage>,
}

impl StorageHandle {
    async fn request<T>(
        &self,
        msg: StorageMessage,
        rx: oneshot::Receiver<Result<T>>,
    ) -> Result<T> {
        self.sender
            .send(msg)
            .await
            .map_err(|_| Error::Concurrency("Storage worker mailbox closed".to_string()))?;

        rx.await
            .map_err(|_| Error::Concurrency("Storage worker dropped response".to_string()))?
    }

    /// Load an account, creating and persisting a default if absent
    pub async fn load_or_create(
        &self,
        id: AccountId,
        starting_balance: Decimal,
    ) -> Result<Account> {
        let (tx, rx) = oneshot::channel();
        self.request(
            StorageMessage::LoadOrCreate {
                id,
                starting_balance,
                response: tx,
            },
            rx,
        )
        .await
    }

    /// Upsert one account; resolves once the write is durable
    pub async fn save_account(&self, account: Account) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.request(
            StorageMessage::Save {
                account: Box::new(account),
                response: tx,
            },
            rx,
        )
        .await
    }

    /// Batched upsert; resolves once the batch is durable
    pub async fn save_all(&self, accounts: Vec<Account>) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.request(StorageMessage::SaveAll { accounts, response: tx }, rx)
            .await
    }

    /// Full table load
    pub async fn load_all(&self) -> Result<Vec<Account>> {
        let (tx, rx) = oneshot::channel();
        self.request(StorageMessage::LoadAll { response: tx }, rx)
            .await
    }

    /// Stored-data existence check
    pub async fn exists(&self, id: AccountId) -> Result<bool> {
        let (tx, rx) = oneshot::channel();
        self.request(StorageMessage::Exists { id, response: tx }, rx)
            .await
    }

    /// Delete stored data for an account
    pub async fn delete(&self, id: AccountId) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.request(StorageMessage::Delete { id, response: tx }, rx)
            .await
    }

    /// Enqueue a transaction-log append. Resolves once enqueued, not once
    /// durable; the caller does not wait on physical I/O.
    pub async fn log_transaction(&self, entry: TransactionEntry) -> Result<()> {
        self.sender
            .send(StorageMessage::AppendTransaction {
                entry: Box::new(entry),
            })
            .await
            .map_err(|_| Error::Concurrency("Storage worker mailbox closed".to_string()))
    }

    /// Recent transactions for an account, newest first
    pub async fn transactions_for(
        &self,
        id: AccountId,
        limit: usize,
    ) -> Result<Vec<TransactionEntry>> {
        let (tx, rx) = oneshot::channel();
        self.request(
            StorageMessage::TransactionsFor {
                id,
                limit,
                response: tx,
            },
            rx,
        )
        .await
    }

    /// Stored display name lookup
    pub async fn name_of(&self, id: AccountId) -> Result<Option<String>> {
        let (tx, rx) = oneshot::channel();
        self.request(StorageMessage::NameOf { id, response: tx }, rx)
            .await
    }

    /// Reverse display name lookup (case-insensitive)
    pub async fn id_by_name(&self, name: impl Into<String>) -> Result<Option<AccountId>> {
        let (tx, rx) = oneshot::channel();
        self.request(
            StorageMessage::IdByName {
                name: name.into(),
                response: tx,
            },
            rx,
        )
        .await
    }

    /// Enqueue a display-name update (fire-and-forget)
    pub async fn set_name(&self, id: AccountId, name: impl Into<String>) -> Result<()> {
        self.sender
            .send(StorageMessage::SetName {
                id,
                name: name.into(),
            })
            .await
            .map_err(|_| Error::Concurrency("Storage worker mailbox closed".to_string()))
    }

    /// All stored display names
    pub async fn all_names(&self) -> Result<HashMap<AccountId, String>> {
        let (tx, rx) = oneshot::channel();
        self.request(StorageMessage::AllNames { response: tx }, rx)
            .await
    }

    /// Display-preference flag lookup
    pub async fn stats_visible(&self, id: AccountId) -> Result<bool> {
        let (tx, rx) = oneshot::channel();
        self.request(StorageMessage::StatsVisible { id, response: tx }, rx)
            .await
    }

    /// Update the display-preference flag
    pub async fn set_stats_visible(&self, id: AccountId, visible: bool) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.request(
            StorageMessage::SetStatsVisible {
                id,
                visible,
                response: tx,
            },
            rx,
        )
        .await
    }

    /// Paginated top balances from storage
    pub async fn top_balances(&self, limit: usize, offset: usize) -> Result<Vec<LeaderboardEntry>> {
        let (tx, rx) = oneshot::channel();
        self.request(
            StorageMessage::TopBalances {
                limit,
                offset,
                response: tx,
            },
            rx,
        )
        .await
    }

    /// Paginated top trends versus the snapshot taken `days` ago
    pub async fn top_trends(
        &self,
        limit: usize,
        offset: usize,
        days: u32,
    ) -> Result<Vec<LeaderboardEntry>> {
        let (tx, rx) = oneshot::channel();
        self.request(
            StorageMessage::TopTrends {
                limit,
                offset,
                days,
                response: tx,
            },
            rx,
        )
        .await
    }

    /// Total stored accounts
    pub async fn count_accounts(&self) -> Result<u64> {
        let (tx, rx) = oneshot::channel();
        self.request(StorageMessage::CountAccounts { response: tx }, rx)
            .await
    }

    /// Accounts with balance strictly greater than the given amount
    pub async fn count_richer_than(&self, amount: Decimal) -> Result<u64> {
        let (tx, rx) = oneshot::channel();
        self.request(StorageMessage::CountRicherThan { amount, response: tx }, rx)
            .await
    }

    /// Idempotent daily snapshot upsert
    pub async fn save_snapshots(&self, snapshots: Vec<BalanceSnapshot>) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.request(
            StorageMessage::SaveSnapshots {
                snapshots,
                response: tx,
            },
            rx,
        )
        .await
    }

    /// Flush, release engine resources, and stop the worker
    pub async fn shutdown(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.request(StorageMessage::Shutdown { response: tx }, rx)
            .await
    }
}

/// Spawn the storage worker and return its handle
pub fn spawn_storage_worker(engine: Box<dyn StorageEngine>) -> StorageHandle {
    let (tx, rx) = mpsc::channel(1000); // Bounded channel for backpressure
    let worker = StorageWorker {
        engine,
        mailbox: rx,
    };

    tokio::spawn(async move {
        worker.run().await;
    });

    StorageHandle { sender: tx }
}
