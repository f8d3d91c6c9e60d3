//! In-memory account table and balance mutations
//!
//! Accounts live in a concurrent map of per-account mutexes. A mutation
//! locks exactly the accounts it touches, commits in memory, marks them
//! dirty, and enqueues a transaction-log append; persistence of the
//! account record itself is deferred to the periodic dirty flush. Locks
//! are never held across storage I/O.

use crate::config::Config;
use crate::error::{Error, Result};
use crate::storage::StorageHandle;
use crate::types::{Account, AccountId, TransactionEntry, TransactionKind};
use chrono::Utc;
use dashmap::{DashMap, DashSet};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::sync::Arc;

/// Result of a completed transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferOutcome {
    /// Amount credited to the receiver
    pub amount: Decimal,
    /// Fee debited from the sender on top of the amount
    pub fee: Decimal,
    /// Sender balance after the transfer
    pub sender_balance: Decimal,
    /// Receiver balance after the transfer
    pub receiver_balance: Decimal,
}

/// Concurrent account table
pub struct Ledger {
    accounts: DashMap<AccountId, Arc<Mutex<Account>>>,
    dirty: DashSet<AccountId>,
    storage: StorageHandle,
    config: Arc<Config>,
}

impl Ledger {
    /// Create an empty ledger backed by the given storage worker
    pub fn new(storage: StorageHandle, config: Arc<Config>) -> Self {
        Self {
            accounts: DashMap::new(),
            dirty: DashSet::new(),
            storage,
            config,
        }
    }

    /// Seed the in-memory table from a bulk storage load
    pub fn warm(&self, accounts: Vec<Account>) {
        for account in accounts {
            self.accounts
                .entry(account.id)
                .or_insert_with(|| Arc::new(Mutex::new(account)));
        }
    }

    /// Number of accounts resident in memory
    pub fn resident_accounts(&self) -> usize {
        self.accounts.len()
    }

    /// The per-account cell, loading from storage on first touch.
    ///
    /// A storage read failure degrades to a fresh default account so the
    /// caller stays operational; the degraded account is marked dirty and
    /// written back by the next flush.
    async fn cell(&self, id: AccountId) -> Arc<Mutex<Account>> {
        if let Some(cell) = self.accounts.get(&id) {
            return cell.clone();
        }

        let account = match self
            .storage
            .load_or_create(id, self.config.starting_balance)
            .await
        {
            Ok(account) => account,
            Err(e) => {
                tracing::warn!(%id, "Account load failed, degrading to default: {e}");
                let mut fallback = Account::new(id, self.config.starting_balance);
                fallback.dirty = true;
                self.dirty.insert(id);
                fallback
            }
        };

        // Another task may have raced the load; entry() keeps one winner
        self.accounts
            .entry(id)
            .or_insert_with(|| Arc::new(Mutex::new(account)))
            .clone()
    }

    /// Load the account into memory if absent and return a copy
    pub async fn ensure_account(&self, id: AccountId) -> Result<Account> {
        let cell = self.cell(id).await;
        let account = cell.lock().clone();
        Ok(account)
    }

    /// Current balance, in-memory accounts only
    pub fn balance(&self, id: AccountId) -> Option<Decimal> {
        self.accounts.get(&id).map(|cell| cell.lock().balance)
    }

    /// Copy of the account record, in-memory accounts only
    pub fn account(&self, id: AccountId) -> Option<Account> {
        self.accounts.get(&id).map(|cell| cell.lock().clone())
    }

    /// Point-in-time copy of every resident account.
    ///
    /// Weakly consistent: concurrent writers may land between rows.
    pub fn all_accounts(&self) -> Vec<Account> {
        self.accounts
            .iter()
            .map(|entry| entry.value().lock().clone())
            .collect()
    }

    /// Credit an account. Returns the new balance.
    pub async fn deposit(
        &self,
        id: AccountId,
        amount: Decimal,
        reason: &str,
    ) -> Result<Decimal> {
        if amount <= Decimal::ZERO {
            return Err(Error::InvalidAmount(amount));
        }

        let cell = self.cell(id).await;
        let (new_balance, entry) = {
            let mut account = cell.lock();
            let attempted = account.balance + amount;
            if attempted > self.config.max_balance {
                return Err(Error::LimitExceeded {
                    attempted,
                    max: self.config.max_balance,
                });
            }

            account.balance = attempted;
            account.total_earned += amount;
            account.last_transaction = Utc::now();
            account.dirty = true;

            let entry = TransactionEntry::now(
                TransactionKind::Deposit,
                None,
                Some(id),
                amount,
                reason,
                account.display_name.clone(),
            );
            (account.balance, entry)
        };

        self.dirty.insert(id);
        self.log(entry).await;
        tracing::debug!(%id, %amount, %new_balance, "Deposit");
        Ok(new_balance)
    }

    /// Debit an account. Returns the new balance.
    pub async fn withdraw(
        &self,
        id: AccountId,
        amount: Decimal,
        reason: &str,
    ) -> Result<Decimal> {
        if amount <= Decimal::ZERO {
            return Err(Error::InvalidAmount(amount));
        }

        let cell = self.cell(id).await;
        let (new_balance, entry) = {
            let mut account = cell.lock();
            if account.balance < amount {
                return Err(Error::InsufficientFunds {
                    balance: account.balance,
                    required: amount,
                });
            }

            account.balance -= amount;
            account.total_spent += amount;
            account.last_transaction = Utc::now();
            account.dirty = true;

            let entry = TransactionEntry::now(
                TransactionKind::Withdraw,
                Some(id),
                None,
                amount,
                reason,
                account.display_name.clone(),
            );
            (account.balance, entry)
        };

        self.dirty.insert(id);
        self.log(entry).await;
        tracing::debug!(%id, %amount, %new_balance, "Withdrawal");
        Ok(new_balance)
    }

    /// Move funds between two accounts.
    ///
    /// The sender is debited `amount + fee` and the receiver credited
    /// exactly `amount`; the fee leaves circulation. Both account mutexes
    /// are acquired in ascending id order, and once both are held the
    /// transfer always commits.
    pub async fn transfer(
        &self,
        from: AccountId,
        to: AccountId,
        amount: Decimal,
        reason: &str,
    ) -> Result<TransferOutcome> {
        if amount <= Decimal::ZERO {
            return Err(Error::InvalidAmount(amount));
        }
        if amount < self.config.min_transaction {
            return Err(Error::BelowMinimum {
                amount,
                minimum: self.config.min_transaction,
            });
        }
        if from == to {
            return Err(Error::SameAccount);
        }

        let fee = amount * self.config.transfer_fee_rate;
        let total_debit = amount + fee;

        let from_cell = self.cell(from).await;
        let to_cell = self.cell(to).await;

        let (outcome, out_entry, in_entry) = {
            // Canonical ascending-id order prevents lock cycles
            let (mut first, mut second) = if from < to {
                (from_cell.lock(), to_cell.lock())
            } else {
                (to_cell.lock(), from_cell.lock())
            };
            let (sender, receiver) = if from < to {
                (&mut *first, &mut *second)
            } else {
                (&mut *second, &mut *first)
            };

            if sender.balance < total_debit {
                return Err(Error::InsufficientFunds {
                    balance: sender.balance,
                    required: total_debit,
                });
            }
            let attempted = receiver.balance + amount;
            if attempted > self.config.max_balance {
                return Err(Error::LimitExceeded {
                    attempted,
                    max: self.config.max_balance,
                });
            }

            let now = Utc::now();
            sender.balance -= total_debit;
            sender.total_spent += total_debit;
            sender.last_transaction = now;
            sender.dirty = true;

            receiver.balance = attempted;
            receiver.total_earned += amount;
            receiver.last_transaction = now;
            receiver.dirty = true;

            let out_reason = if fee > Decimal::ZERO {
                format!("{} [fee {}]", reason, fee)
            } else {
                reason.to_string()
            };
            let out_entry = TransactionEntry::now(
                TransactionKind::TransferOut,
                Some(from),
                Some(to),
                amount,
                out_reason,
                sender.display_name.clone(),
            );
            let in_entry = TransactionEntry::now(
                TransactionKind::TransferIn,
                Some(from),
                Some(to),
                amount,
                reason,
                receiver.display_name.clone(),
            );

            let outcome = TransferOutcome {
                amount,
                fee,
                sender_balance: sender.balance,
                receiver_balance: receiver.balance,
            };
            (outcome, out_entry, in_entry)
        };

        self.dirty.insert(from);
        self.dirty.insert(to);
        self.log(out_entry).await;
        self.log(in_entry).await;
        tracing::debug!(%from, %to, %amount, %fee, "Transfer");
        Ok(outcome)
    }

    /// Administrative overwrite. Lifetime counters are left untouched.
    pub async fn set_balance(
        &self,
        id: AccountId,
        amount: Decimal,
        reason: &str,
    ) -> Result<Decimal> {
        if amount < Decimal::ZERO {
            return Err(Error::InvalidAmount(amount));
        }
        let amount = amount.min(self.config.max_balance);

        let cell = self.cell(id).await;
        let entry = {
            let mut account = cell.lock();
            account.balance = amount;
            account.last_transaction = Utc::now();
            account.dirty = true;

            TransactionEntry::now(
                TransactionKind::AdminSet,
                None,
                Some(id),
                amount,
                reason,
                account.display_name.clone(),
            )
        };

        self.dirty.insert(id);
        self.log(entry).await;
        tracing::info!(%id, %amount, "Balance set administratively");
        Ok(amount)
    }

    /// Administrative reset to zero
    pub async fn reset_balance(&self, id: AccountId, reason: &str) -> Result<()> {
        let cell = self.cell(id).await;
        let entry = {
            let mut account = cell.lock();
            account.balance = Decimal::ZERO;
            account.last_transaction = Utc::now();
            account.dirty = true;

            TransactionEntry::now(
                TransactionKind::AdminReset,
                None,
                Some(id),
                Decimal::ZERO,
                reason,
                account.display_name.clone(),
            )
        };

        self.dirty.insert(id);
        self.log(entry).await;
        tracing::info!(%id, "Balance reset administratively");
        Ok(())
    }

    /// Cache a resolved display name on the in-memory account
    pub fn set_display_name(&self, id: AccountId, name: &str) {
        if let Some(cell) = self.accounts.get(&id) {
            let mut account = cell.lock();
            if account.display_name.as_deref() != Some(name) {
                account.display_name = Some(name.to_string());
                account.dirty = true;
                drop(account);
                self.dirty.insert(id);
            }
        }
    }

    /// Erase an account from memory and storage (explicit admin/erasure
    /// only; normal operation never deletes)
    pub async fn delete_account(&self, id: AccountId) -> Result<()> {
        let resident = self.accounts.remove(&id).is_some();
        self.dirty.remove(&id);

        if !resident && !self.storage.exists(id).await? {
            return Err(Error::AccountNotFound(id));
        }

        self.storage.delete(id).await?;
        tracing::info!(%id, "Account erased");
        Ok(())
    }

    /// Recent transactions for an account, newest first
    pub async fn transaction_history(
        &self,
        id: AccountId,
        limit: usize,
    ) -> Result<Vec<TransactionEntry>> {
        self.storage.transactions_for(id, limit).await
    }

    /// Persist every dirty account in one batch. Returns the batch size.
    ///
    /// A failed batch leaves the accounts marked dirty so the next flush
    /// retries them.
    pub async fn flush_dirty(&self) -> Result<usize> {
        let ids: Vec<AccountId> = self.dirty.iter().map(|id| *id).collect();
        if ids.is_empty() {
            return Ok(0);
        }

        let mut batch = Vec::with_capacity(ids.len());
        for id in &ids {
            // Unmark before taking the lock: a writer that re-marks the
            // account from here on is kept for the next cycle instead of
            // being erased by a removal that races its insert
            self.dirty.remove(id);
            if let Some(cell) = self.accounts.get(id) {
                let mut account = cell.lock();
                account.dirty = false;
                batch.push(account.clone());
            }
        }

        let size = batch.len();
        if let Err(e) = self.storage.save_all(batch).await {
            for id in ids {
                if let Some(cell) = self.accounts.get(&id) {
                    cell.lock().dirty = true;
                }
                self.dirty.insert(id);
            }
            return Err(e);
        }

        tracing::debug!(accounts = size, "Flushed dirty accounts");
        Ok(size)
    }

    /// Number of accounts awaiting persistence
    pub fn dirty_count(&self) -> usize {
        self.dirty.len()
    }

    async fn log(&self, entry: TransactionEntry) {
        if let Err(e) = self.storage.log_transaction(entry).await {
            tracing::warn!("Transaction log enqueue failed: {e}");
        }
    }
}
