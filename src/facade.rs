//! Economy service object
//!
//! [`Economy`] owns the whole subsystem: the storage worker, the in-memory
//! ledger, the rate limiter, statistics, name resolution, metrics, and the
//! background autosave and snapshot jobs. It is constructed explicitly via
//! [`Economy::open`] and torn down via [`Economy::shutdown`]; there is no
//! global instance.

use crate::config::Config;
use crate::error::{Error, Result};
use crate::ledger::{Ledger, TransferOutcome};
use crate::metrics::Metrics;
use crate::names::{NameResolver, NameService};
use crate::ratelimit::RateLimiter;
use crate::stats::Statistics;
use crate::storage::{open_engine, spawn_storage_worker, StorageHandle};
use crate::types::{Account, AccountId, BalanceSnapshot, LeaderboardEntry, TransactionEntry};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Bound on the final flush at shutdown
const SHUTDOWN_FLUSH_TIMEOUT: Duration = Duration::from_secs(10);

/// Write operations cost one token each
const WRITE_COST: f64 = 1.0;

/// The economy subsystem
pub struct Economy {
    config: Arc<Config>,
    storage: StorageHandle,
    ledger: Arc<Ledger>,
    limiter: RateLimiter,
    stats: Statistics,
    names: Arc<NameService>,
    metrics: Metrics,
    shutdown_tx: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Economy {
    /// Bring the subsystem up.
    ///
    /// The only fatal condition is the selected backend failing to
    /// initialize; warm-cache and name-cache failures degrade with a
    /// warning.
    pub async fn open(config: Config) -> Result<Self> {
        config.validate()?;
        let config = Arc::new(config);

        let engine = open_engine(&config).await?;
        let storage = spawn_storage_worker(engine);

        let metrics = Metrics::new()
            .map_err(|e| Error::Config(format!("Metrics registration failed: {}", e)))?;

        let ledger = Arc::new(Ledger::new(storage.clone(), config.clone()));
        match storage.load_all().await {
            Ok(accounts) => ledger.warm(accounts),
            Err(e) => tracing::warn!("Warm-cache load failed, starting cold: {e}"),
        }
        metrics.accounts.set(ledger.resident_accounts() as i64);

        let names = Arc::new(NameService::new(storage.clone()));
        if let Err(e) = names.warmup().await {
            tracing::warn!("Name cache warmup failed: {e}");
        }

        let stats = Statistics::new(ledger.clone(), storage.clone());
        let limiter = RateLimiter::new(
            config.rate_limit.burst,
            config.rate_limit.refill_per_sec,
        );

        let (shutdown_tx, _) = watch::channel(false);
        let economy = Self {
            config,
            storage,
            ledger,
            limiter,
            stats,
            names,
            metrics,
            shutdown_tx,
            tasks: Mutex::new(Vec::new()),
        };
        economy.spawn_autosave();
        economy.spawn_snapshot_job();

        tracing::info!(
            accounts = economy.ledger.resident_accounts(),
            "Economy started"
        );
        Ok(economy)
    }

    fn spawn_autosave(&self) {
        let ledger = self.ledger.clone();
        let metrics = self.metrics.clone();
        let period = Duration::from_secs(self.config.autosave_interval_secs.max(1));
        let mut shutdown = self.shutdown_tx.subscribe();

        let handle = tokio::spawn(async move {
            let mut tick = tokio::time::interval(period);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            tick.tick().await; // immediate first tick
            loop {
                tokio::select! {
                    _ = tick.tick() => {
                        match ledger.flush_dirty().await {
                            Ok(0) => {}
                            Ok(n) => metrics.record_autosave(n),
                            Err(e) => tracing::error!("Autosave failed, will retry: {e}"),
                        }
                    }
                    _ = shutdown.changed() => break,
                }
            }
        });
        self.tasks.lock().push(handle);
    }

    fn spawn_snapshot_job(&self) {
        let ledger = self.ledger.clone();
        let storage = self.storage.clone();
        let period = Duration::from_secs(self.config.snapshot_interval_secs.max(1));
        let mut shutdown = self.shutdown_tx.subscribe();

        let handle = tokio::spawn(async move {
            let mut tick = tokio::time::interval(period);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            tick.tick().await;
            loop {
                tokio::select! {
                    _ = tick.tick() => {
                        let day = chrono::Utc::now().date_naive();
                        let snapshots: Vec<BalanceSnapshot> = ledger
                            .all_accounts()
                            .into_iter()
                            .map(|a| BalanceSnapshot { day, account: a.id, balance: a.balance })
                            .collect();
                        let count = snapshots.len();
                        match storage.save_snapshots(snapshots).await {
                            Ok(()) => tracing::info!(%day, accounts = count, "Balance snapshot captured"),
                            Err(e) => tracing::error!("Snapshot capture failed: {e}"),
                        }
                    }
                    _ = shutdown.changed() => break,
                }
            }
        });
        self.tasks.lock().push(handle);
    }

    /// Stop background jobs, flush dirty state with a bounded wait, and
    /// shut the storage worker down
    pub async fn shutdown(&self) -> Result<()> {
        let _ = self.shutdown_tx.send(true);
        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().drain(..).collect();
        for task in tasks {
            let _ = task.await;
        }

        match tokio::time::timeout(SHUTDOWN_FLUSH_TIMEOUT, self.ledger.flush_dirty()).await {
            Ok(Ok(n)) if n > 0 => tracing::info!(accounts = n, "Final flush complete"),
            Ok(Ok(_)) => {}
            Ok(Err(e)) => tracing::error!("Final flush failed: {e}"),
            Err(_) => tracing::error!("Final flush timed out"),
        }

        self.storage.shutdown().await?;
        tracing::info!("Economy stopped");
        Ok(())
    }

    // Write path. Every operation debits the acting account's token
    // bucket first.

    fn gate(&self, actor: AccountId) -> Result<()> {
        self.limiter.consume(actor, WRITE_COST).map_err(|e| {
            self.metrics.rate_limited_total.inc();
            e
        })
    }

    /// Load or create the account
    pub async fn ensure_account(&self, id: AccountId) -> Result<Account> {
        self.gate(id)?;
        let before = self.ledger.resident_accounts();
        let account = self.ledger.ensure_account(id).await?;
        if self.ledger.resident_accounts() > before {
            self.metrics.accounts.set(self.ledger.resident_accounts() as i64);
        }
        Ok(account)
    }

    /// Credit an account. Returns the new balance.
    pub async fn deposit(&self, id: AccountId, amount: Decimal, reason: &str) -> Result<Decimal> {
        self.gate(id)?;
        let balance = self.ledger.deposit(id, amount, reason).await?;
        self.metrics.deposits_total.inc();
        Ok(balance)
    }

    /// Debit an account. Returns the new balance.
    pub async fn withdraw(&self, id: AccountId, amount: Decimal, reason: &str) -> Result<Decimal> {
        self.gate(id)?;
        let balance = self.ledger.withdraw(id, amount, reason).await?;
        self.metrics.withdrawals_total.inc();
        Ok(balance)
    }

    /// Move funds between accounts; the bucket debited is the sender's
    pub async fn transfer(
        &self,
        from: AccountId,
        to: AccountId,
        amount: Decimal,
        reason: &str,
    ) -> Result<TransferOutcome> {
        self.gate(from)?;
        let outcome = self.ledger.transfer(from, to, amount, reason).await?;
        self.metrics.transfers_total.inc();
        Ok(outcome)
    }

    /// Administrative balance overwrite; busts cached statistics
    pub async fn set_balance(
        &self,
        id: AccountId,
        amount: Decimal,
        reason: &str,
    ) -> Result<Decimal> {
        self.gate(id)?;
        let balance = self.ledger.set_balance(id, amount, reason).await?;
        self.stats.invalidate_all();
        Ok(balance)
    }

    /// Administrative reset to zero; busts cached statistics
    pub async fn reset_balance(&self, id: AccountId, reason: &str) -> Result<()> {
        self.gate(id)?;
        self.ledger.reset_balance(id, reason).await?;
        self.stats.invalidate_all();
        Ok(())
    }

    /// Erase an account from memory and storage; busts cached statistics.
    /// Fails with [`Error::AccountNotFound`] when nothing is stored for the id.
    pub async fn delete_account(&self, id: AccountId) -> Result<()> {
        self.ledger.delete_account(id).await?;
        self.stats.invalidate_all();
        self.metrics.accounts.set(self.ledger.resident_accounts() as i64);
        Ok(())
    }

    /// Drop an actor's rate-limit bucket, called on disconnect
    pub fn reset_rate_limit(&self, actor: AccountId) {
        self.limiter.reset(actor);
    }

    /// Record a live actor: account ensured, name cached and stored
    pub async fn on_actor_join(&self, id: AccountId, name: &str) -> Result<Account> {
        let account = self.ledger.ensure_account(id).await?;
        self.metrics.accounts.set(self.ledger.resident_accounts() as i64);
        self.names.on_actor_join(id, name).await?;
        self.ledger.set_display_name(id, name);
        Ok(account)
    }

    /// Release per-actor state on disconnect
    pub fn on_actor_leave(&self, id: AccountId) {
        self.limiter.reset(id);
    }

    // Read path, never rate limited.

    /// Current balance, loading the account if needed
    pub async fn balance(&self, id: AccountId) -> Result<Decimal> {
        match self.ledger.balance(id) {
            Some(balance) => Ok(balance),
            None => Ok(self.ledger.ensure_account(id).await?.balance),
        }
    }

    /// Whether the account can cover `amount`
    pub async fn has_balance(&self, id: AccountId, amount: Decimal) -> Result<bool> {
        Ok(self.balance(id).await? >= amount)
    }

    /// Copy of the account record, loading it if needed
    pub async fn account(&self, id: AccountId) -> Result<Account> {
        match self.ledger.account(id) {
            Some(account) => Ok(account),
            None => self.ledger.ensure_account(id).await,
        }
    }

    /// Point-in-time copy of every resident account, weakly consistent
    pub fn all_balances(&self) -> Vec<Account> {
        self.ledger.all_accounts()
    }

    /// Cached top balances, descending
    pub async fn top_balances(&self, limit: usize) -> Result<Vec<LeaderboardEntry>> {
        self.stats.top_balances(limit, 0).await
    }

    /// Cached top balance changes versus the snapshot taken `days` ago
    pub async fn top_trends(&self, limit: usize, days: u32) -> Result<Vec<LeaderboardEntry>> {
        self.stats.top_trends(limit, 0, days).await
    }

    /// Cached sum of all resident balances
    pub async fn total_circulating(&self) -> Result<Decimal> {
        self.stats.total_circulating().await
    }

    /// Cached total stored accounts
    pub async fn account_count(&self) -> Result<u64> {
        self.stats.account_count().await
    }

    /// Cached median balance
    pub async fn median_balance(&self) -> Result<Option<Decimal>> {
        self.stats.median_balance().await
    }

    /// Cached 1-based rank by balance
    pub async fn rank(&self, id: AccountId) -> Result<u64> {
        self.stats.rank(id).await
    }

    /// Recent transactions for an account, newest first
    pub async fn transaction_history(
        &self,
        id: AccountId,
        limit: usize,
    ) -> Result<Vec<TransactionEntry>> {
        self.ledger.transaction_history(id, limit).await
    }

    /// Register the external name-resolution capability
    pub fn register_name_resolver(&self, resolver: Arc<dyn NameResolver>) {
        self.names.register_resolver(resolver);
    }

    /// Cached display name or a truncated id preview; never blocks
    pub fn display_name(&self, id: AccountId) -> String {
        self.names.resolve(id)
    }

    /// Resolve a display name through cache, storage, and the external tier
    pub async fn resolve_name(&self, id: AccountId) -> Result<String> {
        self.names.resolve_name(id).await
    }

    /// Reverse display-name lookup through the full chain
    pub async fn resolve_id(&self, name: &str) -> Result<Option<AccountId>> {
        self.names.resolve_id(name).await
    }

    /// Format an amount per the configured display options
    pub fn format_amount(&self, amount: Decimal) -> String {
        self.config.format(amount)
    }

    /// Active configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Metrics collector, for scrape endpoints
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::BackendKind;

    fn test_config(dir: &std::path::Path) -> Config {
        let mut config = Config::default();
        config.storage.backend = BackendKind::Json;
        config.storage.json.data_dir = dir.to_path_buf();
        config.autosave_interval_secs = 3600;
        config.snapshot_interval_secs = 3600;
        config
    }

    #[tokio::test]
    async fn test_open_write_read_shutdown() {
        let temp = tempfile::tempdir().unwrap();
        let economy = Economy::open(test_config(temp.path())).await.unwrap();
        let id = AccountId::random();

        economy.ensure_account(id).await.unwrap();
        economy.deposit(id, Decimal::new(25, 0), "reward").await.unwrap();
        assert_eq!(economy.balance(id).await.unwrap(), Decimal::new(125, 0));
        assert!(economy.has_balance(id, Decimal::new(100, 0)).await.unwrap());

        economy.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_state_survives_restart() {
        let temp = tempfile::tempdir().unwrap();
        let id = AccountId::random();

        {
            let economy = Economy::open(test_config(temp.path())).await.unwrap();
            economy.ensure_account(id).await.unwrap();
            economy.deposit(id, Decimal::new(400, 0), "seed").await.unwrap();
            economy.shutdown().await.unwrap();
        }

        let economy = Economy::open(test_config(temp.path())).await.unwrap();
        assert_eq!(economy.balance(id).await.unwrap(), Decimal::new(500, 0));
        economy.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_rate_limit_gates_writes_not_reads() {
        let temp = tempfile::tempdir().unwrap();
        let mut config = test_config(temp.path());
        config.rate_limit.burst = 2;
        config.rate_limit.refill_per_sec = 1;
        let economy = Economy::open(config).await.unwrap();
        let id = AccountId::random();

        economy.ensure_account(id).await.unwrap();
        economy.deposit(id, Decimal::ONE, "x").await.unwrap();
        let err = economy.deposit(id, Decimal::ONE, "x").await.unwrap_err();
        assert!(matches!(err, Error::RateLimited { .. }));
        assert_eq!(economy.metrics().rate_limited_total.get(), 1);

        // Reads stay open while the bucket is empty
        economy.balance(id).await.unwrap();

        economy.reset_rate_limit(id);
        economy.deposit(id, Decimal::ONE, "x").await.unwrap();
        economy.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_admin_ops_bust_statistics() {
        let temp = tempfile::tempdir().unwrap();
        let economy = Economy::open(test_config(temp.path())).await.unwrap();
        let id = AccountId::random();

        economy.ensure_account(id).await.unwrap();
        assert_eq!(
            economy.total_circulating().await.unwrap(),
            Decimal::new(100, 0)
        );

        economy.set_balance(id, Decimal::new(900, 0), "admin").await.unwrap();
        // Cache was invalidated, so the new balance is visible immediately
        assert_eq!(
            economy.total_circulating().await.unwrap(),
            Decimal::new(900, 0)
        );
        economy.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_join_resolves_names_on_leaderboard() {
        let temp = tempfile::tempdir().unwrap();
        let economy = Economy::open(test_config(temp.path())).await.unwrap();
        let rich = AccountId::random();
        let poor = AccountId::random();

        economy.on_actor_join(rich, "Rich").await.unwrap();
        economy.on_actor_join(poor, "Poor").await.unwrap();
        economy.deposit(rich, Decimal::new(1000, 0), "seed").await.unwrap();

        let top = economy.top_balances(10).await.unwrap();
        assert_eq!(top.len(), 2);
        assert_eq!(top[0].display_name.as_deref(), Some("Rich"));
        assert_eq!(top[0].balance, Decimal::new(1100, 0));

        assert_eq!(economy.display_name(rich), "Rich");
        assert_eq!(economy.resolve_id("rich").await.unwrap(), Some(rich));
        economy.shutdown().await.unwrap();
    }
}
