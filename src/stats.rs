//! Cached aggregate statistics
//!
//! Aggregates are recomputed at most once per TTL window. Concurrent
//! recomputations of the same key race benignly: both compute, last write
//! wins, and readers always see a complete value.

use crate::error::Result;
use crate::ledger::Ledger;
use crate::storage::StorageHandle;
use crate::types::{AccountId, LeaderboardEntry};
use dashmap::DashMap;
use rust_decimal::Decimal;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Cache lifetimes per statistic family
pub mod ttl {
    use std::time::Duration;

    /// Leaderboard and trend listings
    pub const LEADERBOARD: Duration = Duration::from_secs(30);
    /// Whole-economy aggregates (totals, counts, median)
    pub const AGGREGATES: Duration = Duration::from_secs(60);
    /// Per-actor rank, refreshed more eagerly
    pub const RANK: Duration = Duration::from_secs(10);
}

/// Leaderboard responses never exceed this many rows
pub const MAX_LEADERBOARD: usize = 100;

struct CachedValue<V> {
    value: V,
    computed_at: Instant,
}

/// Time-bounded memoization keyed by `K`
pub struct TtlCache<K, V> {
    entries: DashMap<K, CachedValue<V>>,
}

impl<K: Eq + Hash + Clone, V: Clone> TtlCache<K, V> {
    /// Create an empty cache
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Cached value if younger than `ttl`, otherwise recompute and store
    pub async fn get_or_compute<F, Fut>(&self, key: K, ttl: Duration, compute: F) -> Result<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V>>,
    {
        if let Some(cached) = self.entries.get(&key) {
            if cached.computed_at.elapsed() < ttl {
                return Ok(cached.value.clone());
            }
        }

        // Map reference released before the await
        let value = compute().await?;
        self.entries.insert(
            key,
            CachedValue {
                value: value.clone(),
                computed_at: Instant::now(),
            },
        );
        Ok(value)
    }

    /// Drop one cached key
    pub fn invalidate(&self, key: &K) {
        self.entries.remove(key);
    }

    /// Drop everything
    pub fn invalidate_all(&self) {
        self.entries.clear();
    }
}

impl<K: Eq + Hash + Clone, V: Clone> Default for TtlCache<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

/// Aggregate statistics over the live ledger and storage
pub struct Statistics {
    ledger: Arc<Ledger>,
    storage: StorageHandle,
    leaderboard: TtlCache<(usize, usize), Vec<LeaderboardEntry>>,
    trends: TtlCache<(usize, usize, u32), Vec<LeaderboardEntry>>,
    totals: TtlCache<(), Decimal>,
    counts: TtlCache<(), u64>,
    medians: TtlCache<(), Option<Decimal>>,
    ranks: TtlCache<AccountId, u64>,
}

impl Statistics {
    /// Create a statistics service with cold caches
    pub fn new(ledger: Arc<Ledger>, storage: StorageHandle) -> Self {
        Self {
            ledger,
            storage,
            leaderboard: TtlCache::new(),
            trends: TtlCache::new(),
            totals: TtlCache::new(),
            counts: TtlCache::new(),
            medians: TtlCache::new(),
            ranks: TtlCache::new(),
        }
    }

    /// Top balances, descending with ascending-id tie break, opted-out
    /// accounts excluded
    pub async fn top_balances(
        &self,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<LeaderboardEntry>> {
        let limit = limit.min(MAX_LEADERBOARD);
        let ledger = self.ledger.clone();
        self.leaderboard
            .get_or_compute((limit, offset), ttl::LEADERBOARD, move || async move {
                let mut accounts = ledger.all_accounts();
                accounts.retain(|a| a.stats_visible);
                accounts.sort_by(|a, b| b.balance.cmp(&a.balance).then(a.id.cmp(&b.id)));
                Ok(accounts
                    .into_iter()
                    .skip(offset)
                    .take(limit)
                    .map(|a| LeaderboardEntry {
                        account: a.id,
                        display_name: a.display_name,
                        balance: a.balance,
                        trend: Decimal::ZERO,
                    })
                    .collect())
            })
            .await
    }

    /// Top balance changes versus the snapshot taken `days` ago
    pub async fn top_trends(
        &self,
        limit: usize,
        offset: usize,
        days: u32,
    ) -> Result<Vec<LeaderboardEntry>> {
        let limit = limit.min(MAX_LEADERBOARD);
        let storage = self.storage.clone();
        self.trends
            .get_or_compute(
                (limit, offset, days),
                ttl::LEADERBOARD,
                move || async move { storage.top_trends(limit, offset, days).await },
            )
            .await
    }

    /// Sum of all resident balances
    pub async fn total_circulating(&self) -> Result<Decimal> {
        let ledger = self.ledger.clone();
        self.totals
            .get_or_compute((), ttl::AGGREGATES, move || async move {
                Ok(ledger
                    .all_accounts()
                    .iter()
                    .map(|a| a.balance)
                    .sum::<Decimal>())
            })
            .await
    }

    /// Total stored accounts
    pub async fn account_count(&self) -> Result<u64> {
        let storage = self.storage.clone();
        self.counts
            .get_or_compute((), ttl::AGGREGATES, move || async move {
                storage.count_accounts().await
            })
            .await
    }

    /// Median balance; even counts average the two middle values
    pub async fn median_balance(&self) -> Result<Option<Decimal>> {
        let ledger = self.ledger.clone();
        self.medians
            .get_or_compute((), ttl::AGGREGATES, move || async move {
                let mut balances: Vec<Decimal> =
                    ledger.all_accounts().iter().map(|a| a.balance).collect();
                if balances.is_empty() {
                    return Ok(None);
                }
                balances.sort();
                let mid = balances.len() / 2;
                let median = if balances.len() % 2 == 0 {
                    (balances[mid - 1] + balances[mid]) / Decimal::TWO
                } else {
                    balances[mid]
                };
                Ok(Some(median))
            })
            .await
    }

    /// 1-based rank by balance (1 = richest)
    pub async fn rank(&self, id: AccountId) -> Result<u64> {
        let ledger = self.ledger.clone();
        let storage = self.storage.clone();
        self.ranks
            .get_or_compute(id, ttl::RANK, move || async move {
                let balance = match ledger.balance(id) {
                    Some(balance) => balance,
                    None => ledger.ensure_account(id).await?.balance,
                };
                Ok(storage.count_richer_than(balance).await? + 1)
            })
            .await
    }

    /// Bust every cached statistic, used after bulk admin operations
    pub fn invalidate_all(&self) {
        self.leaderboard.invalidate_all();
        self.trends.invalidate_all();
        self.totals.invalidate_all();
        self.counts.invalidate_all();
        self.medians.invalidate_all();
        self.ranks.invalidate_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_ttl_cache_computes_once_within_ttl() {
        let cache: TtlCache<&str, u64> = TtlCache::new();
        let calls = AtomicUsize::new(0);

        for _ in 0..3 {
            let value = cache
                .get_or_compute("k", Duration::from_secs(60), || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(42)
                })
                .await
                .unwrap();
            assert_eq!(value, 42);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_ttl_cache_recomputes_after_expiry() {
        let cache: TtlCache<&str, u64> = TtlCache::new();
        let calls = AtomicUsize::new(0);

        let compute = || async {
            Ok(calls.fetch_add(1, Ordering::SeqCst) as u64)
        };
        assert_eq!(
            cache
                .get_or_compute("k", Duration::from_millis(10), compute)
                .await
                .unwrap(),
            0
        );

        tokio::time::sleep(Duration::from_millis(20)).await;

        let second = cache
            .get_or_compute("k", Duration::from_millis(10), || async {
                Ok(calls.fetch_add(1, Ordering::SeqCst) as u64)
            })
            .await
            .unwrap();
        assert_eq!(second, 1);
    }

    #[tokio::test]
    async fn test_ttl_cache_invalidate() {
        let cache: TtlCache<&str, u64> = TtlCache::new();
        cache
            .get_or_compute("k", Duration::from_secs(60), || async { Ok(1) })
            .await
            .unwrap();

        cache.invalidate(&"k");

        let fresh = cache
            .get_or_compute("k", Duration::from_secs(60), || async { Ok(2) })
            .await
            .unwrap();
        assert_eq!(fresh, 2);
    }
}
