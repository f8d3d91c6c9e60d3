//! Metrics collection for observability
//!
//! # Metrics
//!
//! - `economy_deposits_total` - Successful deposits
//! - `economy_withdrawals_total` - Successful withdrawals
//! - `economy_transfers_total` - Successful transfers
//! - `economy_rate_limited_total` - Writes rejected by the rate limiter
//! - `economy_autosave_batch_size` - Histogram of dirty-flush batch sizes
//! - `economy_accounts` - Accounts resident in memory

use prometheus::{Histogram, HistogramOpts, IntCounter, IntGauge, Registry};
use std::sync::Arc;

/// Metrics collector
#[derive(Clone)]
pub struct Metrics {
    /// Successful deposits
    pub deposits_total: IntCounter,

    /// Successful withdrawals
    pub withdrawals_total: IntCounter,

    /// Successful transfers
    pub transfers_total: IntCounter,

    /// Writes rejected by the rate limiter
    pub rate_limited_total: IntCounter,

    /// Dirty-flush batch size histogram
    pub autosave_batch_size: Histogram,

    /// Accounts resident in memory
    pub accounts: IntGauge,

    /// Prometheus registry
    pub registry: Arc<Registry>,
}

impl Metrics {
    /// Create a new metrics collector with its own registry
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let deposits_total =
            IntCounter::new("economy_deposits_total", "Successful deposits")?;
        registry.register(Box::new(deposits_total.clone()))?;

        let withdrawals_total =
            IntCounter::new("economy_withdrawals_total", "Successful withdrawals")?;
        registry.register(Box::new(withdrawals_total.clone()))?;

        let transfers_total =
            IntCounter::new("economy_transfers_total", "Successful transfers")?;
        registry.register(Box::new(transfers_total.clone()))?;

        let rate_limited_total = IntCounter::new(
            "economy_rate_limited_total",
            "Writes rejected by the rate limiter",
        )?;
        registry.register(Box::new(rate_limited_total.clone()))?;

        let autosave_batch_size = Histogram::with_opts(
            HistogramOpts::new(
                "economy_autosave_batch_size",
                "Histogram of dirty-flush batch sizes",
            )
            .buckets(vec![1.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0]),
        )?;
        registry.register(Box::new(autosave_batch_size.clone()))?;

        let accounts = IntGauge::new("economy_accounts", "Accounts resident in memory")?;
        registry.register(Box::new(accounts.clone()))?;

        Ok(Self {
            deposits_total,
            withdrawals_total,
            transfers_total,
            rate_limited_total,
            autosave_batch_size,
            accounts,
            registry,
        })
    }

    /// Record a flush of dirty accounts
    pub fn record_autosave(&self, batch_size: usize) {
        self.autosave_batch_size.observe(batch_size as f64);
    }

    /// Get the metrics registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() {
        let metrics = Metrics::new().unwrap();
        assert_eq!(metrics.deposits_total.get(), 0);
        assert_eq!(metrics.transfers_total.get(), 0);
    }

    #[test]
    fn test_counters_increment() {
        let metrics = Metrics::new().unwrap();
        metrics.deposits_total.inc();
        metrics.deposits_total.inc();
        metrics.rate_limited_total.inc();
        assert_eq!(metrics.deposits_total.get(), 2);
        assert_eq!(metrics.rate_limited_total.get(), 1);
    }

    #[test]
    fn test_independent_registries() {
        // Two collectors must not clash on metric names
        let a = Metrics::new().unwrap();
        let b = Metrics::new().unwrap();
        a.deposits_total.inc();
        assert_eq!(b.deposits_total.get(), 0);
    }
}
