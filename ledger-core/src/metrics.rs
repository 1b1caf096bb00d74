//! Metrics collection for observability
//!
//! Each [`Metrics`] owns a private Prometheus registry, so several ledgers
//! can live in one process.
//!
//! # Metrics
//!
//! - `ledger_commits_total` - Transactions committed
//! - `ledger_stale_writes_total` - Commits rejected by read-set validation
//! - `ledger_duplicate_transactions_total` - Commits rejected for a reused tx id
//! - `ledger_commit_duration_seconds` - Histogram of commit latencies
//! - `ledger_commit_height` - Height of the latest commit

use prometheus::{Histogram, HistogramOpts, IntCounter, IntGauge, Registry};
use std::sync::Arc;

/// Metrics collector
#[derive(Clone)]
pub struct Metrics {
    /// Transactions committed
    pub commits_total: IntCounter,

    /// Read-set validation failures
    pub stale_writes_total: IntCounter,

    /// Duplicate transaction ids rejected
    pub duplicate_transactions_total: IntCounter,

    /// Commit duration histogram
    pub commit_duration: Histogram,

    /// Latest commit height
    pub commit_height: IntGauge,

    /// Prometheus registry
    pub registry: Arc<Registry>,
}

impl Metrics {
    /// Create new metrics collector
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let commits_total = IntCounter::new("ledger_commits_total", "Transactions committed")?;
        registry.register(Box::new(commits_total.clone()))?;

        let stale_writes_total = IntCounter::new(
            "ledger_stale_writes_total",
            "Commits rejected by read-set validation",
        )?;
        registry.register(Box::new(stale_writes_total.clone()))?;

        let duplicate_transactions_total = IntCounter::new(
            "ledger_duplicate_transactions_total",
            "Commits rejected for a reused transaction id",
        )?;
        registry.register(Box::new(duplicate_transactions_total.clone()))?;

        let commit_duration = Histogram::with_opts(
            HistogramOpts::new("ledger_commit_duration_seconds", "Histogram of commit latencies")
                .buckets(vec![0.0001, 0.0005, 0.001, 0.005, 0.010, 0.050, 0.100, 0.500]),
        )?;
        registry.register(Box::new(commit_duration.clone()))?;

        let commit_height = IntGauge::new("ledger_commit_height", "Height of the latest commit")?;
        registry.register(Box::new(commit_height.clone()))?;

        Ok(Self {
            commits_total,
            stale_writes_total,
            duplicate_transactions_total,
            commit_duration,
            commit_height,
            registry,
        })
    }

    /// Record a successful commit
    pub fn record_commit(&self, height: u64, duration_seconds: f64) {
        self.commits_total.inc();
        self.commit_height.set(height as i64);
        self.commit_duration.observe(duration_seconds);
    }

    /// Record a rejected commit
    pub fn record_rejection(&self, err: &crate::Error) {
        match err {
            crate::Error::StaleWrite { .. } => self.stale_writes_total.inc(),
            crate::Error::DuplicateTransaction(_) => self.duplicate_transactions_total.inc(),
            _ => {}
        }
    }

    /// Get metrics registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics")
            .field("commits_total", &self.commits_total.get())
            .field("commit_height", &self.commit_height.get())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() {
        let metrics = Metrics::new().unwrap();
        assert_eq!(metrics.commits_total.get(), 0);
        assert_eq!(metrics.commit_height.get(), 0);

        // Private registries do not collide
        assert!(Metrics::new().is_ok());
    }

    #[test]
    fn test_record_commit() {
        let metrics = Metrics::new().unwrap();
        metrics.record_commit(1, 0.001);
        metrics.record_commit(2, 0.002);
        assert_eq!(metrics.commits_total.get(), 2);
        assert_eq!(metrics.commit_height.get(), 2);
        assert_eq!(metrics.commit_duration.get_sample_count(), 2);
    }

    #[test]
    fn test_record_rejection() {
        let metrics = Metrics::new().unwrap();
        metrics.record_rejection(&crate::Error::StaleWrite {
            namespace: "property".to_string(),
            key: "P1".to_string(),
        });
        metrics.record_rejection(&crate::Error::DuplicateTransaction("tx1".to_string()));
        metrics.record_rejection(&crate::Error::Validation("bad".to_string()));
        assert_eq!(metrics.stale_writes_total.get(), 1);
        assert_eq!(metrics.duplicate_transactions_total.get(), 1);
        assert_eq!(metrics.registry().gather().len(), 5);
    }
}
