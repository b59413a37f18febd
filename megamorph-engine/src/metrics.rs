//! Engine metrics
//!
//! Counters for attribute resolution and query-cache effectiveness. One
//! [`EngineMetrics`] is shared by a store's context and its query cache.

use std::sync::atomic::{AtomicU64, Ordering};

/// Atomic engine counters
#[derive(Debug, Default)]
pub struct EngineMetrics {
    /// Attribute reads that ran the resolver
    pub resolutions: AtomicU64,

    /// Attribute reads served from a model's memo
    pub memo_hits: AtomicU64,

    /// Transform hooks that returned an error
    pub transform_failures: AtomicU64,

    /// Keyed queries served from the cache
    pub query_hits: AtomicU64,

    /// Keyed queries with no cached entry
    pub query_misses: AtomicU64,

    /// Fetcher invocations
    pub fetches: AtomicU64,

    /// Background reloads started
    pub background_reloads: AtomicU64,

    /// Cache entries removed by unload, capacity or explicit eviction
    pub evictions: AtomicU64,
}

impl EngineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_resolution(&self) {
        self.resolutions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_memo_hit(&self) {
        self.memo_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_transform_failure(&self) {
        self.transform_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_query_hit(&self) {
        self.query_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_query_miss(&self) {
        self.query_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_fetch(&self) {
        self.fetches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_background_reload(&self) {
        self.background_reloads.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_evictions(&self, count: u64) {
        self.evictions.fetch_add(count, Ordering::Relaxed);
    }

    /// Reset all counters
    pub fn reset(&self) {
        for counter in [
            &self.resolutions,
            &self.memo_hits,
            &self.transform_failures,
            &self.query_hits,
            &self.query_misses,
            &self.fetches,
            &self.background_reloads,
            &self.evictions,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }

    /// Get a snapshot of current metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            resolutions: self.resolutions.load(Ordering::Relaxed),
            memo_hits: self.memo_hits.load(Ordering::Relaxed),
            transform_failures: self.transform_failures.load(Ordering::Relaxed),
            query_hits: self.query_hits.load(Ordering::Relaxed),
            query_misses: self.query_misses.load(Ordering::Relaxed),
            fetches: self.fetches.load(Ordering::Relaxed),
            background_reloads: self.background_reloads.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time snapshot of engine metrics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub resolutions: u64,
    pub memo_hits: u64,
    pub transform_failures: u64,
    pub query_hits: u64,
    pub query_misses: u64,
    pub fetches: u64,
    pub background_reloads: u64,
    pub evictions: u64,
}

impl MetricsSnapshot {
    /// Fraction of attribute reads served from the memo
    pub fn memo_hit_rate(&self) -> f64 {
        ratio(self.memo_hits, self.memo_hits + self.resolutions)
    }

    /// Fraction of keyed queries served from the cache
    pub fn query_hit_rate(&self) -> f64 {
        ratio(self.query_hits, self.query_hits + self.query_misses)
    }
}

fn ratio(part: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 / total as f64
    }
}

impl std::fmt::Display for MetricsSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "Attributes: {} resolved | {} memo hits | Hit Rate: {:.1}% | {} transform failures",
            self.resolutions,
            self.memo_hits,
            self.memo_hit_rate() * 100.0,
            self.transform_failures
        )?;
        writeln!(
            f,
            "Queries: {} hits | {} misses | Hit Rate: {:.1}%",
            self.query_hits,
            self.query_misses,
            self.query_hit_rate() * 100.0
        )?;
        writeln!(
            f,
            "Fetches: {} | Background Reloads: {} | Evictions: {}",
            self.fetches, self.background_reloads, self.evictions
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_basic() {
        let metrics = EngineMetrics::new();

        metrics.record_query_hit();
        metrics.record_query_hit();
        metrics.record_query_miss();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.query_hits, 2);
        assert_eq!(snapshot.query_misses, 1);
        assert_eq!(snapshot.query_hit_rate(), 2.0 / 3.0);
    }

    #[test]
    fn test_empty_rates() {
        let snapshot = EngineMetrics::new().snapshot();
        assert_eq!(snapshot.memo_hit_rate(), 0.0);
        assert_eq!(snapshot.query_hit_rate(), 0.0);
    }

    #[test]
    fn test_metrics_reset() {
        let metrics = EngineMetrics::new();

        metrics.record_resolution();
        metrics.record_evictions(3);
        metrics.reset();

        assert_eq!(metrics.snapshot(), MetricsSnapshot::default());
    }

    #[test]
    fn test_snapshot_display() {
        let metrics = EngineMetrics::new();
        metrics.record_resolution();
        metrics.record_memo_hit();
        metrics.record_memo_hit();
        metrics.record_memo_hit();
        metrics.record_query_miss();
        metrics.record_fetch();
        metrics.record_evictions(2);

        insta::assert_snapshot!(metrics.snapshot().to_string(), @r"
        Attributes: 1 resolved | 3 memo hits | Hit Rate: 75.0% | 0 transform failures
        Queries: 0 hits | 1 misses | Hit Rate: 0.0%
        Fetches: 1 | Background Reloads: 0 | Evictions: 2
        ");
    }
}
