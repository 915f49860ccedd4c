//! In-process counters the pipeline updates as it runs.
//!
//! Tracks the three things SPEC §2's ambient metrics module names:
//! cache hit rate, per-backend query counts, and (via
//! [`crate::pipeline::GatewayPipeline::metrics`] handed to the
//! transport layer) queue depth, which the embedded queue itself
//! reports.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::context::Source;

/// Atomic counters shared between the pipeline and the `/metrics` route.
///
/// Cloning a [`GatewayPipeline`](crate::pipeline::GatewayPipeline) clones
/// the `Arc` this wraps, so every clone observes the same counters.
#[derive(Debug, Default)]
pub struct PipelineMetrics {
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    internal_queries_total: AtomicU64,
    external_queries_total: AtomicU64,
}

impl PipelineMetrics {
    /// Creates a fresh, zeroed set of counters shared via `Arc`.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Increments the cache hit counter.
    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    /// Increments the cache miss counter.
    pub fn record_cache_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    /// Increments the per-backend query counter for `source`.
    pub fn record_backend_query(&self, source: Source) {
        match source {
            Source::Internal => self.internal_queries_total.fetch_add(1, Ordering::Relaxed),
            Source::External => self.external_queries_total.fetch_add(1, Ordering::Relaxed),
        };
    }

    /// Total cache hits since startup.
    #[must_use]
    pub fn cache_hits(&self) -> u64 {
        self.cache_hits.load(Ordering::Relaxed)
    }

    /// Total cache misses since startup (only counted for cacheable requests).
    #[must_use]
    pub fn cache_misses(&self) -> u64 {
        self.cache_misses.load(Ordering::Relaxed)
    }

    /// Fraction of cacheable lookups that hit, `0.0` if none have run yet.
    #[must_use]
    pub fn cache_hit_ratio(&self) -> f64 {
        let hits = self.cache_hits();
        let total = hits + self.cache_misses();
        if total == 0 { 0.0 } else { hits as f64 / total as f64 }
    }

    /// Queries dispatched to the embedded backend.
    #[must_use]
    pub fn internal_queries_total(&self) -> u64 {
        self.internal_queries_total.load(Ordering::Relaxed)
    }

    /// Queries dispatched to the external adapter, if one is configured.
    #[must_use]
    pub fn external_queries_total(&self) -> u64 {
        self.external_queries_total.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_hit_ratio_is_zero_with_no_samples() {
        let metrics = PipelineMetrics::new();
        assert!((metrics.cache_hit_ratio() - 0.0).abs() < f64::EPSILON);
    }

    #[test]
    fn cache_hit_ratio_reflects_hits_and_misses() {
        let metrics = PipelineMetrics::new();
        metrics.record_cache_hit();
        metrics.record_cache_hit();
        metrics.record_cache_hit();
        metrics.record_cache_miss();
        assert!((metrics.cache_hit_ratio() - 0.75).abs() < 0.001);
    }

    #[test]
    fn backend_queries_are_counted_per_source() {
        let metrics = PipelineMetrics::new();
        metrics.record_backend_query(Source::Internal);
        metrics.record_backend_query(Source::Internal);
        metrics.record_backend_query(Source::External);
        assert_eq!(metrics.internal_queries_total(), 2);
        assert_eq!(metrics.external_queries_total(), 1);
    }
}
