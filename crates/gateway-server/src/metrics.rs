//! Prometheus-format rendering of [`gateway_core::PipelineMetrics`] plus
//! the embedded queue's current depth.
//!
//! The counters themselves live in `gateway-core` (the pipeline is what
//! updates them); this module only snapshots and formats them for the
//! `/metrics` route (spec §2 ambient Metrics, §6).

use gateway_core::PipelineMetrics;

/// A point-in-time snapshot, ready to render as Prometheus text or JSON.
#[derive(Debug)]
pub struct MetricsSnapshot {
    /// Tickets currently queued or in flight on the embedded writer.
    pub queue_depth: u64,
    /// Cache hits since startup.
    pub cache_hits: u64,
    /// Cache misses since startup.
    pub cache_misses: u64,
    /// `cache_hits / (cache_hits + cache_misses)`, `0.0` with no samples.
    pub cache_hit_ratio: f64,
    /// Queries dispatched to the embedded backend.
    pub internal_queries_total: u64,
    /// Queries dispatched to the external adapter.
    pub external_queries_total: u64,
}

impl MetricsSnapshot {
    /// Snapshots the pipeline's counters alongside the given queue depth.
    #[must_use]
    pub fn capture(metrics: &PipelineMetrics, queue_depth: usize) -> Self {
        Self {
            queue_depth: queue_depth as u64,
            cache_hits: metrics.cache_hits(),
            cache_misses: metrics.cache_misses(),
            cache_hit_ratio: metrics.cache_hit_ratio(),
            internal_queries_total: metrics.internal_queries_total(),
            external_queries_total: metrics.external_queries_total(),
        }
    }

    /// Render in Prometheus text exposition format.
    #[must_use]
    pub fn to_prometheus_format(&self) -> String {
        format!(
            r"# HELP gateway_queue_depth Tickets currently queued or in flight on the embedded writer
# TYPE gateway_queue_depth gauge
gateway_queue_depth {}

# HELP gateway_cache_hits_total Cache hits since startup
# TYPE gateway_cache_hits_total counter
gateway_cache_hits_total {}

# HELP gateway_cache_misses_total Cache misses since startup
# TYPE gateway_cache_misses_total counter
gateway_cache_misses_total {}

# HELP gateway_cache_hit_ratio Fraction of cacheable lookups that hit (0-1)
# TYPE gateway_cache_hit_ratio gauge
gateway_cache_hit_ratio {:.3}

# HELP gateway_internal_queries_total Queries dispatched to the embedded backend
# TYPE gateway_internal_queries_total counter
gateway_internal_queries_total {}

# HELP gateway_external_queries_total Queries dispatched to the external adapter
# TYPE gateway_external_queries_total counter
gateway_external_queries_total {}
",
            self.queue_depth,
            self.cache_hits,
            self.cache_misses,
            self.cache_hit_ratio,
            self.internal_queries_total,
            self.external_queries_total,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_prometheus_text_with_help_and_type_lines() {
        let metrics = PipelineMetrics::new();
        metrics.record_cache_hit();
        metrics.record_backend_query(gateway_core::Source::Internal);
        let snapshot = MetricsSnapshot::capture(&metrics, 3);
        let text = snapshot.to_prometheus_format();
        assert!(text.contains("gateway_queue_depth 3"));
        assert!(text.contains("gateway_cache_hits_total 1"));
        assert!(text.contains("gateway_internal_queries_total 1"));
        assert!(text.contains("# HELP"));
        assert!(text.contains("# TYPE"));
    }
}
