//! Metrics collection for engine observability

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

/// Engine metrics
#[derive(Debug, Clone, Default)]
pub struct EngineMetrics {
    /// Read queries authorized (rewritten)
    pub reads_authorized: u64,

    /// Write gate checks performed
    pub writes_authorized: u64,

    /// Nodes dropped from write affected sets
    pub nodes_excluded: u64,

    /// Probes issued to the executor, retries included
    pub probes: u64,

    /// Probes that ended in failure or timeout
    pub probe_failures: u64,

    /// Filter cache hits
    pub cache_hits: u64,

    /// Filter cache misses
    pub cache_misses: u64,

    /// Latency percentiles
    pub latency_p50_ms: f64,
    pub latency_p95_ms: f64,
    pub latency_p99_ms: f64,

    /// Average latency
    pub avg_latency_ms: f64,

    /// Requests that failed with an error
    pub error_count: u64,
}

impl EngineMetrics {
    /// Calculate cache hit rate
    pub fn cache_hit_rate(&self) -> f64 {
        let total = self.cache_hits + self.cache_misses;
        if total == 0 {
            0.0
        } else {
            self.cache_hits as f64 / total as f64
        }
    }

    /// Fraction of probes that failed
    pub fn probe_failure_rate(&self) -> f64 {
        if self.probes == 0 {
            0.0
        } else {
            self.probe_failures as f64 / self.probes as f64
        }
    }
}

/// Metrics collector
pub struct MetricsCollector {
    metrics: Arc<RwLock<EngineMetrics>>,

    /// Latency samples for percentile calculation
    latency_samples: Arc<RwLock<Vec<f64>>>,

    max_samples: usize,
}

impl MetricsCollector {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self {
            metrics: Arc::new(RwLock::new(EngineMetrics::default())),
            latency_samples: Arc::new(RwLock::new(Vec::with_capacity(10_000))),
            max_samples: 10_000,
        }
    }

    pub async fn record_cache_hit(&self) {
        self.metrics.write().await.cache_hits += 1;
    }

    pub async fn record_cache_miss(&self) {
        self.metrics.write().await.cache_misses += 1;
    }

    /// Record an authorized read
    pub async fn record_read(&self) {
        self.metrics.write().await.reads_authorized += 1;
    }

    /// Record a write gate check and how many nodes it excluded
    pub async fn record_write(&self, excluded: usize) {
        let mut metrics = self.metrics.write().await;
        metrics.writes_authorized += 1;
        metrics.nodes_excluded += excluded as u64;
    }

    /// Record one probe attempt
    pub async fn record_probe(&self, failed: bool) {
        let mut metrics = self.metrics.write().await;
        metrics.probes += 1;
        if failed {
            metrics.probe_failures += 1;
        }
    }

    /// Record request latency
    pub async fn record_latency(&self, latency: Duration) {
        let latency_ms = latency.as_secs_f64() * 1000.0;

        let mut samples = self.latency_samples.write().await;
        samples.push(latency_ms);

        // Keep only recent samples
        if samples.len() > self.max_samples {
            samples.drain(0..1_000);
        }

        let mut metrics = self.metrics.write().await;

        let sum: f64 = samples.iter().sum();
        metrics.avg_latency_ms = sum / samples.len() as f64;

        let mut sorted = samples.clone();
        sorted.sort_by(f64::total_cmp);

        metrics.latency_p50_ms = Self::percentile(&sorted, 0.50);
        metrics.latency_p95_ms = Self::percentile(&sorted, 0.95);
        metrics.latency_p99_ms = Self::percentile(&sorted, 0.99);
    }

    pub async fn record_error(&self) {
        self.metrics.write().await.error_count += 1;
    }

    /// Get current metrics snapshot
    pub async fn get_metrics(&self) -> EngineMetrics {
        self.metrics.read().await.clone()
    }

    /// Reset all metrics
    pub async fn reset(&self) {
        *self.metrics.write().await = EngineMetrics::default();
        self.latency_samples.write().await.clear();
    }

    /// Export metrics in Prometheus text format
    pub async fn export_prometheus(&self) -> String {
        let metrics = self.metrics.read().await;

        format!(
            r#"# HELP authz_reads_total Read queries authorized
# TYPE authz_reads_total counter
authz_reads_total {}

# HELP authz_writes_total Write gate checks
# TYPE authz_writes_total counter
authz_writes_total {}

# HELP authz_nodes_excluded_total Nodes excluded by write gates
# TYPE authz_nodes_excluded_total counter
authz_nodes_excluded_total {}

# HELP authz_probes_total Probes issued to the executor
# TYPE authz_probes_total counter
authz_probes_total {}

# HELP authz_probe_failures_total Failed or timed out probes
# TYPE authz_probe_failures_total counter
authz_probe_failures_total {}

# HELP authz_cache_hits_total Filter cache hits
# TYPE authz_cache_hits_total counter
authz_cache_hits_total {}

# HELP authz_cache_misses_total Filter cache misses
# TYPE authz_cache_misses_total counter
authz_cache_misses_total {}

# HELP authz_latency_seconds Request latency percentiles
# TYPE authz_latency_seconds summary
authz_latency_seconds{{quantile="0.5"}} {}
authz_latency_seconds{{quantile="0.95"}} {}
authz_latency_seconds{{quantile="0.99"}} {}

# HELP authz_errors_total Error count
# TYPE authz_errors_total counter
authz_errors_total {}
"#,
            metrics.reads_authorized,
            metrics.writes_authorized,
            metrics.nodes_excluded,
            metrics.probes,
            metrics.probe_failures,
            metrics.cache_hits,
            metrics.cache_misses,
            metrics.latency_p50_ms / 1000.0,
            metrics.latency_p95_ms / 1000.0,
            metrics.latency_p99_ms / 1000.0,
            metrics.error_count,
        )
    }

    /// Calculate percentile from sorted data
    fn percentile(sorted: &[f64], p: f64) -> f64 {
        if sorted.is_empty() {
            return 0.0;
        }

        let idx = ((sorted.len() as f64) * p) as usize;
        let idx = idx.min(sorted.len() - 1);
        sorted[idx]
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}
