//! In-process metrics for engine observability

use std::time::Duration;
use tokio::sync::RwLock;

const MAX_SAMPLES: usize = 10_000;

/// Engine performance counters and latency summary.
#[derive(Debug, Clone, Default)]
pub struct EngineMetrics {
    pub total_requests: u64,
    pub allowed_decisions: u64,
    pub denied_decisions: u64,

    /// Denies caused by collaborator outages rather than policy.
    pub internal_error_denies: u64,

    pub cache_hits: u64,
    pub cache_misses: u64,

    /// Requests where the risk service degraded to the neutral default.
    pub risk_unavailable: u64,

    pub latency_p50_ms: f64,
    pub latency_p95_ms: f64,
    pub latency_p99_ms: f64,
    pub avg_latency_ms: f64,
}

impl EngineMetrics {
    pub fn cache_hit_rate(&self) -> f64 {
        let total = self.cache_hits + self.cache_misses;
        if total == 0 {
            0.0
        } else {
            self.cache_hits as f64 / total as f64
        }
    }

    pub fn allow_rate(&self) -> f64 {
        let total = self.allowed_decisions + self.denied_decisions;
        if total == 0 {
            0.0
        } else {
            self.allowed_decisions as f64 / total as f64
        }
    }
}

/// Collector updated by the orchestrator on every decision.
pub struct MetricsCollector {
    metrics: RwLock<EngineMetrics>,
    latency_samples: RwLock<Vec<f64>>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            metrics: RwLock::new(EngineMetrics::default()),
            latency_samples: RwLock::new(Vec::with_capacity(MAX_SAMPLES)),
        }
    }

    pub async fn record_cache_hit(&self) {
        self.metrics.write().await.cache_hits += 1;
    }

    pub async fn record_cache_miss(&self) {
        self.metrics.write().await.cache_misses += 1;
    }

    pub async fn record_risk_unavailable(&self) {
        self.metrics.write().await.risk_unavailable += 1;
    }

    pub async fn record_decision(&self, allowed: bool, internal_error: bool) {
        let mut metrics = self.metrics.write().await;
        metrics.total_requests += 1;
        if allowed {
            metrics.allowed_decisions += 1;
        } else {
            metrics.denied_decisions += 1;
            if internal_error {
                metrics.internal_error_denies += 1;
            }
        }
    }

    pub async fn record_latency(&self, latency: Duration) {
        let latency_ms = latency.as_secs_f64() * 1000.0;

        let mut samples = self.latency_samples.write().await;
        samples.push(latency_ms);
        if samples.len() > MAX_SAMPLES {
            let excess = samples.len() - MAX_SAMPLES;
            samples.drain(0..excess);
        }

        let mut sorted = samples.clone();
        sorted.sort_by(|a, b| a.total_cmp(b));

        let mut metrics = self.metrics.write().await;
        metrics.avg_latency_ms = sorted.iter().sum::<f64>() / sorted.len() as f64;
        metrics.latency_p50_ms = percentile(&sorted, 0.50);
        metrics.latency_p95_ms = percentile(&sorted, 0.95);
        metrics.latency_p99_ms = percentile(&sorted, 0.99);
    }

    pub async fn snapshot(&self) -> EngineMetrics {
        self.metrics.read().await.clone()
    }

    pub async fn reset(&self) {
        *self.metrics.write().await = EngineMetrics::default();
        self.latency_samples.write().await.clear();
    }

    /// Export in Prometheus text exposition format.
    pub async fn export_prometheus(&self) -> String {
        let metrics = self.metrics.read().await;

        format!(
            r#"# HELP pdp_requests_total Total authorization requests
# TYPE pdp_requests_total counter
pdp_requests_total {}

# HELP pdp_allowed_total Allowed decisions
# TYPE pdp_allowed_total counter
pdp_allowed_total {}

# HELP pdp_denied_total Denied decisions
# TYPE pdp_denied_total counter
pdp_denied_total {}

# HELP pdp_internal_error_denies_total Denies caused by collaborator outages
# TYPE pdp_internal_error_denies_total counter
pdp_internal_error_denies_total {}

# HELP pdp_cache_hits_total Decision cache hits
# TYPE pdp_cache_hits_total counter
pdp_cache_hits_total {}

# HELP pdp_cache_misses_total Decision cache misses
# TYPE pdp_cache_misses_total counter
pdp_cache_misses_total {}

# HELP pdp_risk_unavailable_total Requests served with the neutral risk default
# TYPE pdp_risk_unavailable_total counter
pdp_risk_unavailable_total {}

# HELP pdp_latency_seconds Decision latency percentiles
# TYPE pdp_latency_seconds summary
pdp_latency_seconds{{quantile="0.5"}} {}
pdp_latency_seconds{{quantile="0.95"}} {}
pdp_latency_seconds{{quantile="0.99"}} {}
"#,
            metrics.total_requests,
            metrics.allowed_decisions,
            metrics.denied_decisions,
            metrics.internal_error_denies,
            metrics.cache_hits,
            metrics.cache_misses,
            metrics.risk_unavailable,
            metrics.latency_p50_ms / 1000.0,
            metrics.latency_p95_ms / 1000.0,
            metrics.latency_p99_ms / 1000.0,
        )
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let idx = ((sorted.len() as f64) * p) as usize;
    sorted[idx.min(sorted.len() - 1)]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_decision_counters() {
        let collector = MetricsCollector::new();
        collector.record_decision(true, false).await;
        collector.record_decision(false, false).await;
        collector.record_decision(false, true).await;

        let metrics = collector.snapshot().await;
        assert_eq!(metrics.total_requests, 3);
        assert_eq!(metrics.allowed_decisions, 1);
        assert_eq!(metrics.denied_decisions, 2);
        assert_eq!(metrics.internal_error_denies, 1);
    }

    #[tokio::test]
    async fn test_cache_hit_rate() {
        let collector = MetricsCollector::new();
        collector.record_cache_hit().await;
        collector.record_cache_hit().await;
        collector.record_cache_miss().await;

        let metrics = collector.snapshot().await;
        assert!((metrics.cache_hit_rate() - 2.0 / 3.0).abs() < 0.01);
    }

    #[tokio::test]
    async fn test_latency_summary() {
        let collector = MetricsCollector::new();
        collector.record_latency(Duration::from_millis(2)).await;
        collector.record_latency(Duration::from_millis(4)).await;
        collector.record_latency(Duration::from_millis(6)).await;

        let metrics = collector.snapshot().await;
        assert!((metrics.avg_latency_ms - 4.0).abs() < 0.5);
        assert!(metrics.latency_p50_ms > 0.0);
        assert!(metrics.latency_p99_ms >= metrics.latency_p50_ms);
    }

    #[tokio::test]
    async fn test_prometheus_export() {
        let collector = MetricsCollector::new();
        collector.record_decision(true, false).await;
        collector.record_latency(Duration::from_millis(3)).await;

        let text = collector.export_prometheus().await;
        assert!(text.contains("pdp_requests_total 1"));
        assert!(text.contains("pdp_allowed_total 1"));
    }

    #[tokio::test]
    async fn test_reset() {
        let collector = MetricsCollector::new();
        collector.record_decision(true, false).await;
        collector.reset().await;
        assert_eq!(collector.snapshot().await.total_requests, 0);
    }
}
