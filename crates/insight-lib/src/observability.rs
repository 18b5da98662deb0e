//! Observability infrastructure for the insight engine
//!
//! Provides:
//! - Prometheus metrics (collection latency, cluster failures, cache hits, alert outcomes, job states)
//! - Structured JSON logging with tracing

use prometheus::{
    register_histogram_vec, register_int_counter, register_int_counter_vec, register_int_gauge,
    register_int_gauge_vec, HistogramVec, IntCounter, IntCounterVec, IntGauge, IntGaugeVec,
};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Histogram buckets for collection latency (in seconds)
const LATENCY_BUCKETS: &[f64] = &[
    0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0, 600.0,
];

static GLOBAL_METRICS: OnceLock<InsightMetricsInner> = OnceLock::new();

struct InsightMetricsInner {
    collection_latency_seconds: HistogramVec,
    clusters_analyzed: IntGauge,
    cluster_failures: IntCounter,
    workloads_observed: IntGauge,
    workloads_unreasonable: IntGauge,
    cache_requests: IntCounterVec,
    alerts: IntCounterVec,
    scheduler_jobs: IntGaugeVec,
    scheduler_ticks: IntCounterVec,
}

impl InsightMetricsInner {
    fn new() -> Self {
        Self {
            collection_latency_seconds: register_histogram_vec!(
                "cluster_insight_collection_latency_seconds",
                "Time spent collecting workloads, per cluster or per batch",
                &["scope"],
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register collection_latency_seconds"),

            clusters_analyzed: register_int_gauge!(
                "cluster_insight_clusters_analyzed",
                "Clusters that contributed to the latest analysis"
            )
            .expect("Failed to register clusters_analyzed"),

            cluster_failures: register_int_counter!(
                "cluster_insight_cluster_failures_total",
                "Cluster collections that failed to connect, collect or finish in time"
            )
            .expect("Failed to register cluster_failures"),

            workloads_observed: register_int_gauge!(
                "cluster_insight_workloads_observed",
                "Workloads in the latest multi-cluster inventory"
            )
            .expect("Failed to register workloads_observed"),

            workloads_unreasonable: register_int_gauge!(
                "cluster_insight_workloads_unreasonable",
                "Workloads classified unreasonable in the latest analysis"
            )
            .expect("Failed to register workloads_unreasonable"),

            cache_requests: register_int_counter_vec!(
                "cluster_insight_cache_requests_total",
                "Cache lookups by cache and result",
                &["cache", "result"]
            )
            .expect("Failed to register cache_requests"),

            alerts: register_int_counter_vec!(
                "cluster_insight_alerts_total",
                "Alert decisions by outcome",
                &["outcome"]
            )
            .expect("Failed to register alerts"),

            scheduler_jobs: register_int_gauge_vec!(
                "cluster_insight_scheduler_jobs",
                "Scheduled collection jobs by status",
                &["status"]
            )
            .expect("Failed to register scheduler_jobs"),

            scheduler_ticks: register_int_counter_vec!(
                "cluster_insight_scheduler_ticks_total",
                "Scheduled collection runs by result",
                &["result"]
            )
            .expect("Failed to register scheduler_ticks"),
        }
    }
}

/// Lightweight handle to the global engine metrics
///
/// Clones share the same underlying collectors.
#[derive(Clone)]
pub struct InsightMetrics {
    inner: &'static InsightMetricsInner,
}

impl Default for InsightMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InsightMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InsightMetrics").finish_non_exhaustive()
    }
}

impl InsightMetrics {
    /// Create a handle, registering the global collectors on first use
    pub fn new() -> Self {
        Self {
            inner: GLOBAL_METRICS.get_or_init(InsightMetricsInner::new),
        }
    }

    pub fn observe_cluster_latency(&self, duration_secs: f64) {
        self.inner
            .collection_latency_seconds
            .with_label_values(&["cluster"])
            .observe(duration_secs);
    }

    pub fn observe_batch_latency(&self, duration_secs: f64) {
        self.inner
            .collection_latency_seconds
            .with_label_values(&["batch"])
            .observe(duration_secs);
    }

    pub fn set_analysis_totals(&self, clusters: usize, workloads: usize, unreasonable: usize) {
        self.inner.clusters_analyzed.set(clusters as i64);
        self.inner.workloads_observed.set(workloads as i64);
        self.inner.workloads_unreasonable.set(unreasonable as i64);
    }

    pub fn inc_cluster_failures(&self) {
        self.inner.cluster_failures.inc();
    }

    /// Count a cache lookup against `cache` ("inventory" or "analysis")
    pub fn record_cache_lookup(&self, cache: &str, hit: bool) {
        let result = if hit { "hit" } else { "miss" };
        self.inner
            .cache_requests
            .with_label_values(&[cache, result])
            .inc();
    }

    pub fn inc_alerts_emitted(&self) {
        self.inner.alerts.with_label_values(&["emitted"]).inc();
    }

    pub fn inc_alerts_suppressed(&self) {
        self.inner.alerts.with_label_values(&["suppressed"]).inc();
    }

    /// Replace the per-status job gauges with a fresh tally
    pub fn set_job_counts(&self, counts: &[(&str, usize)]) {
        self.inner.scheduler_jobs.reset();
        for (status, count) in counts {
            self.inner
                .scheduler_jobs
                .with_label_values(&[status])
                .set(*count as i64);
        }
    }

    /// Count a scheduled run: "success", "failure" or "skipped"
    pub fn inc_scheduler_tick(&self, result: &str) {
        self.inner
            .scheduler_ticks
            .with_label_values(&[result])
            .inc();
    }
}

/// Structured logger for engine events
///
/// Every event carries an `event` field and the engine instance name so
/// log pipelines can filter without parsing messages.
#[derive(Debug, Clone)]
pub struct StructuredLogger {
    instance: String,
}

impl StructuredLogger {
    pub fn new(instance: impl Into<String>) -> Self {
        Self {
            instance: instance.into(),
        }
    }

    pub fn instance(&self) -> &str {
        &self.instance
    }

    pub fn log_startup(&self, version: &str, clusters: usize) {
        info!(
            event = "engine_started",
            instance = %self.instance,
            version = %version,
            clusters = clusters,
            "Cluster insight engine started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "engine_shutdown",
            instance = %self.instance,
            reason = %reason,
            "Cluster insight engine shutting down"
        );
    }

    /// Log the outcome of a multi-cluster pass
    pub fn log_collection(
        &self,
        clusters_analyzed: usize,
        clusters_failed: usize,
        total_pods: usize,
        unreasonable_pods: usize,
        elapsed_ms: u64,
    ) {
        info!(
            event = "collection_completed",
            instance = %self.instance,
            clusters_analyzed = clusters_analyzed,
            clusters_failed = clusters_failed,
            total_pods = total_pods,
            unreasonable_pods = unreasonable_pods,
            elapsed_ms = elapsed_ms,
            "Multi-cluster collection completed"
        );
    }

    pub fn log_cluster_failure(&self, cluster: &str, stage: &str, error: &str) {
        warn!(
            event = "cluster_failed",
            instance = %self.instance,
            cluster = %cluster,
            stage = %stage,
            error = %error,
            "Cluster collection failed"
        );
    }

    pub fn log_alert(&self, cluster: &str, level: &str, title: &str, emitted: bool, occurrences: u32) {
        if emitted {
            info!(
                event = "alert_emitted",
                instance = %self.instance,
                cluster = %cluster,
                level = %level,
                title = %title,
                occurrences = occurrences,
                "Alert emitted"
            );
        } else {
            info!(
                event = "alert_suppressed",
                instance = %self.instance,
                cluster = %cluster,
                level = %level,
                title = %title,
                occurrences = occurrences,
                "Duplicate alert suppressed"
            );
        }
    }

    pub fn log_job_suspended(&self, cluster: &str, error_count: u32, last_error: &str) {
        warn!(
            event = "job_suspended",
            instance = %self.instance,
            cluster = %cluster,
            error_count = error_count,
            last_error = %last_error,
            "Collection job suspended after repeated failures"
        );
    }

    pub fn log_maintenance(&self, duplicate_alerts: u64, old_activities: u64, history_rows: u64) {
        info!(
            event = "maintenance_completed",
            instance = %self.instance,
            duplicate_alerts = duplicate_alerts,
            old_activities = old_activities,
            history_rows = history_rows,
            "Maintenance pass completed"
        );
    }
}
