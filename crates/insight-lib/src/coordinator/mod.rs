//! Multi-cluster collection coordinator
//!
//! Fans the single-cluster collector out over every online cluster behind a
//! small admission gate, all under one batch deadline. Per-cluster failures
//! are recorded as activity and absorbed; only an unreadable roster fails a
//! call. Results feed two independent TTL caches:
//! - the raw inventory, serving search and the ranking views
//! - the analysis result, serving non-persisting `collect_all` calls

mod alerts;

#[cfg(test)]
mod tests;

pub use alerts::{assess, AlertTally, Severity, CRITICAL_ALERT_TITLE, SUMMARY_ALERT_TITLE};

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, warn};

use crate::analyzer;
use crate::cache::{TtlCache, ANALYSIS_TTL, INVENTORY_TTL};
use crate::collector::{ClusterCollector, CollectorConfig};
use crate::dedup::{AlertDeduplicator, DEFAULT_SUPPRESSION_WINDOW};
use crate::error::EngineError;
use crate::health::{components, HealthRegistry};
use crate::models::{
    AnalysisResult, ClusterDescriptor, ClusterReport, NamespaceSummary, WorkloadResourceRecord,
};
use crate::observability::{InsightMetrics, StructuredLogger};
use crate::ports::{ActivityRecorder, ClusterConfigStore, PersistenceStore};
use crate::search::{self, PagedResult, SearchFilter};
use alerts::AlertEmitter;

/// Engine tunables
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub collector: CollectorConfig,
    /// Clusters collected at once (default: 2)
    pub cluster_concurrency: usize,
    /// Deadline for a whole fan-out (default: 10 minutes)
    pub batch_deadline: Duration,
    /// Deadline for one cluster, connect included (default: 5 minutes)
    pub cluster_deadline: Duration,
    pub inventory_ttl: Duration,
    pub analysis_ttl: Duration,
    /// Critical findings per cluster pass that become ledger alerts (default: 5)
    pub critical_alert_limit: usize,
    pub alert_suppression_window: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            collector: CollectorConfig::default(),
            cluster_concurrency: 2,
            batch_deadline: Duration::from_secs(600),
            cluster_deadline: Duration::from_secs(300),
            inventory_ttl: INVENTORY_TTL,
            analysis_ttl: ANALYSIS_TTL,
            critical_alert_limit: 5,
            alert_suppression_window: DEFAULT_SUPPRESSION_WINDOW,
        }
    }
}

/// Everything one cluster's collection needs, cheap to clone into a task
#[derive(Clone)]
struct ClusterUnit {
    store: Arc<dyn ClusterConfigStore>,
    activity: Arc<dyn ActivityRecorder>,
    collector: ClusterCollector,
    metrics: InsightMetrics,
    logger: StructuredLogger,
}

struct CollectedCluster {
    cluster: ClusterDescriptor,
    records: Vec<WorkloadResourceRecord>,
    namespaces_failed: usize,
    truncated: bool,
    elapsed_ms: u64,
}

impl ClusterUnit {
    /// Connect and collect one cluster, recording the outcome as activity
    async fn run(
        &self,
        cluster: &ClusterDescriptor,
        deadline: Instant,
    ) -> Result<CollectedCluster, EngineError> {
        let start = Instant::now();

        let handle = match timeout_at(deadline, self.store.build_client(cluster)).await {
            Ok(Ok(handle)) => handle,
            Ok(Err(e)) => {
                let message = e.to_string();
                self.record_connection(cluster, false, &message).await;
                self.fail(cluster, "connect", &message);
                return Err(EngineError::Connect {
                    cluster: cluster.name.clone(),
                    source: e,
                });
            }
            Err(_) => {
                let message = "timed out building cluster client";
                self.record_connection(cluster, false, message).await;
                self.fail(cluster, "connect", message);
                return Err(EngineError::Deadline {
                    cluster: cluster.name.clone(),
                    deadline: deadline.saturating_duration_since(start),
                });
            }
        };
        self.record_connection(cluster, true, "Connected to cluster API")
            .await;

        match self
            .collector
            .collect_until(&handle, &cluster.name, deadline)
            .await
        {
            Ok(collection) => {
                let elapsed = start.elapsed();
                let workloads = collection.workload_count();
                self.record_collection(
                    cluster,
                    true,
                    workloads,
                    &format!("Collected {workloads} workloads"),
                )
                .await;
                self.metrics.observe_cluster_latency(elapsed.as_secs_f64());

                let namespaces_failed = collection.failed_namespaces.len();
                let truncated = collection.truncated;
                Ok(CollectedCluster {
                    cluster: cluster.clone(),
                    records: collection.into_records(),
                    namespaces_failed,
                    truncated,
                    elapsed_ms: elapsed.as_millis() as u64,
                })
            }
            Err(e) => {
                let message = e.to_string();
                self.record_collection(cluster, false, 0, &message).await;
                self.fail(cluster, "collect", &message);
                Err(EngineError::Collection {
                    cluster: cluster.name.clone(),
                    source: e,
                })
            }
        }
    }

    fn fail(&self, cluster: &ClusterDescriptor, stage: &str, error: &str) {
        self.metrics.inc_cluster_failures();
        self.logger.log_cluster_failure(&cluster.name, stage, error);
    }

    async fn record_connection(&self, cluster: &ClusterDescriptor, success: bool, message: &str) {
        if let Err(e) = self
            .activity
            .record_connection_event(cluster, success, message)
            .await
        {
            warn!(cluster = %cluster.name, error = %e, "Failed to record connection event");
        }
    }

    async fn record_collection(
        &self,
        cluster: &ClusterDescriptor,
        success: bool,
        workloads: usize,
        message: &str,
    ) {
        if let Err(e) = self
            .activity
            .record_collection_event(cluster, success, workloads, message)
            .await
        {
            warn!(cluster = %cluster.name, error = %e, "Failed to record collection event");
        }
    }
}

/// Clusters that finished, in roster order, and how many did not
struct BatchOutcome {
    collected: Vec<CollectedCluster>,
    failed: usize,
}

impl BatchOutcome {
    fn records(&self) -> Vec<WorkloadResourceRecord> {
        self.collected
            .iter()
            .flat_map(|c| c.records.iter().cloned())
            .collect()
    }
}

/// Multi-cluster collector and the read views over its caches
pub struct Coordinator {
    config: EngineConfig,
    unit: ClusterUnit,
    persistence: Arc<dyn PersistenceStore>,
    alerts: AlertEmitter,
    dedup: Arc<AlertDeduplicator>,
    inventory: TtlCache<Vec<WorkloadResourceRecord>>,
    analysis: TtlCache<AnalysisResult>,
    health: Option<HealthRegistry>,
    metrics: InsightMetrics,
    logger: StructuredLogger,
}

impl Coordinator {
    pub fn new(
        config: EngineConfig,
        store: Arc<dyn ClusterConfigStore>,
        persistence: Arc<dyn PersistenceStore>,
        activity: Arc<dyn ActivityRecorder>,
        logger: StructuredLogger,
    ) -> Self {
        let metrics = InsightMetrics::new();
        let dedup = Arc::new(
            AlertDeduplicator::new().with_suppression_window(config.alert_suppression_window),
        );
        let alerts = AlertEmitter::new(
            activity.clone(),
            dedup.clone(),
            metrics.clone(),
            logger.clone(),
            config.critical_alert_limit,
        );
        let unit = ClusterUnit {
            store,
            activity,
            collector: ClusterCollector::new(config.collector.clone()),
            metrics: metrics.clone(),
            logger: logger.clone(),
        };

        Self {
            inventory: TtlCache::new(config.inventory_ttl),
            analysis: TtlCache::new(config.analysis_ttl),
            config,
            unit,
            persistence,
            alerts,
            dedup,
            health: None,
            metrics,
            logger,
        }
    }

    /// Report roster and collection health into `registry`
    pub fn with_health(mut self, registry: HealthRegistry) -> Self {
        self.health = Some(registry);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn dedup(&self) -> &Arc<AlertDeduplicator> {
        &self.dedup
    }

    /// Collect every online cluster and analyze the merged records
    ///
    /// Non-persisting calls are served from the analysis cache when it is
    /// warm. Persisting calls always poll and hand each cluster's records to
    /// the persistence store.
    pub async fn collect_all(&self, persist: bool) -> Result<AnalysisResult, EngineError> {
        if !persist {
            let cached = self.analysis.get();
            self.metrics.record_cache_lookup("analysis", cached.is_some());
            if let Some(result) = cached {
                debug!("Serving analysis from cache");
                return Ok(result);
            }
        }

        let start = Instant::now();
        let clusters = self.online_clusters().await?;
        let outcome = self.fan_out(clusters).await;

        for collected in &outcome.collected {
            if persist {
                self.persist(&collected.cluster, &collected.records).await;
            }
            self.alert_on_worst(&collected.cluster, &collected.records)
                .await;
        }

        let records = outcome.records();
        let result = analyzer::analyze(&records, outcome.collected.len());
        self.inventory.set(records);
        if !persist {
            self.analysis.set(result.clone());
        }

        let elapsed = start.elapsed();
        self.metrics.observe_batch_latency(elapsed.as_secs_f64());
        self.metrics.set_analysis_totals(
            result.clusters_analyzed,
            result.total_pods,
            result.unreasonable_pods,
        );
        self.logger.log_collection(
            result.clusters_analyzed,
            outcome.failed,
            result.total_pods,
            result.unreasonable_pods,
            elapsed.as_millis() as u64,
        );

        Ok(result)
    }

    /// Collect a single cluster, persisting and alerting like `collect_all`
    pub async fn collect_cluster(
        &self,
        cluster_id: u64,
        persist: bool,
    ) -> Result<ClusterReport, EngineError> {
        let cluster = self
            .unit
            .store
            .get_cluster(cluster_id)
            .await?
            .ok_or(EngineError::ClusterNotFound(cluster_id))?;
        if !cluster.is_online() {
            return Err(EngineError::ClusterOffline(cluster.name));
        }

        let deadline = Instant::now() + self.config.cluster_deadline;
        let collected = self.unit.run(&cluster, deadline).await?;

        if persist {
            self.persist(&collected.cluster, &collected.records).await;
        }
        self.alert_on_worst(&collected.cluster, &collected.records)
            .await;

        Ok(ClusterReport {
            cluster_id: cluster.id,
            cluster_name: cluster.name,
            total_pods: collected.records.len(),
            unreasonable_pods: collected
                .records
                .iter()
                .filter(|r| r.is_unreasonable())
                .count(),
            namespaces_failed: collected.namespaces_failed,
            truncated: collected.truncated,
            elapsed_ms: collected.elapsed_ms,
        })
    }

    /// The merged inventory, polling every online cluster on a cache miss
    ///
    /// A cold fetch neither persists nor alerts. With no online clusters the
    /// inventory is empty.
    pub async fn inventory(&self) -> Result<Vec<WorkloadResourceRecord>, EngineError> {
        let cached = self.inventory.get();
        self.metrics.record_cache_lookup("inventory", cached.is_some());
        if let Some(records) = cached {
            return Ok(records);
        }

        let clusters = match self.online_clusters().await {
            Ok(clusters) => clusters,
            Err(EngineError::NoOnlineClusters) => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let records = self.fan_out(clusters).await.records();
        self.inventory.set(records.clone());
        Ok(records)
    }

    pub async fn search(
        &self,
        filter: &SearchFilter,
        page: usize,
        size: usize,
    ) -> Result<PagedResult<WorkloadResourceRecord>, EngineError> {
        let records = self.inventory().await?;
        Ok(search::search(&records, filter, page, size))
    }

    pub async fn top_by_memory(
        &self,
        limit: usize,
    ) -> Result<Vec<WorkloadResourceRecord>, EngineError> {
        let records = self.inventory().await?;
        Ok(analyzer::top_by_memory_request(&records, limit))
    }

    pub async fn top_by_cpu(&self, limit: usize) -> Result<Vec<WorkloadResourceRecord>, EngineError> {
        let records = self.inventory().await?;
        Ok(analyzer::top_by_cpu_request(&records, limit))
    }

    /// Per cluster and namespace roll-up, ordered by cluster then namespace
    pub async fn namespace_summaries(&self) -> Result<Vec<NamespaceSummary>, EngineError> {
        let records = self.inventory().await?;
        let mut groups: BTreeMap<(String, String), NamespaceSummary> = BTreeMap::new();

        for record in &records {
            let summary = groups
                .entry((record.cluster_name.clone(), record.namespace.clone()))
                .or_insert_with(|| NamespaceSummary {
                    cluster_name: record.cluster_name.clone(),
                    namespace: record.namespace.clone(),
                    total_pods: 0,
                    unreasonable_pods: 0,
                    memory_usage: 0,
                    memory_request: 0,
                    cpu_usage: 0,
                    cpu_request: 0,
                });
            summary.total_pods += 1;
            if record.is_unreasonable() {
                summary.unreasonable_pods += 1;
            }
            summary.memory_usage += record.memory_usage;
            summary.memory_request += record.memory_request;
            summary.cpu_usage += record.cpu_usage;
            summary.cpu_request += record.cpu_request;
        }

        Ok(groups.into_values().collect())
    }

    /// Workloads of one namespace across all clusters
    pub async fn namespace_workloads(
        &self,
        namespace: &str,
    ) -> Result<Vec<WorkloadResourceRecord>, EngineError> {
        let records = self.inventory().await?;
        Ok(records
            .into_iter()
            .filter(|r| r.namespace == namespace)
            .collect())
    }

    /// Expire both caches so the next read polls the clusters
    pub fn invalidate_all(&self) {
        self.inventory.invalidate();
        self.analysis.invalidate();
    }

    async fn online_clusters(&self) -> Result<Vec<ClusterDescriptor>, EngineError> {
        let roster = match self.unit.store.list_clusters().await {
            Ok(roster) => {
                self.set_health(components::CLUSTER_STORE, None).await;
                roster
            }
            Err(e) => {
                self.set_health(components::CLUSTER_STORE, Some(e.to_string()))
                    .await;
                return Err(EngineError::Roster(e));
            }
        };

        let total = roster.len();
        let online: Vec<_> = roster.into_iter().filter(|c| c.is_online()).collect();
        debug!(
            clusters = total,
            online = online.len(),
            "Loaded cluster roster"
        );

        if online.is_empty() {
            return Err(EngineError::NoOnlineClusters);
        }
        Ok(online)
    }

    async fn fan_out(&self, clusters: Vec<ClusterDescriptor>) -> BatchOutcome {
        let total = clusters.len();
        let batch_deadline = Instant::now() + self.config.batch_deadline;
        let gate = Arc::new(Semaphore::new(self.config.cluster_concurrency.max(1)));
        let mut tasks = JoinSet::new();

        for (index, cluster) in clusters.into_iter().enumerate() {
            let unit = self.unit.clone();
            let gate = gate.clone();
            let cluster_deadline = self.config.cluster_deadline;

            tasks.spawn(async move {
                // The gate is never closed, so the permit is always granted
                let _permit = gate.acquire_owned().await;
                let deadline = (Instant::now() + cluster_deadline).min(batch_deadline);
                (index, unit.run(&cluster, deadline).await)
            });
        }

        let mut finished: Vec<(usize, CollectedCluster)> = Vec::with_capacity(total);
        let mut failed = 0usize;

        loop {
            match timeout_at(batch_deadline, tasks.join_next()).await {
                Ok(Some(Ok((index, Ok(collected))))) => finished.push((index, collected)),
                Ok(Some(Ok((_, Err(e))))) => {
                    debug!(error = %e, "Cluster excluded from batch");
                    failed += 1;
                }
                Ok(Some(Err(e))) => {
                    warn!(error = %e, "Cluster task failed");
                    failed += 1;
                }
                Ok(None) => break,
                Err(_) => {
                    let pending = tasks.len();
                    warn!(
                        pending = pending,
                        deadline_secs = self.config.batch_deadline.as_secs(),
                        "Batch deadline reached, returning partial results"
                    );
                    tasks.abort_all();
                    failed += pending;
                    break;
                }
            }
        }

        finished.sort_by_key(|(index, _)| *index);
        let collected: Vec<CollectedCluster> = finished.into_iter().map(|(_, c)| c).collect();

        let status = if failed == 0 {
            None
        } else {
            Some(format!("{failed} of {total} clusters failed to collect"))
        };
        self.set_health(components::COLLECTOR, status).await;

        info!(
            clusters = total,
            collected = collected.len(),
            failed = failed,
            "Fan-out complete"
        );

        BatchOutcome { collected, failed }
    }

    /// Alerts cover the cluster's worst records only, ranked by severity
    async fn alert_on_worst(
        &self,
        cluster: &ClusterDescriptor,
        records: &[WorkloadResourceRecord],
    ) {
        let ranked = analyzer::analyze(records, 1).top_problems;
        self.alerts.emit_cluster_alerts(cluster, &ranked).await;
    }

    async fn persist(&self, cluster: &ClusterDescriptor, records: &[WorkloadResourceRecord]) {
        if let Err(e) = self.persistence.save_records(cluster.id, records).await {
            warn!(
                cluster = %cluster.name,
                records = records.len(),
                error = %e,
                "Failed to persist cluster records"
            );
        }
    }

    /// `None` marks the component healthy. A roster failure is unhealthy,
    /// collection failures only degrade.
    async fn set_health(&self, component: &str, problem: Option<String>) {
        let Some(registry) = &self.health else {
            return;
        };
        match problem {
            None => registry.set_healthy(component).await,
            Some(message) if component == components::CLUSTER_STORE => {
                registry.set_unhealthy(component, message).await
            }
            Some(message) => registry.set_degraded(component, message).await,
        }
    }
}
