//! Single-cluster collection pass
//!
//! Namespaces are processed concurrently behind a fixed-size gate, all under
//! one cluster deadline. Each namespace also gets its own deadline, and its
//! workload listing is retried with linear backoff. Metrics are optional:
//! a failed or slow metrics listing falls back to estimation.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::{sleep, timeout, timeout_at, Instant};
use tracing::{debug, info, warn};

use super::{extract_record, ClusterHandle, PodSnapshot, UsageSample};
use crate::analyzer;
use crate::error::CollectorError;
use crate::models::WorkloadResourceRecord;

/// Configuration for a single-cluster pass
#[derive(Debug, Clone)]
pub struct CollectorConfig {
    /// Namespaces processed at once (default: 3)
    pub namespace_concurrency: usize,
    /// Deadline for the whole cluster pass (default: 5 minutes)
    pub cluster_deadline: Duration,
    /// Deadline for one namespace including retries (default: 60 seconds)
    pub namespace_deadline: Duration,
    /// Deadline for one listing request (default: 30 seconds)
    pub request_timeout: Duration,
    /// Deadline for one metrics listing (default: 15 seconds)
    pub metrics_timeout: Duration,
    /// Extra attempts for a failed workload listing (default: 2)
    pub workload_retries: u32,
    /// Backoff step, multiplied by the attempt number (default: 2 seconds)
    pub retry_backoff: Duration,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            namespace_concurrency: 3,
            cluster_deadline: Duration::from_secs(300),
            namespace_deadline: Duration::from_secs(60),
            request_timeout: Duration::from_secs(30),
            metrics_timeout: Duration::from_secs(15),
            workload_retries: 2,
            retry_backoff: Duration::from_secs(2),
        }
    }
}

/// Stands in for a failed namespace whose task died before the deadline
pub const UNKNOWN_NAMESPACE: &str = "<unknown>";

/// Records of one cluster pass, partitioned by namespace
#[derive(Debug, Clone, Default)]
pub struct ClusterCollection {
    pub by_namespace: BTreeMap<String, Vec<WorkloadResourceRecord>>,
    pub failed_namespaces: Vec<String>,
    /// The cluster deadline cut the pass short
    pub truncated: bool,
}

impl ClusterCollection {
    pub fn workload_count(&self) -> usize {
        self.by_namespace.values().map(Vec::len).sum()
    }

    pub fn into_records(self) -> Vec<WorkloadResourceRecord> {
        self.by_namespace.into_values().flatten().collect()
    }
}

/// Collects classified workload records from one cluster
#[derive(Debug, Clone, Default)]
pub struct ClusterCollector {
    config: CollectorConfig,
}

impl ClusterCollector {
    pub fn new(config: CollectorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CollectorConfig {
        &self.config
    }

    /// Run a full pass over every namespace of the cluster
    ///
    /// Only the namespace listing itself is fatal. Namespace failures are
    /// logged and skipped, and the cluster deadline returns partial results.
    pub async fn collect(
        &self,
        handle: &ClusterHandle,
        cluster_name: &str,
    ) -> Result<ClusterCollection, CollectorError> {
        let deadline = Instant::now() + self.config.cluster_deadline;
        self.collect_until(handle, cluster_name, deadline).await
    }

    /// Like `collect`, truncating at an absolute deadline set by the caller
    pub async fn collect_until(
        &self,
        handle: &ClusterHandle,
        cluster_name: &str,
        deadline: Instant,
    ) -> Result<ClusterCollection, CollectorError> {
        let start = Instant::now();

        let namespaces = match timeout(
            self.config.request_timeout,
            handle.workloads.list_namespaces(),
        )
        .await
        {
            Ok(result) => result?,
            Err(_) => return Err(CollectorError::Timeout(self.config.request_timeout)),
        };

        debug!(
            cluster = %cluster_name,
            namespaces = namespaces.len(),
            "Collecting cluster workloads"
        );

        let gate = Arc::new(Semaphore::new(self.config.namespace_concurrency.max(1)));
        let mut tasks = JoinSet::new();
        // A panicked task reports no namespace, so track what is outstanding
        let mut pending: BTreeSet<String> = namespaces.iter().cloned().collect();
        let mut lost_tasks = 0usize;

        for namespace in namespaces {
            let gate = gate.clone();
            let handle = handle.clone();
            let config = self.config.clone();
            let cluster_name = cluster_name.to_string();

            tasks.spawn(async move {
                let Ok(_permit) = gate.acquire_owned().await else {
                    return (namespace, Err(CollectorError::Timeout(Duration::ZERO)));
                };
                let result = match timeout(
                    config.namespace_deadline,
                    collect_namespace(&handle, &namespace, &cluster_name, &config),
                )
                .await
                {
                    Ok(result) => result,
                    Err(_) => Err(CollectorError::Timeout(config.namespace_deadline)),
                };
                (namespace, result)
            });
        }

        let mut collection = ClusterCollection::default();

        loop {
            match timeout_at(deadline, tasks.join_next()).await {
                Ok(Some(Ok((namespace, Ok(records))))) => {
                    pending.remove(&namespace);
                    collection.by_namespace.insert(namespace, records);
                }
                Ok(Some(Ok((namespace, Err(e))))) => {
                    warn!(
                        cluster = %cluster_name,
                        namespace = %namespace,
                        error = %e,
                        "Skipping namespace"
                    );
                    pending.remove(&namespace);
                    collection.failed_namespaces.push(namespace);
                }
                Ok(Some(Err(e))) => {
                    warn!(cluster = %cluster_name, error = %e, "Namespace task failed");
                    lost_tasks += 1;
                }
                Ok(None) => break,
                Err(_) => {
                    warn!(
                        cluster = %cluster_name,
                        pending = tasks.len(),
                        elapsed_ms = start.elapsed().as_millis() as u64,
                        "Cluster deadline reached, returning partial results"
                    );
                    tasks.abort_all();
                    collection.truncated = true;
                    break;
                }
            }
        }

        if collection.truncated {
            // Lost tasks cannot be told apart from the ones the deadline cut
            collection
                .failed_namespaces
                .extend((0..lost_tasks).map(|_| UNKNOWN_NAMESPACE.to_string()));
        } else {
            collection.failed_namespaces.extend(pending);
        }

        info!(
            cluster = %cluster_name,
            workloads = collection.workload_count(),
            namespaces = collection.by_namespace.len(),
            failed_namespaces = collection.failed_namespaces.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Cluster collection complete"
        );

        Ok(collection)
    }
}

async fn collect_namespace(
    handle: &ClusterHandle,
    namespace: &str,
    cluster_name: &str,
    config: &CollectorConfig,
) -> Result<Vec<WorkloadResourceRecord>, CollectorError> {
    let pods = list_workloads_with_retry(handle, namespace, config).await?;
    let usage = list_usage(handle, namespace, config).await;

    Ok(pods
        .iter()
        .filter(|pod| pod.is_running())
        .map(|pod| {
            let mut record = extract_record(pod, usage.get(&pod.name), cluster_name);
            analyzer::classify(&mut record);
            record
        })
        .collect())
}

async fn list_workloads_with_retry(
    handle: &ClusterHandle,
    namespace: &str,
    config: &CollectorConfig,
) -> Result<Vec<PodSnapshot>, CollectorError> {
    let mut attempt = 0u32;

    loop {
        let error = match timeout(
            config.request_timeout,
            handle.workloads.list_workloads(namespace),
        )
        .await
        {
            Ok(Ok(pods)) => return Ok(pods),
            Ok(Err(e)) => e,
            Err(_) => CollectorError::Timeout(config.request_timeout),
        };

        if attempt >= config.workload_retries {
            return Err(error);
        }
        attempt += 1;

        debug!(
            namespace = %namespace,
            attempt = attempt,
            error = %error,
            "Retrying workload listing"
        );
        sleep(config.retry_backoff * attempt).await;
    }
}

/// Metrics are best effort; any failure yields an empty map
async fn list_usage(
    handle: &ClusterHandle,
    namespace: &str,
    config: &CollectorConfig,
) -> HashMap<String, UsageSample> {
    match timeout(config.metrics_timeout, handle.metrics.list_usage(namespace)).await {
        Ok(Ok(samples)) => samples.into_iter().collect(),
        Ok(Err(e)) => {
            debug!(namespace = %namespace, error = %e, "Metrics unavailable, estimating usage");
            HashMap::new()
        }
        Err(_) => {
            debug!(
                namespace = %namespace,
                timeout_secs = config.metrics_timeout.as_secs(),
                "Metrics listing timed out, estimating usage"
            );
            HashMap::new()
        }
    }
}
