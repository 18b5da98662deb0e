//! In-memory fakes for the cluster sources and the collaborator ports

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};

use crate::collector::{
    ClusterHandle, ContainerResources, MetricsSource, PodSnapshot, UsageSample, WorkloadSource,
};
use crate::error::{ClientBuildError, CollectorError, StoreError};
use crate::models::{
    AlertLevel, AlertRecord, AuthType, ClusterDescriptor, ClusterStatus, WorkloadResourceRecord,
    WorkloadStatus, MIB,
};
use crate::ports::{ActivityRecorder, ClusterConfigStore, PersistenceStore};

pub(crate) fn descriptor(id: u64, name: &str) -> ClusterDescriptor {
    ClusterDescriptor {
        id,
        name: name.to_string(),
        api_server: format!("https://{name}.example:6443"),
        auth_type: AuthType::Token,
        status: ClusterStatus::Online,
        collect_interval_mins: None,
    }
}

pub(crate) fn container(
    memory_request_mib: Option<u64>,
    memory_limit_mib: Option<u64>,
    cpu_request: Option<u64>,
    cpu_limit: Option<u64>,
) -> ContainerResources {
    ContainerResources {
        name: "app".to_string(),
        memory_request: memory_request_mib.map(|m| m * MIB),
        memory_limit: memory_limit_mib.map(|m| m * MIB),
        cpu_request,
        cpu_limit,
    }
}

pub(crate) fn pod(namespace: &str, name: &str, phase: &str, containers: Vec<ContainerResources>) -> PodSnapshot {
    PodSnapshot {
        name: name.to_string(),
        namespace: namespace.to_string(),
        node_name: "node-1".to_string(),
        phase: phase.to_string(),
        creation_time: Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap(),
        containers,
    }
}

/// A running pod with 100Mi/200Mi memory and 100m/200m CPU
pub(crate) fn running_pod(namespace: &str, name: &str) -> PodSnapshot {
    pod(
        namespace,
        name,
        "Running",
        vec![container(Some(100), Some(200), Some(100), Some(200))],
    )
}

/// A classified record with sane utilization
pub(crate) fn sample_record(cluster: &str, namespace: &str, pod_name: &str) -> WorkloadResourceRecord {
    WorkloadResourceRecord {
        pod_name: pod_name.to_string(),
        namespace: namespace.to_string(),
        node_name: "node-1".to_string(),
        cluster_name: cluster.to_string(),
        memory_usage: 80 * MIB,
        memory_request: 100 * MIB,
        memory_limit: 200 * MIB,
        cpu_usage: 80,
        cpu_request: 100,
        cpu_limit: 200,
        memory_req_pct: 80.0,
        memory_limit_pct: 40.0,
        cpu_req_pct: 80.0,
        cpu_limit_pct: 40.0,
        memory_request_declared: true,
        cpu_request_declared: true,
        metrics_estimated: false,
        status: WorkloadStatus::Reasonable,
        issues: Vec::new(),
        score: 0.0,
        creation_time: Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap(),
    }
}

/// Scriptable cluster serving both listings
#[derive(Default)]
pub(crate) struct FakeCluster {
    namespaces: Vec<String>,
    pods: HashMap<String, Vec<PodSnapshot>>,
    usage: HashMap<String, Vec<(String, UsageSample)>>,
    namespace_error: bool,
    /// Failures to return per namespace before listing succeeds
    workload_failures: HashMap<String, usize>,
    metrics_error: bool,
    workload_delay: HashMap<String, Duration>,
    metrics_delay: Option<Duration>,
    panicking_workloads: Vec<String>,
    pub workload_calls: AtomicUsize,
    pub metrics_calls: AtomicUsize,
    attempts: Mutex<HashMap<String, usize>>,
}

impl FakeCluster {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_pods(mut self, namespace: &str, pods: Vec<PodSnapshot>) -> Self {
        if !self.namespaces.iter().any(|ns| ns == namespace) {
            self.namespaces.push(namespace.to_string());
        }
        self.pods.insert(namespace.to_string(), pods);
        self
    }

    pub(crate) fn with_usage(mut self, namespace: &str, pod: &str, memory_mib: u64, cpu_millicores: u64) -> Self {
        self.usage.entry(namespace.to_string()).or_default().push((
            pod.to_string(),
            UsageSample {
                memory_bytes: memory_mib * MIB,
                cpu_millicores,
            },
        ));
        self
    }

    pub(crate) fn failing_namespaces(mut self) -> Self {
        self.namespace_error = true;
        self
    }

    pub(crate) fn failing_workloads(mut self, namespace: &str, times: usize) -> Self {
        self.workload_failures.insert(namespace.to_string(), times);
        self
    }

    pub(crate) fn failing_metrics(mut self) -> Self {
        self.metrics_error = true;
        self
    }

    pub(crate) fn slow_workloads(mut self, namespace: &str, delay: Duration) -> Self {
        self.workload_delay.insert(namespace.to_string(), delay);
        self
    }

    pub(crate) fn panicking_workloads(mut self, namespace: &str) -> Self {
        self.panicking_workloads.push(namespace.to_string());
        self
    }

    pub(crate) fn slow_metrics(mut self, delay: Duration) -> Self {
        self.metrics_delay = Some(delay);
        self
    }

    pub(crate) fn handle(self: &Arc<Self>) -> ClusterHandle {
        ClusterHandle::new(self.clone(), self.clone())
    }

    pub(crate) fn into_handle(self) -> ClusterHandle {
        Arc::new(self).handle()
    }
}

#[async_trait]
impl WorkloadSource for FakeCluster {
    async fn list_namespaces(&self) -> Result<Vec<String>, CollectorError> {
        if self.namespace_error {
            return Err(CollectorError::NamespaceList("forbidden".to_string()));
        }
        Ok(self.namespaces.clone())
    }

    async fn list_workloads(&self, namespace: &str) -> Result<Vec<PodSnapshot>, CollectorError> {
        self.workload_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.workload_delay.get(namespace) {
            tokio::time::sleep(*delay).await;
        }
        if self.panicking_workloads.iter().any(|ns| ns == namespace) {
            panic!("workload listing for {namespace} panicked");
        }

        let attempt = {
            let mut attempts = self.attempts.lock().unwrap();
            let counter = attempts.entry(namespace.to_string()).or_insert(0);
            *counter += 1;
            *counter
        };
        let failures = self.workload_failures.get(namespace).copied().unwrap_or(0);
        if attempt <= failures {
            return Err(CollectorError::WorkloadList {
                namespace: namespace.to_string(),
                message: format!("attempt {attempt} failed"),
            });
        }

        Ok(self.pods.get(namespace).cloned().unwrap_or_default())
    }
}

#[async_trait]
impl MetricsSource for FakeCluster {
    async fn list_usage(&self, namespace: &str) -> Result<Vec<(String, UsageSample)>, CollectorError> {
        self.metrics_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.metrics_delay {
            tokio::time::sleep(delay).await;
        }
        if self.metrics_error {
            return Err(CollectorError::MetricsList {
                namespace: namespace.to_string(),
                message: "metrics API not available".to_string(),
            });
        }
        Ok(self.usage.get(namespace).cloned().unwrap_or_default())
    }
}

/// Roster plus prepared handles; clusters without a handle fail to connect
#[derive(Default)]
pub(crate) struct FakeStore {
    clusters: Mutex<Vec<ClusterDescriptor>>,
    handles: Mutex<HashMap<u64, ClusterHandle>>,
    roster_error: AtomicBool,
    pub list_calls: AtomicUsize,
    pub build_calls: AtomicUsize,
}

impl FakeStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_cluster(self, cluster: ClusterDescriptor, handle: Option<ClusterHandle>) -> Self {
        self.add_cluster(cluster, handle);
        self
    }

    pub(crate) fn add_cluster(&self, cluster: ClusterDescriptor, handle: Option<ClusterHandle>) {
        if let Some(handle) = handle {
            self.handles.lock().unwrap().insert(cluster.id, handle);
        }
        let mut clusters = self.clusters.lock().unwrap();
        clusters.retain(|c| c.id != cluster.id);
        clusters.push(cluster);
    }

    pub(crate) fn remove_cluster(&self, id: u64) {
        self.clusters.lock().unwrap().retain(|c| c.id != id);
    }

    pub(crate) fn update_cluster(&self, cluster: ClusterDescriptor) {
        let mut clusters = self.clusters.lock().unwrap();
        if let Some(existing) = clusters.iter_mut().find(|c| c.id == cluster.id) {
            *existing = cluster;
        }
    }

    pub(crate) fn fail_roster(&self, fail: bool) {
        self.roster_error.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl ClusterConfigStore for FakeStore {
    async fn list_clusters(&self) -> Result<Vec<ClusterDescriptor>, StoreError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if self.roster_error.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("database is down".to_string()));
        }
        Ok(self.clusters.lock().unwrap().clone())
    }

    async fn get_cluster(&self, id: u64) -> Result<Option<ClusterDescriptor>, StoreError> {
        if self.roster_error.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("database is down".to_string()));
        }
        Ok(self.clusters.lock().unwrap().iter().find(|c| c.id == id).cloned())
    }

    async fn build_client(&self, cluster: &ClusterDescriptor) -> Result<ClusterHandle, ClientBuildError> {
        self.build_calls.fetch_add(1, Ordering::SeqCst);
        self.handles
            .lock()
            .unwrap()
            .get(&cluster.id)
            .cloned()
            .ok_or_else(|| ClientBuildError::Client("connection refused".to_string()))
    }
}

#[derive(Default)]
pub(crate) struct RecordingPersistence {
    saved: Mutex<Vec<(u64, usize)>>,
    cleanups: Mutex<Vec<u32>>,
    fail: AtomicBool,
}

impl RecordingPersistence {
    pub(crate) fn failing() -> Self {
        let persistence = Self::default();
        persistence.fail.store(true, Ordering::SeqCst);
        persistence
    }

    /// (cluster id, record count) per save call
    pub(crate) fn saved(&self) -> Vec<(u64, usize)> {
        self.saved.lock().unwrap().clone()
    }

    pub(crate) fn cleanups(&self) -> Vec<u32> {
        self.cleanups.lock().unwrap().clone()
    }
}

#[async_trait]
impl PersistenceStore for RecordingPersistence {
    async fn save_records(&self, cluster_id: u64, records: &[WorkloadResourceRecord]) -> Result<(), StoreError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(StoreError::Io("disk full".to_string()));
        }
        self.saved.lock().unwrap().push((cluster_id, records.len()));
        Ok(())
    }

    async fn cleanup_history(&self, retention_days: u32) -> Result<u64, StoreError> {
        self.cleanups.lock().unwrap().push(retention_days);
        Ok(3)
    }
}

#[derive(Default)]
pub(crate) struct RecordingActivity {
    connections: Mutex<Vec<(u64, bool)>>,
    collections: Mutex<Vec<(u64, bool, usize)>>,
    resource_alerts: Mutex<Vec<(String, String)>>,
    alerts: Mutex<Vec<AlertRecord>>,
    summary_alerts: Mutex<Vec<AlertRecord>>,
    occurrence_updates: Mutex<Vec<(u64, u32)>>,
    system_events: Mutex<Vec<(AlertLevel, String)>>,
    retention_calls: Mutex<Vec<u32>>,
    pub duplicate_sweeps: AtomicUsize,
    next_id: AtomicU64,
}

impl RecordingActivity {
    pub(crate) fn connection_events(&self) -> Vec<(u64, bool)> {
        self.connections.lock().unwrap().clone()
    }

    pub(crate) fn collection_events(&self) -> Vec<(u64, bool, usize)> {
        self.collections.lock().unwrap().clone()
    }

    /// (pod, severity) per resource alert
    pub(crate) fn resource_alerts(&self) -> Vec<(String, String)> {
        self.resource_alerts.lock().unwrap().clone()
    }

    pub(crate) fn alerts(&self) -> Vec<AlertRecord> {
        self.alerts.lock().unwrap().clone()
    }

    pub(crate) fn summary_alerts(&self) -> Vec<AlertRecord> {
        self.summary_alerts.lock().unwrap().clone()
    }

    pub(crate) fn occurrence_updates(&self) -> Vec<(u64, u32)> {
        self.occurrence_updates.lock().unwrap().clone()
    }

    pub(crate) fn system_events(&self) -> Vec<(AlertLevel, String)> {
        self.system_events.lock().unwrap().clone()
    }

    pub(crate) fn retention_calls(&self) -> Vec<u32> {
        self.retention_calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ActivityRecorder for RecordingActivity {
    async fn record_connection_event(
        &self,
        cluster: &ClusterDescriptor,
        success: bool,
        _message: &str,
    ) -> Result<(), StoreError> {
        self.connections.lock().unwrap().push((cluster.id, success));
        Ok(())
    }

    async fn record_collection_event(
        &self,
        cluster: &ClusterDescriptor,
        success: bool,
        workloads: usize,
        _message: &str,
    ) -> Result<(), StoreError> {
        self.collections
            .lock()
            .unwrap()
            .push((cluster.id, success, workloads));
        Ok(())
    }

    async fn record_resource_alert(
        &self,
        _cluster: &ClusterDescriptor,
        pod_name: &str,
        severity: &str,
        _message: &str,
    ) -> Result<(), StoreError> {
        self.resource_alerts
            .lock()
            .unwrap()
            .push((pod_name.to_string(), severity.to_string()));
        Ok(())
    }

    async fn record_alert(&self, alert: &AlertRecord) -> Result<u64, StoreError> {
        self.alerts.lock().unwrap().push(alert.clone());
        Ok(self.next_id.fetch_add(1, Ordering::SeqCst) + 1)
    }

    async fn record_summary_alert(&self, alert: &AlertRecord) -> Result<u64, StoreError> {
        self.summary_alerts.lock().unwrap().push(alert.clone());
        Ok(self.next_id.fetch_add(1, Ordering::SeqCst) + 1)
    }

    async fn update_alert_occurrences(&self, alert_id: u64, occurrences: u32) -> Result<(), StoreError> {
        self.occurrence_updates
            .lock()
            .unwrap()
            .push((alert_id, occurrences));
        Ok(())
    }

    async fn record_system_event(&self, level: AlertLevel, title: &str, _message: &str) -> Result<(), StoreError> {
        self.system_events
            .lock()
            .unwrap()
            .push((level, title.to_string()));
        Ok(())
    }

    async fn cleanup_duplicate_alerts(&self) -> Result<u64, StoreError> {
        self.duplicate_sweeps.fetch_add(1, Ordering::SeqCst);
        Ok(2)
    }

    async fn cleanup_old_activities(&self, retention_days: u32) -> Result<u64, StoreError> {
        self.retention_calls.lock().unwrap().push(retention_days);
        Ok(5)
    }
}
