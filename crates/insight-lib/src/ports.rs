//! Collaborator interfaces the engine calls out to
//!
//! The engine never owns credential storage, history persistence or the
//! activity ledger. Implementations are injected as trait objects:
//! - `ClusterConfigStore` supplies the roster and live cluster clients
//! - `PersistenceStore` receives full per-cluster snapshots
//! - `ActivityRecorder` receives connection, collection and alert events

use async_trait::async_trait;

use crate::collector::ClusterHandle;
use crate::error::{ClientBuildError, StoreError};
use crate::models::{AlertLevel, AlertRecord, ClusterDescriptor, WorkloadResourceRecord};

#[async_trait]
pub trait ClusterConfigStore: Send + Sync {
    /// Current cluster roster, in any status
    async fn list_clusters(&self) -> Result<Vec<ClusterDescriptor>, StoreError>;

    async fn get_cluster(&self, id: u64) -> Result<Option<ClusterDescriptor>, StoreError>;

    /// Decrypt the cluster's credentials and build workload and metrics clients
    async fn build_client(&self, cluster: &ClusterDescriptor)
        -> Result<ClusterHandle, ClientBuildError>;
}

#[async_trait]
pub trait PersistenceStore: Send + Sync {
    async fn save_records(
        &self,
        cluster_id: u64,
        records: &[WorkloadResourceRecord],
    ) -> Result<(), StoreError>;

    /// Delete history older than the retention window, returning rows removed
    async fn cleanup_history(&self, retention_days: u32) -> Result<u64, StoreError>;
}

#[async_trait]
pub trait ActivityRecorder: Send + Sync {
    async fn record_connection_event(
        &self,
        cluster: &ClusterDescriptor,
        success: bool,
        message: &str,
    ) -> Result<(), StoreError>;

    async fn record_collection_event(
        &self,
        cluster: &ClusterDescriptor,
        success: bool,
        workloads: usize,
        message: &str,
    ) -> Result<(), StoreError>;

    /// Per-workload finding, `critical` or `warning`
    async fn record_resource_alert(
        &self,
        cluster: &ClusterDescriptor,
        pod_name: &str,
        severity: &str,
        message: &str,
    ) -> Result<(), StoreError>;

    /// Persist a new alert and return its ledger id
    async fn record_alert(&self, alert: &AlertRecord) -> Result<u64, StoreError>;

    async fn record_summary_alert(&self, alert: &AlertRecord) -> Result<u64, StoreError>;

    /// Bump the occurrence count of an alert whose repeats were suppressed
    async fn update_alert_occurrences(&self, alert_id: u64, occurrences: u32)
        -> Result<(), StoreError>;

    async fn record_system_event(
        &self,
        level: AlertLevel,
        title: &str,
        message: &str,
    ) -> Result<(), StoreError>;

    async fn cleanup_duplicate_alerts(&self) -> Result<u64, StoreError>;

    async fn cleanup_old_activities(&self, retention_days: u32) -> Result<u64, StoreError>;
}
