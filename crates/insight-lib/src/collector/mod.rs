//! Workload resource collection from a single cluster
//!
//! This module turns a cluster's workload and metrics listings into
//! classified `WorkloadResourceRecord`s. Cluster access goes through the
//! `WorkloadSource` and `MetricsSource` traits; `KubeClusterClient` is the
//! live implementation over the Kubernetes API.

mod cluster;
mod extract;
mod kube_client;
mod quantity;


pub use cluster::{ClusterCollection, ClusterCollector, CollectorConfig, UNKNOWN_NAMESPACE};
pub use extract::{
    extract_record, DEFAULT_CPU_LIMIT, DEFAULT_CPU_REQUEST, DEFAULT_MEMORY_LIMIT,
    DEFAULT_MEMORY_REQUEST,
};
pub use kube_client::{connect, KubeClusterClient, PodMetrics};
pub use quantity::{parse_cpu_millicores, parse_memory_bytes};

use crate::error::CollectorError;
use chrono::{DateTime, Utc};
use std::sync::Arc;

pub use async_trait::async_trait;

pub const RUNNING_PHASE: &str = "Running";

/// Declared resources of one container, already parsed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerResources {
    pub name: String,
    pub memory_request: Option<u64>,
    pub memory_limit: Option<u64>,
    pub cpu_request: Option<u64>,
    pub cpu_limit: Option<u64>,
}

/// A workload as listed from the cluster
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodSnapshot {
    pub name: String,
    pub namespace: String,
    pub node_name: String,
    pub phase: String,
    pub creation_time: DateTime<Utc>,
    pub containers: Vec<ContainerResources>,
}

impl PodSnapshot {
    pub fn is_running(&self) -> bool {
        self.phase == RUNNING_PHASE
    }
}

/// Usage of one workload summed over its containers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UsageSample {
    pub memory_bytes: u64,
    pub cpu_millicores: u64,
}

/// Trait for listing namespaces and workloads of a cluster
#[async_trait]
pub trait WorkloadSource: Send + Sync {
    async fn list_namespaces(&self) -> Result<Vec<String>, CollectorError>;

    async fn list_workloads(&self, namespace: &str) -> Result<Vec<PodSnapshot>, CollectorError>;
}

/// Trait for reading live usage samples, keyed by pod name
#[async_trait]
pub trait MetricsSource: Send + Sync {
    async fn list_usage(
        &self,
        namespace: &str,
    ) -> Result<Vec<(String, UsageSample)>, CollectorError>;
}

/// Live access to one cluster
#[derive(Clone)]
pub struct ClusterHandle {
    pub workloads: Arc<dyn WorkloadSource>,
    pub metrics: Arc<dyn MetricsSource>,
}

impl ClusterHandle {
    pub fn new(workloads: Arc<dyn WorkloadSource>, metrics: Arc<dyn MetricsSource>) -> Self {
        Self { workloads, metrics }
    }

    /// Handle backed by one client serving both listings
    pub fn from_client<C>(client: C) -> Self
    where
        C: WorkloadSource + MetricsSource + 'static,
    {
        let client = Arc::new(client);
        Self {
            workloads: client.clone(),
            metrics: client,
        }
    }
}

impl std::fmt::Debug for ClusterHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterHandle").finish_non_exhaustive()
    }
}
