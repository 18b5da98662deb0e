//! Kubernetes API access for workload and metrics listings
//!
//! Pod metrics come from the `metrics.k8s.io/v1beta1` API served by
//! metrics-server, modelled here as a namespaced resource so the regular
//! `kube::Api` machinery can list it.

use std::collections::BTreeMap;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::Utc;
use k8s_openapi::api::core::v1::{Container, Namespace, Pod};
use k8s_openapi::apimachinery::pkg::{api::resource::Quantity, apis::meta::v1::ObjectMeta};
use kube::{
    api::{Api, ListParams},
    config::{KubeConfigOptions, Kubeconfig},
    Client, Config,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{
    parse_cpu_millicores, parse_memory_bytes, ContainerResources, MetricsSource, PodSnapshot,
    UsageSample, WorkloadSource,
};
use crate::error::{ClientBuildError, CollectorError};
use crate::models::{AuthType, ClusterCredentials, ClusterDescriptor};

const CONTEXT_NAME: &str = "cluster-insight";

#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct PodMetricsContainer {
    pub name: String,
    pub usage: BTreeMap<String, Quantity>,
}

#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct PodMetrics {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub window: Option<String>,
    #[serde(default)]
    pub containers: Vec<PodMetricsContainer>,
}

impl k8s_openapi::Resource for PodMetrics {
    type Scope = k8s_openapi::NamespaceResourceScope;

    const API_VERSION: &'static str = "metrics.k8s.io/v1beta1";
    const GROUP: &'static str = "metrics.k8s.io";
    const KIND: &'static str = "PodMetrics";
    const URL_PATH_SEGMENT: &'static str = "pods";
    const VERSION: &'static str = "v1beta1";
}

impl k8s_openapi::Metadata for PodMetrics {
    type Ty = ObjectMeta;

    fn metadata(&self) -> &Self::Ty {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut Self::Ty {
        &mut self.metadata
    }
}

impl PodMetrics {
    /// Usage summed over all containers
    pub fn total_usage(&self) -> UsageSample {
        self.containers
            .iter()
            .fold(UsageSample::default(), |mut total, container| {
                if let Some(memory) = container.usage.get("memory") {
                    total.memory_bytes += parse_memory_bytes(&memory.0).unwrap_or(0);
                }
                if let Some(cpu) = container.usage.get("cpu") {
                    total.cpu_millicores += parse_cpu_millicores(&cpu.0).unwrap_or(0);
                }
                total
            })
    }
}

/// Live cluster client serving both workload and metrics listings
#[derive(Clone)]
pub struct KubeClusterClient {
    client: Client,
}

impl KubeClusterClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl WorkloadSource for KubeClusterClient {
    async fn list_namespaces(&self) -> Result<Vec<String>, CollectorError> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        let namespaces = api
            .list(&ListParams::default())
            .await
            .map_err(|e| CollectorError::NamespaceList(e.to_string()))?;

        Ok(namespaces
            .items
            .into_iter()
            .filter_map(|ns| ns.metadata.name)
            .collect())
    }

    async fn list_workloads(&self, namespace: &str) -> Result<Vec<PodSnapshot>, CollectorError> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let pods = api
            .list(&ListParams::default())
            .await
            .map_err(|e| CollectorError::WorkloadList {
                namespace: namespace.to_string(),
                message: e.to_string(),
            })?;

        Ok(pods
            .items
            .iter()
            .map(|pod| pod_snapshot(pod, namespace))
            .collect())
    }
}

#[async_trait]
impl MetricsSource for KubeClusterClient {
    async fn list_usage(
        &self,
        namespace: &str,
    ) -> Result<Vec<(String, UsageSample)>, CollectorError> {
        let api: Api<PodMetrics> = Api::namespaced(self.client.clone(), namespace);
        let metrics = api
            .list(&ListParams::default())
            .await
            .map_err(|e| CollectorError::MetricsList {
                namespace: namespace.to_string(),
                message: e.to_string(),
            })?;

        Ok(metrics
            .items
            .iter()
            .filter_map(|m| m.metadata.name.clone().map(|name| (name, m.total_usage())))
            .collect())
    }
}

fn pod_snapshot(pod: &Pod, namespace: &str) -> PodSnapshot {
    let spec = pod.spec.as_ref();

    PodSnapshot {
        name: pod.metadata.name.clone().unwrap_or_default(),
        namespace: pod
            .metadata
            .namespace
            .clone()
            .unwrap_or_else(|| namespace.to_string()),
        node_name: spec.and_then(|s| s.node_name.clone()).unwrap_or_default(),
        phase: pod
            .status
            .as_ref()
            .and_then(|s| s.phase.clone())
            .unwrap_or_default(),
        creation_time: pod
            .metadata
            .creation_timestamp
            .as_ref()
            .map(|t| t.0)
            .unwrap_or_else(Utc::now),
        containers: spec
            .map(|s| s.containers.iter().map(container_resources).collect())
            .unwrap_or_default(),
    }
}

fn container_resources(container: &Container) -> ContainerResources {
    let resources = container.resources.as_ref();
    let requests = resources.and_then(|r| r.requests.as_ref());
    let limits = resources.and_then(|r| r.limits.as_ref());

    let quantity = |map: Option<&BTreeMap<String, Quantity>>, key: &str, cpu: bool| {
        let raw = map.and_then(|m| m.get(key))?;
        let parsed = if cpu {
            parse_cpu_millicores(&raw.0)
        } else {
            parse_memory_bytes(&raw.0)
        };
        if parsed.is_none() {
            debug!(container = %container.name, quantity = %raw.0, "Ignoring unparseable quantity");
        }
        parsed.filter(|v| *v > 0)
    };

    ContainerResources {
        name: container.name.clone(),
        memory_request: quantity(requests, "memory", false),
        memory_limit: quantity(limits, "memory", false),
        cpu_request: quantity(requests, "cpu", true),
        cpu_limit: quantity(limits, "cpu", true),
    }
}

/// Build a live client for a cluster from its decrypted credentials
pub async fn connect(
    cluster: &ClusterDescriptor,
    credentials: &ClusterCredentials,
) -> Result<KubeClusterClient, ClientBuildError> {
    let kubeconfig = kubeconfig_for(cluster, credentials)?;

    let config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
        .await
        .map_err(|e| ClientBuildError::Kubeconfig(e.to_string()))?;
    let client = Client::try_from(config).map_err(|e| ClientBuildError::Client(e.to_string()))?;

    debug!(cluster = %cluster.name, auth_type = %cluster.auth_type, "Built cluster client");
    Ok(KubeClusterClient::new(client))
}

fn kubeconfig_for(
    cluster: &ClusterDescriptor,
    credentials: &ClusterCredentials,
) -> Result<Kubeconfig, ClientBuildError> {
    let required = |value: &Option<String>, field: &'static str| {
        value
            .as_deref()
            .filter(|v| !v.trim().is_empty())
            .map(str::to_string)
            .ok_or_else(|| ClientBuildError::MissingCredential {
                auth_type: cluster.auth_type.to_string(),
                field,
            })
    };

    let (cluster_entry, user_entry) = match cluster.auth_type {
        AuthType::Kubeconfig => {
            let raw = required(&credentials.kubeconfig, "kubeconfig")?;
            return Kubeconfig::from_yaml(&raw)
                .map_err(|e| ClientBuildError::Kubeconfig(e.to_string()));
        }
        AuthType::Token => {
            let token = required(&credentials.bearer_token, "bearer_token")?;
            (
                serde_json::json!({
                    "server": cluster.api_server,
                    "insecure-skip-tls-verify": true
                }),
                serde_json::json!({ "token": token }),
            )
        }
        AuthType::Cert => {
            let cert = required(&credentials.client_cert, "client_cert")?;
            let key = required(&credentials.client_key, "client_key")?;
            let cluster_entry = match credentials.ca_cert.as_deref().filter(|ca| !ca.is_empty()) {
                Some(ca) => serde_json::json!({
                    "server": cluster.api_server,
                    "certificate-authority-data": STANDARD.encode(ca)
                }),
                None => serde_json::json!({
                    "server": cluster.api_server,
                    "insecure-skip-tls-verify": true
                }),
            };
            (
                cluster_entry,
                serde_json::json!({
                    "client-certificate-data": STANDARD.encode(cert),
                    "client-key-data": STANDARD.encode(key)
                }),
            )
        }
    };

    let document = serde_json::json!({
        "apiVersion": "v1",
        "kind": "Config",
        "clusters": [{ "name": CONTEXT_NAME, "cluster": cluster_entry }],
        "users": [{ "name": CONTEXT_NAME, "user": user_entry }],
        "contexts": [{
            "name": CONTEXT_NAME,
            "context": { "cluster": CONTEXT_NAME, "user": CONTEXT_NAME }
        }],
        "current-context": CONTEXT_NAME
    });

    serde_json::from_value(document).map_err(|e| ClientBuildError::Kubeconfig(e.to_string()))
}
