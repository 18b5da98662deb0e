//! Core data models for the insight engine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ClientBuildError;

pub const MIB: u64 = 1024 * 1024;

/// Whether a workload's resource configuration looks sane
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkloadStatus {
    Reasonable,
    Unreasonable,
}

impl fmt::Display for WorkloadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkloadStatus::Reasonable => write!(f, "reasonable"),
            WorkloadStatus::Unreasonable => write!(f, "unreasonable"),
        }
    }
}

/// Misconfiguration categories attached to a workload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Issue {
    MemoryRequestUnderutilized,
    MemoryLimitUnderutilized,
    CpuRequestUnderutilized,
    CpuLimitUnderutilized,
    MissingMemoryRequest,
    MissingCpuRequest,
    MemoryLimitRatioTooHigh,
    CpuLimitRatioTooHigh,
}

impl Issue {
    pub fn is_missing_request(&self) -> bool {
        matches!(self, Issue::MissingMemoryRequest | Issue::MissingCpuRequest)
    }
}

impl fmt::Display for Issue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Issue::MemoryRequestUnderutilized => "memory request underutilized",
            Issue::MemoryLimitUnderutilized => "memory limit underutilized",
            Issue::CpuRequestUnderutilized => "CPU request underutilized",
            Issue::CpuLimitUnderutilized => "CPU limit underutilized",
            Issue::MissingMemoryRequest => "missing memory request",
            Issue::MissingCpuRequest => "missing CPU request",
            Issue::MemoryLimitRatioTooHigh => "memory limit/request ratio too high",
            Issue::CpuLimitRatioTooHigh => "CPU limit/request ratio too high",
        };
        f.write_str(text)
    }
}

/// One workload's resource snapshot from a single collection pass
///
/// Memory figures are bytes, CPU figures are millicores. After extraction
/// requests and limits are always non-zero, so the percentages are defined.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkloadResourceRecord {
    pub pod_name: String,
    pub namespace: String,
    pub node_name: String,
    pub cluster_name: String,
    pub memory_usage: u64,
    pub memory_request: u64,
    pub memory_limit: u64,
    pub cpu_usage: u64,
    pub cpu_request: u64,
    pub cpu_limit: u64,
    pub memory_req_pct: f64,
    pub memory_limit_pct: f64,
    pub cpu_req_pct: f64,
    pub cpu_limit_pct: f64,
    /// The workload declared a memory request before defaulting
    pub memory_request_declared: bool,
    /// The workload declared a CPU request before defaulting
    pub cpu_request_declared: bool,
    /// At least one usage figure was estimated rather than sampled
    pub metrics_estimated: bool,
    pub status: WorkloadStatus,
    pub issues: Vec<Issue>,
    pub score: f64,
    pub creation_time: DateTime<Utc>,
}

impl WorkloadResourceRecord {
    pub fn is_unreasonable(&self) -> bool {
        self.status == WorkloadStatus::Unreasonable
    }

    pub fn has_issue(&self, issue: Issue) -> bool {
        self.issues.contains(&issue)
    }
}

/// Aggregate produced once per collection pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub total_pods: usize,
    pub unreasonable_pods: usize,
    /// Worst records, descending by score
    pub top_problems: Vec<WorkloadResourceRecord>,
    pub generated_at: DateTime<Utc>,
    pub clusters_analyzed: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClusterStatus {
    Online,
    Offline,
    Unknown,
}

/// How the engine authenticates against a cluster API server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthType {
    Token,
    Cert,
    Kubeconfig,
}

impl fmt::Display for AuthType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthType::Token => write!(f, "token"),
            AuthType::Cert => write!(f, "cert"),
            AuthType::Kubeconfig => write!(f, "kubeconfig"),
        }
    }
}

impl FromStr for AuthType {
    type Err = ClientBuildError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "token" => Ok(AuthType::Token),
            "cert" => Ok(AuthType::Cert),
            "kubeconfig" => Ok(AuthType::Kubeconfig),
            other => Err(ClientBuildError::UnsupportedAuthType(other.to_string())),
        }
    }
}

/// Cluster roster entry, read-only to the engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterDescriptor {
    pub id: u64,
    pub name: String,
    pub api_server: String,
    pub auth_type: AuthType,
    pub status: ClusterStatus,
    /// Poll interval in minutes; zero or absent means the scheduler default
    #[serde(default)]
    pub collect_interval_mins: Option<u64>,
}

/// Longest per-cluster collection interval honored (one week)
pub const MAX_COLLECT_INTERVAL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

impl ClusterDescriptor {
    pub fn is_online(&self) -> bool {
        self.status == ClusterStatus::Online
    }

    /// Per-cluster override; zero means none, oversized values are capped
    pub fn collect_interval(&self) -> Option<Duration> {
        self.collect_interval_mins
            .filter(|mins| *mins > 0)
            .map(|mins| {
                mins.checked_mul(60)
                    .map(Duration::from_secs)
                    .map_or(MAX_COLLECT_INTERVAL, |d| d.min(MAX_COLLECT_INTERVAL))
            })
    }
}

/// Decrypted credentials for a cluster, as handed over by the cluster store
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct ClusterCredentials {
    #[serde(default)]
    pub bearer_token: Option<String>,
    #[serde(default)]
    pub client_cert: Option<String>,
    #[serde(default)]
    pub client_key: Option<String>,
    #[serde(default)]
    pub ca_cert: Option<String>,
    #[serde(default)]
    pub kubeconfig: Option<String>,
}

impl fmt::Debug for ClusterCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClusterCredentials")
            .field("bearer_token", &self.bearer_token.as_ref().map(|_| "<redacted>"))
            .field("client_cert", &self.client_cert.is_some())
            .field("client_key", &self.client_key.as_ref().map(|_| "<redacted>"))
            .field("ca_cert", &self.ca_cert.is_some())
            .field("kubeconfig", &self.kubeconfig.is_some())
            .finish()
    }
}

/// Alert level used by the activity ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertLevel {
    Info,
    Warning,
    Error,
    Critical,
}

impl fmt::Display for AlertLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlertLevel::Info => write!(f, "info"),
            AlertLevel::Warning => write!(f, "warning"),
            AlertLevel::Error => write!(f, "error"),
            AlertLevel::Critical => write!(f, "critical"),
        }
    }
}

/// Alert handed to the activity ledger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRecord {
    pub cluster_id: u64,
    pub cluster_name: String,
    pub level: AlertLevel,
    pub title: String,
    pub message: String,
    /// Occurrences seen so far for this fingerprint, including this one
    pub occurrences: u32,
}

/// Per-namespace roll-up of the inventory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamespaceSummary {
    pub cluster_name: String,
    pub namespace: String,
    pub total_pods: usize,
    pub unreasonable_pods: usize,
    pub memory_usage: u64,
    pub memory_request: u64,
    pub cpu_usage: u64,
    pub cpu_request: u64,
}

/// Outcome of collecting a single cluster
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterReport {
    pub cluster_id: u64,
    pub cluster_name: String,
    pub total_pods: usize,
    pub unreasonable_pods: usize,
    pub namespaces_failed: usize,
    pub truncated: bool,
    pub elapsed_ms: u64,
}
