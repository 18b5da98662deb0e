//! Error types shared across the engine

use std::time::Duration;

/// Failures talking to a single cluster
#[derive(Debug, Clone, thiserror::Error)]
pub enum CollectorError {
    #[error("failed to list namespaces: {0}")]
    NamespaceList(String),

    #[error("failed to list workloads in namespace {namespace}: {message}")]
    WorkloadList { namespace: String, message: String },

    #[error("failed to list metrics in namespace {namespace}: {message}")]
    MetricsList { namespace: String, message: String },

    #[error("request timed out after {0:?}")]
    Timeout(Duration),
}

/// Failures turning a cluster descriptor into a live client
#[derive(Debug, Clone, thiserror::Error)]
pub enum ClientBuildError {
    #[error("unsupported auth type: {0}")]
    UnsupportedAuthType(String),

    #[error("{auth_type} authentication requires {field}")]
    MissingCredential {
        auth_type: String,
        field: &'static str,
    },

    #[error("no credentials stored for cluster {0}")]
    CredentialsNotFound(u64),

    #[error("invalid kubeconfig: {0}")]
    Kubeconfig(String),

    #[error("failed to create Kubernetes client: {0}")]
    Client(String),
}

/// Failures of the external collaborators
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("record not found: {0}")]
    NotFound(String),

    #[error("store I/O error: {0}")]
    Io(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Errors surfaced by the multi-cluster collector
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("failed to read cluster roster: {0}")]
    Roster(#[from] StoreError),

    #[error("no online clusters configured")]
    NoOnlineClusters,

    #[error("cluster {0} not found")]
    ClusterNotFound(u64),

    #[error("cluster {0} is not online")]
    ClusterOffline(String),

    #[error("failed to connect to cluster {cluster}: {source}")]
    Connect {
        cluster: String,
        #[source]
        source: ClientBuildError,
    },

    #[error("collection failed for cluster {cluster}: {source}")]
    Collection {
        cluster: String,
        #[source]
        source: CollectorError,
    },

    #[error("collection for cluster {cluster} exceeded {deadline:?}")]
    Deadline { cluster: String, deadline: Duration },
}

/// Rejected scheduler settings
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SettingsError {
    #[error("{0} must be greater than zero")]
    NotPositive(&'static str),
    #[error("{field} must not exceed {max_secs}s")]
    TooLarge { field: &'static str, max_secs: u64 },
}

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("scheduler is not running")]
    NotRunning,

    #[error("no job scheduled for cluster {0}")]
    JobNotFound(u64),

    #[error("failed to load cluster roster: {0}")]
    Roster(#[from] StoreError),

    #[error(transparent)]
    Settings(#[from] SettingsError),
}
