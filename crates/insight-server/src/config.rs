//! Server configuration

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use insight_lib::collector::CollectorConfig;
use insight_lib::{EngineConfig, ScheduleSettings};
use serde::Deserialize;

/// Environment variable naming an optional TOML/YAML config file
pub const CONFIG_FILE_ENV: &str = "INSIGHT_CONFIG";

/// Server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct InsightConfig {
    /// Instance name attached to every structured event
    #[serde(default = "default_instance")]
    pub instance: String,

    /// API server port for health/metrics
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// JSON roster of clusters and their credentials
    #[serde(default = "default_clusters_file")]
    pub clusters_file: PathBuf,

    /// Directory for per-cluster history files
    #[serde(default = "default_history_dir")]
    pub history_dir: PathBuf,

    /// Run one full collection before reporting ready
    #[serde(default)]
    pub warm_up: bool,

    #[serde(default)]
    pub engine: EngineSection,

    #[serde(default)]
    pub scheduler: ScheduleSettings,
}

fn default_instance() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "cluster-insight".to_string())
}

fn default_api_port() -> u16 {
    8080
}

fn default_clusters_file() -> PathBuf {
    PathBuf::from("/etc/cluster-insight/clusters.json")
}

fn default_history_dir() -> PathBuf {
    PathBuf::from("/var/lib/cluster-insight/history")
}

/// Engine tunables, durations in seconds
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct EngineSection {
    pub cluster_concurrency: usize,
    pub namespace_concurrency: usize,
    pub batch_deadline_secs: u64,
    pub cluster_deadline_secs: u64,
    pub namespace_deadline_secs: u64,
    pub request_timeout_secs: u64,
    pub metrics_timeout_secs: u64,
    pub workload_retries: u32,
    pub retry_backoff_secs: u64,
    pub inventory_ttl_secs: u64,
    pub analysis_ttl_secs: u64,
    pub critical_alert_limit: usize,
    pub alert_suppression_window_secs: u64,
}

impl Default for EngineSection {
    fn default() -> Self {
        let engine = EngineConfig::default();
        let collector = &engine.collector;
        Self {
            cluster_concurrency: engine.cluster_concurrency,
            namespace_concurrency: collector.namespace_concurrency,
            batch_deadline_secs: engine.batch_deadline.as_secs(),
            cluster_deadline_secs: engine.cluster_deadline.as_secs(),
            namespace_deadline_secs: collector.namespace_deadline.as_secs(),
            request_timeout_secs: collector.request_timeout.as_secs(),
            metrics_timeout_secs: collector.metrics_timeout.as_secs(),
            workload_retries: collector.workload_retries,
            retry_backoff_secs: collector.retry_backoff.as_secs(),
            inventory_ttl_secs: engine.inventory_ttl.as_secs(),
            analysis_ttl_secs: engine.analysis_ttl.as_secs(),
            critical_alert_limit: engine.critical_alert_limit,
            alert_suppression_window_secs: engine.alert_suppression_window.as_secs(),
        }
    }
}

impl EngineSection {
    pub fn to_engine_config(&self) -> EngineConfig {
        let cluster_deadline = Duration::from_secs(self.cluster_deadline_secs);
        EngineConfig {
            collector: CollectorConfig {
                namespace_concurrency: self.namespace_concurrency,
                cluster_deadline,
                namespace_deadline: Duration::from_secs(self.namespace_deadline_secs),
                request_timeout: Duration::from_secs(self.request_timeout_secs),
                metrics_timeout: Duration::from_secs(self.metrics_timeout_secs),
                workload_retries: self.workload_retries,
                retry_backoff: Duration::from_secs(self.retry_backoff_secs),
            },
            cluster_concurrency: self.cluster_concurrency,
            batch_deadline: Duration::from_secs(self.batch_deadline_secs),
            cluster_deadline,
            inventory_ttl: Duration::from_secs(self.inventory_ttl_secs),
            analysis_ttl: Duration::from_secs(self.analysis_ttl_secs),
            critical_alert_limit: self.critical_alert_limit,
            alert_suppression_window: Duration::from_secs(self.alert_suppression_window_secs),
        }
    }
}

impl InsightConfig {
    /// Load configuration from the optional config file and environment
    pub fn load() -> Result<Self> {
        let file = std::env::var_os(CONFIG_FILE_ENV).map(PathBuf::from);
        Self::load_from(file.as_deref())
    }

    /// `INSIGHT_`-prefixed variables override the file; nested keys use `__`,
    /// e.g. `INSIGHT_SCHEDULER__RETRY_ATTEMPTS`
    pub fn load_from(file: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = file {
            builder = builder.add_source(config::File::from(path).required(true));
        }

        let config = builder
            .add_source(
                config::Environment::with_prefix("INSIGHT")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("failed to read configuration")?;

        let config: InsightConfig = config
            .try_deserialize()
            .context("invalid configuration")?;
        config
            .scheduler
            .validate()
            .context("invalid scheduler settings")?;
        Ok(config)
    }
}
