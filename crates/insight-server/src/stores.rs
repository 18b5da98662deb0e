//! File-backed collaborators for a standalone deployment
//!
//! - `FileClusterStore` reads the roster and credentials from a JSON file on
//!   every call, so edits are picked up by the next reconciliation
//! - `JsonlHistoryStore` appends snapshots to one JSON-lines file per cluster
//! - `LedgerActivityRecorder` keeps a bounded in-memory activity ledger and
//!   mirrors every event to the log

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use insight_lib::collector::{self, ClusterHandle};
use insight_lib::{
    ActivityRecorder, AlertLevel, AlertRecord, ClientBuildError, ClusterConfigStore,
    ClusterCredentials, ClusterDescriptor, PersistenceStore, StoreError, WorkloadResourceRecord,
};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tracing::{debug, error, info, warn};

#[derive(Debug, Deserialize)]
struct RosterFile {
    #[serde(default)]
    clusters: Vec<RosterEntry>,
}

#[derive(Debug, Deserialize)]
struct RosterEntry {
    #[serde(flatten)]
    descriptor: ClusterDescriptor,
    #[serde(default)]
    credentials: ClusterCredentials,
}

/// Cluster roster backed by a JSON file
pub struct FileClusterStore {
    path: PathBuf,
}

impl FileClusterStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    async fn read(&self) -> Result<Vec<RosterEntry>, StoreError> {
        let raw = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| StoreError::Unavailable(format!("{}: {e}", self.path.display())))?;
        let roster: RosterFile = serde_json::from_str(&raw)
            .map_err(|e| StoreError::Serialization(format!("{}: {e}", self.path.display())))?;
        Ok(roster.clusters)
    }
}

#[async_trait]
impl ClusterConfigStore for FileClusterStore {
    async fn list_clusters(&self) -> Result<Vec<ClusterDescriptor>, StoreError> {
        Ok(self
            .read()
            .await?
            .into_iter()
            .map(|entry| entry.descriptor)
            .collect())
    }

    async fn get_cluster(&self, id: u64) -> Result<Option<ClusterDescriptor>, StoreError> {
        Ok(self
            .read()
            .await?
            .into_iter()
            .find(|entry| entry.descriptor.id == id)
            .map(|entry| entry.descriptor))
    }

    async fn build_client(
        &self,
        cluster: &ClusterDescriptor,
    ) -> Result<ClusterHandle, ClientBuildError> {
        let entry = self
            .read()
            .await
            .map_err(|e| ClientBuildError::Client(e.to_string()))?
            .into_iter()
            .find(|entry| entry.descriptor.id == cluster.id)
            .ok_or_else(|| {
                ClientBuildError::Client(format!("cluster {} missing from roster", cluster.name))
            })?;

        let client = collector::connect(cluster, &entry.credentials).await?;
        Ok(ClusterHandle::from_client(client))
    }
}

#[derive(Serialize)]
struct HistoryLine<'a> {
    collected_at: DateTime<Utc>,
    cluster_id: u64,
    #[serde(flatten)]
    record: &'a WorkloadResourceRecord,
}

#[derive(Deserialize)]
struct HistoryStamp {
    collected_at: DateTime<Utc>,
}

/// Snapshot history as one `cluster-<id>.jsonl` file per cluster
pub struct JsonlHistoryStore {
    dir: PathBuf,
    /// Appends and retention rewrites never interleave
    write_lock: tokio::sync::Mutex<()>,
}

impl JsonlHistoryStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    fn cluster_file(&self, cluster_id: u64) -> PathBuf {
        self.dir.join(format!("cluster-{cluster_id}.jsonl"))
    }

    /// Drop lines stamped before `cutoff`; unreadable lines are kept
    async fn expire_file(path: &Path, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let raw = tokio::fs::read_to_string(path).await.map_err(io_error)?;
        let mut removed = 0u64;
        let mut kept = String::with_capacity(raw.len());

        for line in raw.lines().filter(|line| !line.trim().is_empty()) {
            match serde_json::from_str::<HistoryStamp>(line) {
                Ok(stamp) if stamp.collected_at < cutoff => removed += 1,
                _ => {
                    kept.push_str(line);
                    kept.push('\n');
                }
            }
        }

        if removed > 0 {
            tokio::fs::write(path, kept).await.map_err(io_error)?;
        }
        Ok(removed)
    }
}

fn io_error(e: std::io::Error) -> StoreError {
    StoreError::Io(e.to_string())
}

#[async_trait]
impl PersistenceStore for JsonlHistoryStore {
    async fn save_records(
        &self,
        cluster_id: u64,
        records: &[WorkloadResourceRecord],
    ) -> Result<(), StoreError> {
        let collected_at = Utc::now();
        let mut buffer = Vec::new();
        for record in records {
            serde_json::to_writer(
                &mut buffer,
                &HistoryLine {
                    collected_at,
                    cluster_id,
                    record,
                },
            )
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
            buffer.push(b'\n');
        }

        let _guard = self.write_lock.lock().await;
        tokio::fs::create_dir_all(&self.dir).await.map_err(io_error)?;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.cluster_file(cluster_id))
            .await
            .map_err(io_error)?;
        file.write_all(&buffer).await.map_err(io_error)?;
        file.flush().await.map_err(io_error)?;

        debug!(cluster_id = cluster_id, records = records.len(), "Saved history snapshot");
        Ok(())
    }

    async fn cleanup_history(&self, retention_days: u32) -> Result<u64, StoreError> {
        let cutoff = Utc::now() - ChronoDuration::days(i64::from(retention_days));
        let _guard = self.write_lock.lock().await;

        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(io_error(e)),
        };

        let mut removed = 0u64;
        while let Some(entry) = entries.next_entry().await.map_err(io_error)? {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("jsonl") {
                continue;
            }
            removed += Self::expire_file(&path, cutoff).await?;
        }

        Ok(removed)
    }
}

/// Entries kept by the in-memory ledger before the oldest are dropped
pub const LEDGER_CAPACITY: usize = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    Connection,
    Collection,
    ResourceAlert,
    Alert,
    SummaryAlert,
    System,
}

#[derive(Debug, Clone, Serialize)]
pub struct ActivityEntry {
    pub id: u64,
    pub at: DateTime<Utc>,
    pub kind: ActivityKind,
    pub cluster_id: Option<u64>,
    pub level: AlertLevel,
    pub title: String,
    pub message: String,
    pub occurrences: u32,
}

impl ActivityEntry {
    fn is_alert(&self) -> bool {
        matches!(self.kind, ActivityKind::Alert | ActivityKind::SummaryAlert)
    }
}

#[derive(Default)]
struct Ledger {
    entries: VecDeque<ActivityEntry>,
    next_id: u64,
}

/// Bounded in-memory activity ledger mirrored to the log
#[derive(Default)]
pub struct LedgerActivityRecorder {
    ledger: Mutex<Ledger>,
}

impl LedgerActivityRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Newest first
    #[cfg(test)]
    pub fn recent(&self, limit: usize) -> Vec<ActivityEntry> {
        self.lock().entries.iter().rev().take(limit).cloned().collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Ledger> {
        self.ledger.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn push(
        &self,
        kind: ActivityKind,
        cluster_id: Option<u64>,
        level: AlertLevel,
        title: &str,
        message: &str,
        occurrences: u32,
    ) -> u64 {
        let mut ledger = self.lock();
        ledger.next_id += 1;
        let id = ledger.next_id;
        ledger.entries.push_back(ActivityEntry {
            id,
            at: Utc::now(),
            kind,
            cluster_id,
            level,
            title: title.to_string(),
            message: message.to_string(),
            occurrences,
        });
        if ledger.entries.len() > LEDGER_CAPACITY {
            ledger.entries.pop_front();
        }
        id
    }
}

#[async_trait]
impl ActivityRecorder for LedgerActivityRecorder {
    async fn record_connection_event(
        &self,
        cluster: &ClusterDescriptor,
        success: bool,
        message: &str,
    ) -> Result<(), StoreError> {
        let level = if success {
            debug!(cluster = %cluster.name, "Cluster connected");
            AlertLevel::Info
        } else {
            warn!(cluster = %cluster.name, error = %message, "Cluster connection failed");
            AlertLevel::Error
        };
        self.push(
            ActivityKind::Connection,
            Some(cluster.id),
            level,
            "Cluster connection",
            message,
            1,
        );
        Ok(())
    }

    async fn record_collection_event(
        &self,
        cluster: &ClusterDescriptor,
        success: bool,
        workloads: usize,
        message: &str,
    ) -> Result<(), StoreError> {
        let level = if success {
            debug!(cluster = %cluster.name, workloads = workloads, "Cluster collected");
            AlertLevel::Info
        } else {
            warn!(cluster = %cluster.name, error = %message, "Cluster collection failed");
            AlertLevel::Error
        };
        self.push(
            ActivityKind::Collection,
            Some(cluster.id),
            level,
            "Cluster collection",
            message,
            1,
        );
        Ok(())
    }

    async fn record_resource_alert(
        &self,
        cluster: &ClusterDescriptor,
        pod_name: &str,
        severity: &str,
        message: &str,
    ) -> Result<(), StoreError> {
        let level = if severity == "critical" {
            AlertLevel::Error
        } else {
            AlertLevel::Warning
        };
        debug!(cluster = %cluster.name, pod = %pod_name, severity = %severity, "Resource finding");
        self.push(
            ActivityKind::ResourceAlert,
            Some(cluster.id),
            level,
            pod_name,
            message,
            1,
        );
        Ok(())
    }

    async fn record_alert(&self, alert: &AlertRecord) -> Result<u64, StoreError> {
        warn!(
            cluster = %alert.cluster_name,
            level = %alert.level,
            title = %alert.title,
            message = %alert.message,
            "Alert raised"
        );
        Ok(self.push(
            ActivityKind::Alert,
            Some(alert.cluster_id),
            alert.level,
            &alert.title,
            &alert.message,
            alert.occurrences,
        ))
    }

    async fn record_summary_alert(&self, alert: &AlertRecord) -> Result<u64, StoreError> {
        info!(
            cluster = %alert.cluster_name,
            level = %alert.level,
            message = %alert.message,
            "Cluster summary alert"
        );
        Ok(self.push(
            ActivityKind::SummaryAlert,
            Some(alert.cluster_id),
            alert.level,
            &alert.title,
            &alert.message,
            alert.occurrences,
        ))
    }

    async fn update_alert_occurrences(
        &self,
        alert_id: u64,
        occurrences: u32,
    ) -> Result<(), StoreError> {
        let mut ledger = self.lock();
        let entry = ledger
            .entries
            .iter_mut()
            .find(|entry| entry.id == alert_id && entry.is_alert())
            .ok_or_else(|| StoreError::NotFound(format!("alert {alert_id}")))?;
        entry.occurrences = occurrences;
        entry.at = Utc::now();
        Ok(())
    }

    async fn record_system_event(
        &self,
        level: AlertLevel,
        title: &str,
        message: &str,
    ) -> Result<(), StoreError> {
        match level {
            AlertLevel::Info => info!(title = %title, message = %message, "System event"),
            AlertLevel::Warning => warn!(title = %title, message = %message, "System event"),
            AlertLevel::Error | AlertLevel::Critical => {
                error!(title = %title, message = %message, "System event")
            }
        }
        self.push(ActivityKind::System, None, level, title, message, 1);
        Ok(())
    }

    /// Keep only the newest alert per cluster, level and title
    async fn cleanup_duplicate_alerts(&self) -> Result<u64, StoreError> {
        let mut ledger = self.lock();

        let mut newest: HashMap<(Option<u64>, AlertLevel, String), u64> = HashMap::new();
        for entry in ledger.entries.iter().filter(|e| e.is_alert()) {
            let key = (entry.cluster_id, entry.level, entry.title.clone());
            let id = newest.entry(key).or_insert(entry.id);
            *id = (*id).max(entry.id);
        }

        let before = ledger.entries.len();
        ledger.entries.retain(|entry| {
            !entry.is_alert()
                || newest.get(&(entry.cluster_id, entry.level, entry.title.clone()))
                    == Some(&entry.id)
        });
        Ok((before - ledger.entries.len()) as u64)
    }

    async fn cleanup_old_activities(&self, retention_days: u32) -> Result<u64, StoreError> {
        let cutoff = Utc::now() - ChronoDuration::days(i64::from(retention_days));
        let mut ledger = self.lock();
        let before = ledger.entries.len();
        ledger.entries.retain(|entry| entry.at >= cutoff);
        Ok((before - ledger.entries.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use insight_lib::{AuthType, ClusterStatus, WorkloadStatus};
    use std::io::Write;
    use tokio_test::{assert_err, assert_ok};

    fn descriptor(id: u64, name: &str) -> ClusterDescriptor {
        ClusterDescriptor {
            id,
            name: name.to_string(),
            api_server: format!("https://{name}.example:6443"),
            auth_type: AuthType::Token,
            status: ClusterStatus::Online,
            collect_interval_mins: None,
        }
    }

    fn record(pod: &str) -> WorkloadResourceRecord {
        WorkloadResourceRecord {
            pod_name: pod.to_string(),
            namespace: "web".to_string(),
            node_name: "node-1".to_string(),
            cluster_name: "alpha".to_string(),
            memory_usage: 80,
            memory_request: 100,
            memory_limit: 200,
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
            creation_time: Utc::now(),
        }
    }

    fn alert(cluster_id: u64, title: &str) -> AlertRecord {
        AlertRecord {
            cluster_id,
            cluster_name: format!("cluster-{cluster_id}"),
            level: AlertLevel::Error,
            title: title.to_string(),
            message: "Pod has no memory request".to_string(),
            occurrences: 1,
        }
    }

    #[tokio::test]
    async fn test_roster_file_round_trip() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"clusters": [
                {{"id": 1, "name": "prod", "api_server": "https://prod:6443",
                  "auth_type": "token", "status": "online", "collect_interval_mins": 15,
                  "credentials": {{"bearer_token": "secret"}}}},
                {{"id": 2, "name": "lab", "api_server": "https://lab:6443",
                  "auth_type": "kubeconfig", "status": "offline"}}
            ]}}"#
        )
        .unwrap();

        let store = FileClusterStore::new(file.path());
        let clusters = store.list_clusters().await.unwrap();

        assert_eq!(clusters.len(), 2);
        assert_eq!(clusters[0].name, "prod");
        assert_eq!(clusters[0].collect_interval_mins, Some(15));
        assert!(clusters[0].is_online());
        assert!(!clusters[1].is_online());

        let lab = store.get_cluster(2).await.unwrap().unwrap();
        assert_eq!(lab.auth_type, AuthType::Kubeconfig);
        assert!(store.get_cluster(9).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_missing_roster_is_unavailable() {
        let store = FileClusterStore::new("/nonexistent/clusters.json");
        assert!(matches!(
            store.list_clusters().await,
            Err(StoreError::Unavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_unknown_cluster_cannot_build_client() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"clusters": []}}"#).unwrap();

        let store = FileClusterStore::new(file.path());
        let result = store.build_client(&descriptor(7, "ghost")).await;
        assert!(matches!(result, Err(ClientBuildError::Client(_))));
    }

    #[tokio::test]
    async fn test_history_appends_per_cluster() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonlHistoryStore::new(dir.path().join("history"));

        store
            .save_records(1, &[record("api"), record("worker")])
            .await
            .unwrap();
        store.save_records(1, &[record("api")]).await.unwrap();
        store.save_records(2, &[record("db")]).await.unwrap();

        let raw = std::fs::read_to_string(dir.path().join("history/cluster-1.jsonl")).unwrap();
        let lines: Vec<serde_json::Value> = raw
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0]["cluster_id"], 1);
        assert_eq!(lines[0]["pod_name"], "api");
        assert!(lines[0]["collected_at"].is_string());

        // Fresh rows survive retention
        assert_eq!(store.cleanup_history(30).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_history_retention_drops_old_lines() {
        let dir = tempfile::tempdir().unwrap();
        let old = (Utc::now() - ChronoDuration::days(40)).to_rfc3339();
        let new = Utc::now().to_rfc3339();
        std::fs::write(
            dir.path().join("cluster-1.jsonl"),
            format!(
                "{{\"collected_at\":\"{old}\",\"pod_name\":\"a\"}}\n\
                 {{\"collected_at\":\"{new}\",\"pod_name\":\"b\"}}\n\
                 not json\n"
            ),
        )
        .unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let store = JsonlHistoryStore::new(dir.path());
        assert_eq!(store.cleanup_history(30).await.unwrap(), 1);

        let raw = std::fs::read_to_string(dir.path().join("cluster-1.jsonl")).unwrap();
        assert_eq!(raw.lines().count(), 2);
        assert!(raw.contains("\"b\""));
    }

    #[tokio::test]
    async fn test_history_cleanup_without_directory() {
        let store = JsonlHistoryStore::new("/nonexistent/history");
        assert_eq!(store.cleanup_history(30).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_ledger_assigns_ids_and_updates_occurrences() {
        let ledger = LedgerActivityRecorder::new();

        let first = assert_ok!(ledger.record_alert(&alert(1, "Critical")).await);
        let second = assert_ok!(ledger.record_summary_alert(&alert(1, "Summary")).await);
        assert_eq!((first, second), (1, 2));

        assert_ok!(ledger.update_alert_occurrences(first, 4).await);
        let entry = ledger
            .recent(10)
            .into_iter()
            .find(|e| e.id == first)
            .unwrap();
        assert_eq!(entry.occurrences, 4);

        let err = assert_err!(ledger.update_alert_occurrences(99, 2).await);
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_ledger_duplicate_sweep_keeps_newest() {
        let ledger = LedgerActivityRecorder::new();
        ledger.record_alert(&alert(1, "Critical")).await.unwrap();
        ledger.record_alert(&alert(1, "Critical")).await.unwrap();
        let newest = ledger.record_alert(&alert(1, "Critical")).await.unwrap();
        ledger.record_alert(&alert(2, "Critical")).await.unwrap();
        ledger
            .record_system_event(AlertLevel::Info, "Startup", "engine started")
            .await
            .unwrap();

        assert_eq!(ledger.cleanup_duplicate_alerts().await.unwrap(), 2);

        let remaining = ledger.recent(10);
        assert_eq!(remaining.len(), 3);
        assert!(remaining.iter().any(|e| e.id == newest));
        assert_eq!(ledger.cleanup_duplicate_alerts().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_ledger_retention_keeps_fresh_entries() {
        let ledger = LedgerActivityRecorder::new();
        let cluster = descriptor(1, "alpha");
        ledger
            .record_connection_event(&cluster, false, "connection refused")
            .await
            .unwrap();
        ledger
            .record_collection_event(&cluster, true, 12, "collected")
            .await
            .unwrap();

        assert_eq!(ledger.cleanup_old_activities(30).await.unwrap(), 0);
        assert_eq!(ledger.recent(10).len(), 2);
        assert_eq!(ledger.recent(10)[0].kind, ActivityKind::Collection);
    }
}
