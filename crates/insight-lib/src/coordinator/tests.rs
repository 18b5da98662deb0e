use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tokio_test::assert_err;

use super::*;
use crate::error::EngineError;
use crate::health::ComponentStatus;
use crate::models::{ClusterStatus, WorkloadStatus};
use crate::testing::{
    container, descriptor, pod, running_pod, FakeCluster, FakeStore, RecordingActivity,
    RecordingPersistence,
};

struct Fixture {
    store: Arc<FakeStore>,
    persistence: Arc<RecordingPersistence>,
    activity: Arc<RecordingActivity>,
    coordinator: Coordinator,
}

fn fixture(store: FakeStore) -> Fixture {
    fixture_with(store, RecordingPersistence::default(), EngineConfig::default())
}

fn fixture_with(store: FakeStore, persistence: RecordingPersistence, config: EngineConfig) -> Fixture {
    let store = Arc::new(store);
    let persistence = Arc::new(persistence);
    let activity = Arc::new(RecordingActivity::default());
    let coordinator = Coordinator::new(
        config,
        store.clone(),
        persistence.clone(),
        activity.clone(),
        StructuredLogger::new("test"),
    );
    Fixture {
        store,
        persistence,
        activity,
        coordinator,
    }
}

/// One healthy pod, one idle pod
fn cluster_a() -> FakeCluster {
    FakeCluster::new()
        .with_pods("web", vec![running_pod("web", "a-ok"), running_pod("web", "a-idle")])
        .with_usage("web", "a-ok", 80, 80)
        .with_usage("web", "a-idle", 5, 3)
}

/// One mostly idle pod declaring no resources at all
fn cluster_c() -> FakeCluster {
    FakeCluster::new()
        .with_pods(
            "jobs",
            vec![pod("jobs", "c-missing", "Running", vec![container(None, None, None, None)])],
        )
        .with_usage("jobs", "c-missing", 20, 5)
}

fn three_clusters() -> FakeStore {
    FakeStore::new()
        .with_cluster(descriptor(1, "alpha"), Some(cluster_a().into_handle()))
        .with_cluster(descriptor(2, "bravo"), None)
        .with_cluster(descriptor(3, "charlie"), Some(cluster_c().into_handle()))
}

#[tokio::test]
async fn test_unreachable_cluster_is_absorbed() {
    let f = fixture(three_clusters());

    let result = f.coordinator.collect_all(false).await.unwrap();

    assert_eq!(result.clusters_analyzed, 2);
    assert_eq!(result.total_pods, 3);
    assert!(!result.top_problems.is_empty());
    assert!(result
        .top_problems
        .iter()
        .all(|r| r.cluster_name == "alpha" || r.cluster_name == "charlie"));
    assert!(f.activity.connection_events().contains(&(2, false)));
    assert!(f.activity.connection_events().contains(&(1, true)));
}

#[tokio::test]
async fn test_missing_requests_rank_first() {
    let f = fixture(three_clusters());

    let result = f.coordinator.collect_all(false).await.unwrap();

    assert_eq!(result.unreasonable_pods, 2);
    assert_eq!(result.top_problems[0].pod_name, "c-missing");
    assert_eq!(result.top_problems[1].pod_name, "a-idle");
}

#[tokio::test]
async fn test_analysis_cache_short_circuits() {
    let f = fixture(three_clusters());

    let first = f.coordinator.collect_all(false).await.unwrap();
    let second = f.coordinator.collect_all(false).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(f.store.list_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_persisting_call_always_polls_and_saves() {
    let f = fixture(three_clusters());

    f.coordinator.collect_all(false).await.unwrap();
    f.coordinator.collect_all(true).await.unwrap();

    assert_eq!(f.store.list_calls.load(Ordering::SeqCst), 2);
    let saved = f.persistence.saved();
    assert_eq!(saved, vec![(1, 2), (3, 1)]);
}

#[tokio::test]
async fn test_persisting_call_does_not_fill_analysis_cache() {
    let f = fixture(three_clusters());

    f.coordinator.collect_all(true).await.unwrap();
    f.coordinator.collect_all(false).await.unwrap();

    assert_eq!(f.store.list_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_persistence_failure_is_absorbed() {
    let f = fixture_with(
        three_clusters(),
        RecordingPersistence::failing(),
        EngineConfig::default(),
    );

    let result = f.coordinator.collect_all(true).await.unwrap();
    assert_eq!(result.clusters_analyzed, 2);
}

#[tokio::test]
async fn test_roster_failure_surfaces() {
    let f = fixture(three_clusters());
    f.store.fail_roster(true);

    let err = f.coordinator.collect_all(false).await.unwrap_err();
    assert!(matches!(err, EngineError::Roster(_)));
}

#[tokio::test]
async fn test_no_online_clusters() {
    let mut offline = descriptor(1, "alpha");
    offline.status = ClusterStatus::Offline;
    let f = fixture(FakeStore::new().with_cluster(offline, Some(cluster_a().into_handle())));

    let err = f.coordinator.collect_all(false).await.unwrap_err();
    assert!(matches!(err, EngineError::NoOnlineClusters));
    assert_eq!(f.store.build_calls.load(Ordering::SeqCst), 0);

    // Search on an empty roster is an empty page, not an error
    let page = f
        .coordinator
        .search(&SearchFilter::default(), 1, 20)
        .await
        .unwrap();
    assert_eq!(page.total, 0);
}

#[tokio::test]
async fn test_offline_cluster_skipped() {
    let mut offline = descriptor(2, "bravo");
    offline.status = ClusterStatus::Unknown;
    let f = fixture(
        FakeStore::new()
            .with_cluster(descriptor(1, "alpha"), Some(cluster_a().into_handle()))
            .with_cluster(offline, Some(cluster_c().into_handle())),
    );

    let result = f.coordinator.collect_all(false).await.unwrap();

    assert_eq!(result.clusters_analyzed, 1);
    assert_eq!(f.store.build_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_collect_all_generates_alerts() {
    let f = fixture(three_clusters());

    f.coordinator.collect_all(false).await.unwrap();

    let resource = f.activity.resource_alerts();
    assert_eq!(resource.len(), 2);
    assert!(resource.iter().all(|(_, severity)| severity == "critical"));
    // One critical and one summary alert per cluster with problems
    assert_eq!(f.activity.alerts().len(), 2);
    assert_eq!(f.activity.summary_alerts().len(), 2);
}

#[tokio::test]
async fn test_alerts_follow_worst_records() {
    // 60 mildly idle pods sort ahead of the worst pod by namespace
    let mut idle_cluster = FakeCluster::new();
    let idle_pods: Vec<_> = (0..60)
        .map(|i| running_pod("aaa", &format!("idle-{i:02}")))
        .collect();
    for p in &idle_pods {
        idle_cluster = idle_cluster.with_usage("aaa", &p.name, 8, 50);
    }
    let cluster = idle_cluster
        .with_pods("aaa", idle_pods)
        .with_pods(
            "zzz",
            vec![pod("zzz", "worst", "Running", vec![container(None, None, None, None)])],
        )
        .with_usage("zzz", "worst", 20, 5);
    let f = fixture(
        FakeStore::new().with_cluster(descriptor(1, "alpha"), Some(cluster.into_handle())),
    );

    let result = f.coordinator.collect_all(false).await.unwrap();
    assert_eq!(result.unreasonable_pods, 61);
    assert_eq!(result.top_problems[0].pod_name, "worst");

    let resource = f.activity.resource_alerts();
    assert_eq!(resource.len(), analyzer::TOP_PROBLEMS_LIMIT);
    assert_eq!(resource[0].0, "worst");

    let alerts = f.activity.alerts();
    assert_eq!(alerts.len(), 1);
    assert!(alerts[0].message.contains("zzz/worst"));
    assert!(f.activity.summary_alerts()[0]
        .message
        .contains("50 critical and 0 warning"));
}

#[tokio::test]
async fn test_collect_cluster_alerts_worst_first() {
    let cluster = FakeCluster::new()
        .with_pods("aaa", vec![running_pod("aaa", "idle")])
        .with_usage("aaa", "idle", 8, 50)
        .with_pods(
            "zzz",
            vec![pod("zzz", "worst", "Running", vec![container(None, None, None, None)])],
        )
        .with_usage("zzz", "worst", 20, 5);
    let f = fixture(
        FakeStore::new().with_cluster(descriptor(1, "alpha"), Some(cluster.into_handle())),
    );

    f.coordinator.collect_cluster(1, false).await.unwrap();

    let resource = f.activity.resource_alerts();
    assert_eq!(resource[0].0, "worst");
    assert_eq!(resource[1].0, "idle");
    assert!(f.activity.alerts()[0].message.contains("zzz/worst"));
}

#[tokio::test]
async fn test_search_cold_cache_polls_once_without_side_effects() {
    let f = fixture(three_clusters());
    let filter = SearchFilter::default().with_status(WorkloadStatus::Unreasonable);

    let first = f.coordinator.search(&filter, 1, 10).await.unwrap();
    let second = f.coordinator.search(&filter, 1, 10).await.unwrap();

    assert_eq!(first.total, 2);
    assert_eq!(first, second);
    assert_eq!(f.store.list_calls.load(Ordering::SeqCst), 1);
    assert!(f.activity.resource_alerts().is_empty());
    assert!(f.persistence.saved().is_empty());
}

#[tokio::test]
async fn test_collect_all_warms_inventory() {
    let f = fixture(three_clusters());

    f.coordinator.collect_all(false).await.unwrap();
    let page = f
        .coordinator
        .search(&SearchFilter::default().with_cluster("alpha"), 1, 20)
        .await
        .unwrap();

    assert_eq!(page.total, 2);
    assert_eq!(f.store.list_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_invalidate_all_forces_poll() {
    let f = fixture(three_clusters());

    f.coordinator.collect_all(false).await.unwrap();
    f.coordinator.invalidate_all();
    f.coordinator.collect_all(false).await.unwrap();
    f.coordinator.inventory().await.unwrap();

    assert_eq!(f.store.list_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_namespace_views() {
    let f = fixture(three_clusters());

    let summaries = f.coordinator.namespace_summaries().await.unwrap();
    assert_eq!(summaries.len(), 2);
    assert_eq!(summaries[0].cluster_name, "alpha");
    assert_eq!(summaries[0].namespace, "web");
    assert_eq!(summaries[0].total_pods, 2);
    assert_eq!(summaries[0].unreasonable_pods, 1);
    assert_eq!(summaries[1].namespace, "jobs");

    let jobs = f.coordinator.namespace_workloads("jobs").await.unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].pod_name, "c-missing");
}

#[tokio::test]
async fn test_top_by_request() {
    let f = fixture(three_clusters());

    // c-missing gets the 256Mi / 100m defaults
    let by_memory = f.coordinator.top_by_memory(1).await.unwrap();
    assert_eq!(by_memory.len(), 1);
    assert_eq!(by_memory[0].pod_name, "c-missing");

    let by_cpu = f.coordinator.top_by_cpu(10).await.unwrap();
    assert_eq!(by_cpu.len(), 3);
}

#[tokio::test]
async fn test_collect_cluster_report() {
    let f = fixture(three_clusters());

    let report = f.coordinator.collect_cluster(1, true).await.unwrap();

    assert_eq!(report.cluster_name, "alpha");
    assert_eq!(report.total_pods, 2);
    assert_eq!(report.unreasonable_pods, 1);
    assert!(!report.truncated);
    assert_eq!(f.persistence.saved(), vec![(1, 2)]);
    assert_eq!(f.activity.collection_events(), vec![(1, true, 2)]);
}

#[tokio::test]
async fn test_collect_cluster_errors() {
    let mut offline = descriptor(4, "delta");
    offline.status = ClusterStatus::Offline;
    let store = three_clusters();
    store.add_cluster(offline, None);
    let f = fixture(store);

    assert!(matches!(
        f.coordinator.collect_cluster(99, false).await,
        Err(EngineError::ClusterNotFound(99))
    ));
    assert!(matches!(
        f.coordinator.collect_cluster(4, false).await,
        Err(EngineError::ClusterOffline(_))
    ));
    assert!(matches!(
        f.coordinator.collect_cluster(2, false).await,
        Err(EngineError::Connect { .. })
    ));
}

#[tokio::test]
async fn test_collection_failure_recorded() {
    let store = FakeStore::new()
        .with_cluster(descriptor(1, "alpha"), Some(cluster_a().into_handle()))
        .with_cluster(
            descriptor(2, "broken"),
            Some(FakeCluster::new().failing_namespaces().into_handle()),
        );
    let f = fixture(store);

    let result = f.coordinator.collect_all(false).await.unwrap();

    assert_eq!(result.clusters_analyzed, 1);
    assert!(f.activity.collection_events().contains(&(2, false, 0)));
}

#[tokio::test]
async fn test_health_reflects_failures() {
    let registry = HealthRegistry::new();
    let f = fixture(three_clusters());
    let coordinator = f.coordinator.with_health(registry.clone());

    coordinator.collect_all(false).await.unwrap();

    let collector = registry.component(components::COLLECTOR).await.unwrap();
    assert_eq!(collector.status, ComponentStatus::Degraded);
    let store = registry.component(components::CLUSTER_STORE).await.unwrap();
    assert_eq!(store.status, ComponentStatus::Healthy);

    f.store.fail_roster(true);
    coordinator.invalidate_all();
    assert_err!(coordinator.collect_all(false).await);
    let store = registry.component(components::CLUSTER_STORE).await.unwrap();
    assert_eq!(store.status, ComponentStatus::Unhealthy);
}

#[tokio::test(start_paused = true)]
async fn test_batch_deadline_returns_partial_results() {
    let config = EngineConfig {
        batch_deadline: Duration::from_secs(10),
        ..EngineConfig::default()
    };
    let slow = FakeCluster::new()
        .with_pods("web", vec![running_pod("web", "slow-1")])
        .slow_workloads("web", Duration::from_secs(30));
    let store = FakeStore::new()
        .with_cluster(descriptor(1, "alpha"), Some(cluster_a().into_handle()))
        .with_cluster(descriptor(2, "slow"), Some(slow.into_handle()));
    let f = fixture_with(store, RecordingPersistence::default(), config);

    let start = Instant::now();
    let result = f.coordinator.collect_all(false).await.unwrap();

    assert!(start.elapsed() <= Duration::from_secs(11));
    assert!(result.top_problems.iter().all(|r| r.cluster_name == "alpha"));
    assert_eq!(result.total_pods, 2);
}
