//! Cluster Insight - multi-cluster workload resource collection
//!
//! This binary wires the engine to file-backed collaborators, runs the
//! per-cluster collection scheduler and serves health and metrics.

use anyhow::{Context, Result};
use insight_lib::{
    health::{components, HealthRegistry},
    observability::{InsightMetrics, StructuredLogger},
    ClusterConfigStore, Coordinator, Scheduler,
};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod api;
mod config;
mod stores;

const INSIGHT_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // JSON logs, filtered by RUST_LOG
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting cluster-insight");

    let config = config::InsightConfig::load()?;
    info!(
        instance = %config.instance,
        clusters_file = %config.clusters_file.display(),
        history_dir = %config.history_dir.display(),
        "Engine configured"
    );

    let health_registry = HealthRegistry::new();
    health_registry.register(components::COLLECTOR).await;
    health_registry.register(components::SCHEDULER).await;
    health_registry.register(components::CLUSTER_STORE).await;

    let metrics = InsightMetrics::new();
    let logger = StructuredLogger::new(&config.instance);

    let store = Arc::new(stores::FileClusterStore::new(&config.clusters_file));
    let persistence = Arc::new(stores::JsonlHistoryStore::new(&config.history_dir));
    let activity = Arc::new(stores::LedgerActivityRecorder::new());

    let roster = store
        .list_clusters()
        .await
        .context("failed to read cluster roster")?;
    logger.log_startup(INSIGHT_VERSION, roster.len());

    let coordinator = Arc::new(
        Coordinator::new(
            config.engine.to_engine_config(),
            store.clone(),
            persistence.clone(),
            activity.clone(),
            logger.clone(),
        )
        .with_health(health_registry.clone()),
    );

    let scheduler = Scheduler::with_health(
        coordinator.clone(),
        store,
        persistence,
        activity,
        config.scheduler.clone(),
        logger.clone(),
        health_registry.clone(),
    )
    .context("invalid scheduler settings")?;
    scheduler
        .start()
        .await
        .context("failed to start scheduler")?;

    if config.warm_up {
        match coordinator.collect_all(false).await {
            Ok(result) => info!(
                clusters = result.clusters_analyzed,
                workloads = result.total_pods,
                unreasonable = result.unreasonable_pods,
                "Warm-up collection complete"
            ),
            Err(e) => warn!(error = %e, "Warm-up collection failed"),
        }
    }

    let app_state = Arc::new(api::AppState::new(health_registry.clone(), metrics));

    health_registry.set_ready(true).await;

    let mut api_handle = tokio::spawn(api::serve(config.api_port, app_state));

    let reason = tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.context("failed to listen for shutdown signal")?;
            "SIGINT received"
        }
        result = &mut api_handle => {
            match result {
                Ok(Ok(())) => "API server exited",
                Ok(Err(e)) => {
                    error!(error = %e, "API server failed");
                    "API server failed"
                }
                Err(e) => {
                    error!(error = %e, "API server task panicked");
                    "API server task panicked"
                }
            }
        }
    };

    health_registry.set_ready(false).await;
    scheduler.stop().await;
    api_handle.abort();
    logger.log_shutdown(reason);
    info!("Shutting down");

    Ok(())
}
