//! Per-cluster periodic collection scheduler
//!
//! The scheduler keeps one job per online cluster, keyed by cluster id,
//! plus two supervisory loops:
//! - a health check that tallies job statuses into metrics and health
//! - a management loop that reconciles jobs against the roster and runs
//!   maintenance on the activity ledger and history store
//!
//! The job map has its own lock, separate from each job's state.

mod job;
mod settings;


pub use job::{CollectionTrigger, JobState, JobStatus};
pub use settings::ScheduleSettings;

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::{broadcast, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::coordinator::Coordinator;
use crate::error::{EngineError, SchedulerError, SettingsError, StoreError};
use crate::health::{components, HealthRegistry};
use crate::models::{AlertLevel, ClusterDescriptor, ClusterReport};
use crate::observability::{InsightMetrics, StructuredLogger};
use crate::ports::{ActivityRecorder, ClusterConfigStore, PersistenceStore};
use job::{Job, JobContext};

#[async_trait]
impl CollectionTrigger for Coordinator {
    async fn collect_cluster(
        &self,
        cluster_id: u64,
        persist: bool,
    ) -> Result<ClusterReport, EngineError> {
        Coordinator::collect_cluster(self, cluster_id, persist).await
    }
}

/// Scheduler-wide snapshot
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStatus {
    pub running: bool,
    pub total_jobs: usize,
    pub running_jobs: usize,
    pub error_jobs: usize,
    pub suspended_jobs: usize,
    pub stopped_jobs: usize,
    pub settings: ScheduleSettings,
}

/// Changes made by one reconciliation pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileSummary {
    pub added: usize,
    pub updated: usize,
    pub removed: usize,
}

/// Rows removed by one maintenance pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MaintenanceReport {
    pub duplicate_alerts: u64,
    pub old_activities: u64,
    pub history_rows: u64,
}

struct SchedulerInner {
    store: Arc<dyn ClusterConfigStore>,
    persistence: Arc<dyn PersistenceStore>,
    activity: Arc<dyn ActivityRecorder>,
    ctx: JobContext,
    jobs: Mutex<HashMap<u64, Job>>,
    running: AtomicBool,
    shutdown: Mutex<Option<broadcast::Sender<()>>>,
    loops: Mutex<Vec<JoinHandle<()>>>,
    health: Option<HealthRegistry>,
}

/// Clonable handle to the scheduler
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

impl Scheduler {
    pub fn new(
        trigger: Arc<dyn CollectionTrigger>,
        store: Arc<dyn ClusterConfigStore>,
        persistence: Arc<dyn PersistenceStore>,
        activity: Arc<dyn ActivityRecorder>,
        settings: ScheduleSettings,
        logger: StructuredLogger,
    ) -> Result<Self, SettingsError> {
        Self::build(trigger, store, persistence, activity, settings, logger, None)
    }

    /// Like `new`, publishing job health into `registry`
    pub fn with_health(
        trigger: Arc<dyn CollectionTrigger>,
        store: Arc<dyn ClusterConfigStore>,
        persistence: Arc<dyn PersistenceStore>,
        activity: Arc<dyn ActivityRecorder>,
        settings: ScheduleSettings,
        logger: StructuredLogger,
        registry: HealthRegistry,
    ) -> Result<Self, SettingsError> {
        Self::build(trigger, store, persistence, activity, settings, logger, Some(registry))
    }

    fn build(
        trigger: Arc<dyn CollectionTrigger>,
        store: Arc<dyn ClusterConfigStore>,
        persistence: Arc<dyn PersistenceStore>,
        activity: Arc<dyn ActivityRecorder>,
        settings: ScheduleSettings,
        logger: StructuredLogger,
        health: Option<HealthRegistry>,
    ) -> Result<Self, SettingsError> {
        settings.validate()?;

        let ctx = JobContext {
            trigger,
            gate: Arc::new(RwLock::new(Arc::new(Semaphore::new(
                settings.max_concurrent_jobs,
            )))),
            settings: Arc::new(RwLock::new(settings)),
            metrics: InsightMetrics::new(),
            logger,
        };

        Ok(Self {
            inner: Arc::new(SchedulerInner {
                store,
                persistence,
                activity,
                ctx,
                jobs: Mutex::new(HashMap::new()),
                running: AtomicBool::new(false),
                shutdown: Mutex::new(None),
                loops: Mutex::new(Vec::new()),
                health,
            }),
        })
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    pub fn settings(&self) -> ScheduleSettings {
        self.inner.ctx.settings()
    }

    /// Start a job per online cluster and the supervisory loops
    ///
    /// Idempotent. A roster read failure leaves the scheduler stopped.
    pub async fn start(&self) -> Result<(), SchedulerError> {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            debug!("Scheduler already running");
            return Ok(());
        }

        let roster = match self.inner.store.list_clusters().await {
            Ok(roster) => roster,
            Err(e) => {
                self.inner.running.store(false, Ordering::SeqCst);
                return Err(SchedulerError::Roster(e));
            }
        };
        let summary = self.apply_roster(&roster);

        let (shutdown, _) = broadcast::channel(1);
        let health_loop = tokio::spawn(health_loop(self.clone(), shutdown.subscribe()));
        let management_loop = tokio::spawn(management_loop(self.clone(), shutdown.subscribe()));
        *lock(&self.inner.shutdown) = Some(shutdown);
        lock(&self.inner.loops).extend([health_loop, management_loop]);

        if let Some(registry) = &self.inner.health {
            registry.set_healthy(components::SCHEDULER).await;
        }
        info!(jobs = summary.added, "Scheduler started");
        Ok(())
    }

    /// Stop every job and the supervisory loops; idempotent
    pub async fn stop(&self) {
        if !self.inner.running.swap(false, Ordering::SeqCst) {
            return;
        }

        if let Some(shutdown) = lock(&self.inner.shutdown).take() {
            let _ = shutdown.send(());
        }

        let mut tasks: Vec<JoinHandle<()>> = {
            let mut jobs = lock(&self.inner.jobs);
            jobs.values_mut().filter_map(Job::stop).collect()
        };
        tasks.append(&mut lock(&self.inner.loops));

        for task in tasks {
            if let Err(e) = task.await {
                if !e.is_cancelled() {
                    warn!(error = %e, "Scheduler task failed during shutdown");
                }
            }
        }
        info!("Scheduler stopped");
    }

    /// Stop a job, clear its errors and start it again
    pub fn restart_job(&self, cluster_id: u64) -> Result<JobState, SchedulerError> {
        if !self.is_running() {
            return Err(SchedulerError::NotRunning);
        }

        let mut jobs = lock(&self.inner.jobs);
        let job = jobs
            .get_mut(&cluster_id)
            .ok_or(SchedulerError::JobNotFound(cluster_id))?;

        job.stop();
        job.clear_errors();
        job.start(self.inner.ctx.clone());

        let state = job.snapshot();
        info!(cluster = %state.cluster_name, "Collection job restarted");
        Ok(state)
    }

    /// Validate and swap in new settings
    ///
    /// Nothing is applied when validation fails. A new default interval is
    /// pushed to jobs on the next reconciliation.
    pub fn update_settings(&self, settings: ScheduleSettings) -> Result<(), SchedulerError> {
        settings.validate()?;

        let previous = {
            let mut current = self
                .inner
                .ctx
                .settings
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            std::mem::replace(&mut *current, settings.clone())
        };

        if previous.max_concurrent_jobs != settings.max_concurrent_jobs {
            *self
                .inner
                .ctx
                .gate
                .write()
                .unwrap_or_else(PoisonError::into_inner) =
                Arc::new(Semaphore::new(settings.max_concurrent_jobs));
        }

        info!(
            enabled = settings.enabled,
            default_interval_secs = settings.default_interval.as_secs(),
            max_concurrent_jobs = settings.max_concurrent_jobs,
            retry_attempts = settings.retry_attempts,
            "Scheduler settings updated"
        );
        Ok(())
    }

    pub fn status(&self) -> SchedulerStatus {
        let jobs = self.list_jobs();
        let count = |status: JobStatus| jobs.iter().filter(|j| j.status == status).count();

        SchedulerStatus {
            running: self.is_running(),
            total_jobs: jobs.len(),
            running_jobs: count(JobStatus::Running),
            error_jobs: count(JobStatus::Error),
            suspended_jobs: count(JobStatus::Suspended),
            stopped_jobs: count(JobStatus::Stopped),
            settings: self.settings(),
        }
    }

    /// Job snapshots ordered by cluster id
    pub fn list_jobs(&self) -> Vec<JobState> {
        let mut jobs: Vec<JobState> = lock(&self.inner.jobs)
            .values()
            .map(Job::snapshot)
            .collect();
        jobs.sort_by_key(|job| job.cluster_id);
        jobs
    }

    pub fn job(&self, cluster_id: u64) -> Option<JobState> {
        lock(&self.inner.jobs).get(&cluster_id).map(Job::snapshot)
    }

    /// Reconcile jobs against the current roster
    pub async fn reconcile(&self) -> Result<ReconcileSummary, StoreError> {
        let roster = self.inner.store.list_clusters().await?;
        if !self.is_running() {
            return Ok(ReconcileSummary::default());
        }
        Ok(self.apply_roster(&roster))
    }

    fn apply_roster(&self, roster: &[ClusterDescriptor]) -> ReconcileSummary {
        let default_interval = self.settings().default_interval;
        let online: Vec<&ClusterDescriptor> = roster.iter().filter(|c| c.is_online()).collect();
        let online_ids: HashSet<u64> = online.iter().map(|c| c.id).collect();
        let mut summary = ReconcileSummary::default();

        let mut jobs = lock(&self.inner.jobs);

        jobs.retain(|id, job| {
            if online_ids.contains(id) {
                return true;
            }
            job.stop();
            summary.removed += 1;
            false
        });

        for cluster in online {
            let interval = cluster.collect_interval().unwrap_or(default_interval);
            match jobs.get_mut(&cluster.id) {
                Some(job) => {
                    job.rename(&cluster.name);
                    if job.interval() != interval {
                        job.stop();
                        job.set_interval(interval);
                        job.start(self.inner.ctx.clone());
                        summary.updated += 1;
                    } else if !job.is_active() {
                        job.start(self.inner.ctx.clone());
                    }
                }
                None => {
                    let mut job = Job::new(cluster, interval);
                    job.start(self.inner.ctx.clone());
                    jobs.insert(cluster.id, job);
                    summary.added += 1;
                }
            }
        }

        if summary != ReconcileSummary::default() {
            info!(
                added = summary.added,
                updated = summary.updated,
                removed = summary.removed,
                jobs = jobs.len(),
                "Reconciled collection jobs"
            );
        }
        summary
    }

    /// Sweep duplicate alerts, expire old activity and history
    ///
    /// Each step is best effort; failures are logged and count as zero.
    pub async fn run_maintenance(&self) -> MaintenanceReport {
        let settings = self.settings();
        let activity = &self.inner.activity;
        let mut report = MaintenanceReport::default();

        match activity.cleanup_duplicate_alerts().await {
            Ok(removed) => {
                report.duplicate_alerts = removed;
                if removed > 0 {
                    self.system_event(
                        "Duplicate alerts cleaned up",
                        &format!("Removed {removed} duplicate alerts"),
                    )
                    .await;
                }
            }
            Err(e) => warn!(error = %e, "Duplicate alert cleanup failed"),
        }

        match activity.cleanup_old_activities(settings.retention_days).await {
            Ok(removed) => {
                report.old_activities = removed;
                if removed > 0 {
                    self.system_event(
                        "Old activities cleaned up",
                        &format!(
                            "Removed {removed} activities older than {} days",
                            settings.retention_days
                        ),
                    )
                    .await;
                }
            }
            Err(e) => warn!(error = %e, "Activity retention cleanup failed"),
        }

        if settings.enable_persistence {
            match self
                .inner
                .persistence
                .cleanup_history(settings.retention_days)
                .await
            {
                Ok(removed) => report.history_rows = removed,
                Err(e) => warn!(error = %e, "History retention cleanup failed"),
            }
        }

        self.inner.ctx.logger.log_maintenance(
            report.duplicate_alerts,
            report.old_activities,
            report.history_rows,
        );
        report
    }

    /// Tally job statuses into metrics and the scheduler health component
    pub async fn health_check(&self) -> SchedulerStatus {
        let status = self.status();
        self.inner.ctx.metrics.set_job_counts(&[
            ("running", status.running_jobs),
            ("error", status.error_jobs),
            ("suspended", status.suspended_jobs),
            ("stopped", status.stopped_jobs),
        ]);

        if let Some(registry) = &self.inner.health {
            if status.suspended_jobs > 0 {
                registry
                    .set_degraded(
                        components::SCHEDULER,
                        format!("{} collection jobs suspended", status.suspended_jobs),
                    )
                    .await;
            } else {
                registry.set_healthy(components::SCHEDULER).await;
            }
        }

        debug!(
            total = status.total_jobs,
            running = status.running_jobs,
            error = status.error_jobs,
            suspended = status.suspended_jobs,
            "Scheduler health check"
        );
        status
    }

    async fn system_event(&self, title: &str, message: &str) {
        if let Err(e) = self
            .inner
            .activity
            .record_system_event(AlertLevel::Info, title, message)
            .await
        {
            warn!(error = %e, "Failed to record system event");
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Sleep for a settings-derived period unless shutdown arrives first
async fn wait_or_shutdown(period: Duration, shutdown: &mut broadcast::Receiver<()>) -> bool {
    tokio::select! {
        biased;
        _ = shutdown.recv() => false,
        _ = sleep(period) => true,
    }
}

async fn health_loop(scheduler: Scheduler, mut shutdown: broadcast::Receiver<()>) {
    loop {
        let period = scheduler.settings().health_check_interval;
        if !wait_or_shutdown(period, &mut shutdown).await {
            break;
        }
        scheduler.health_check().await;
    }
    debug!("Scheduler health loop exited");
}

async fn management_loop(scheduler: Scheduler, mut shutdown: broadcast::Receiver<()>) {
    loop {
        let period = scheduler.settings().management_interval;
        if !wait_or_shutdown(period, &mut shutdown).await {
            break;
        }
        if let Err(e) = scheduler.reconcile().await {
            warn!(error = %e, "Failed to reconcile collection jobs");
        }
        scheduler.run_maintenance().await;
    }
    debug!("Scheduler management loop exited");
}
