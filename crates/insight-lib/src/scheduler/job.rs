//! One periodic collection job per cluster
//!
//! Each job owns a run loop that waits for its ticker or a stop signal.
//! Job state sits behind its own lock so ticks of different clusters never
//! contend. Every start bumps the job's epoch and a loop only writes state
//! stamped with its own epoch, so a loop that is being stopped cannot
//! overwrite the state of its replacement.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{oneshot, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, timeout, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::settings::{secs, ScheduleSettings};
use crate::error::EngineError;
use crate::models::{ClusterDescriptor, ClusterReport};
use crate::observability::{InsightMetrics, StructuredLogger};

/// Runs one cluster's collection on behalf of a job
#[async_trait]
pub trait CollectionTrigger: Send + Sync {
    async fn collect_cluster(
        &self,
        cluster_id: u64,
        persist: bool,
    ) -> Result<ClusterReport, EngineError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Stopped,
    Running,
    Error,
    Suspended,
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Stopped => write!(f, "stopped"),
            JobStatus::Running => write!(f, "running"),
            JobStatus::Error => write!(f, "error"),
            JobStatus::Suspended => write!(f, "suspended"),
        }
    }
}

/// Snapshot of a job's state
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobState {
    pub cluster_id: u64,
    pub cluster_name: String,
    #[serde(with = "secs")]
    pub interval: Duration,
    pub last_run: Option<DateTime<Utc>>,
    pub next_run: Option<DateTime<Utc>>,
    pub status: JobStatus,
    /// Consecutive failures
    pub error_count: u32,
    pub last_error: Option<String>,
    pub run_count: u64,
    pub success_count: u64,
    #[serde(skip)]
    epoch: u64,
}

/// Shared by every job loop
#[derive(Clone)]
pub(crate) struct JobContext {
    pub(crate) trigger: Arc<dyn CollectionTrigger>,
    pub(crate) settings: Arc<RwLock<ScheduleSettings>>,
    /// Swapped wholesale when `max_concurrent_jobs` changes
    pub(crate) gate: Arc<RwLock<Arc<Semaphore>>>,
    pub(crate) metrics: InsightMetrics,
    pub(crate) logger: StructuredLogger,
}

impl JobContext {
    pub(crate) fn settings(&self) -> ScheduleSettings {
        self.settings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn gate(&self) -> Arc<Semaphore> {
        self.gate
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

struct JobHandle {
    stop: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

pub(crate) struct Job {
    state: Arc<Mutex<JobState>>,
    handle: Option<JobHandle>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TickOutcome {
    Skipped,
    Succeeded,
    Failed,
}

impl Job {
    pub(crate) fn new(cluster: &ClusterDescriptor, interval: Duration) -> Self {
        Self {
            state: Arc::new(Mutex::new(JobState {
                cluster_id: cluster.id,
                cluster_name: cluster.name.clone(),
                interval,
                last_run: None,
                next_run: None,
                status: JobStatus::Stopped,
                error_count: 0,
                last_error: None,
                run_count: 0,
                success_count: 0,
                epoch: 0,
            })),
            handle: None,
        }
    }

    pub(crate) fn snapshot(&self) -> JobState {
        lock(&self.state).clone()
    }

    pub(crate) fn interval(&self) -> Duration {
        lock(&self.state).interval
    }

    pub(crate) fn is_active(&self) -> bool {
        self.handle.is_some()
    }

    pub(crate) fn rename(&self, name: &str) {
        lock(&self.state).cluster_name = name.to_string();
    }

    /// Spawn the run loop; a no-op when already running
    pub(crate) fn start(&mut self, ctx: JobContext) {
        if self.handle.is_some() {
            return;
        }

        let epoch = {
            let mut state = lock(&self.state);
            state.epoch += 1;
            state.status = JobStatus::Running;
            state.next_run = Some(Utc::now() + to_chrono(state.interval));
            state.epoch
        };

        let (stop, stop_rx) = oneshot::channel();
        let task = tokio::spawn(run_loop(self.state.clone(), ctx, epoch, stop_rx));
        self.handle = Some(JobHandle { stop, task });
    }

    /// Signal the run loop to exit and mark the job stopped
    ///
    /// Returns the loop's task so callers can wait for it to finish.
    pub(crate) fn stop(&mut self) -> Option<JoinHandle<()>> {
        let handle = self.handle.take()?;
        // The loop may already have exited
        let _ = handle.stop.send(());

        let mut state = lock(&self.state);
        state.epoch += 1;
        state.status = JobStatus::Stopped;
        state.next_run = None;
        Some(handle.task)
    }

    pub(crate) fn set_interval(&self, interval: Duration) {
        lock(&self.state).interval = interval;
    }

    pub(crate) fn clear_errors(&self) {
        let mut state = lock(&self.state);
        state.error_count = 0;
        state.last_error = None;
    }
}

impl Drop for Job {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = handle.stop.send(());
        }
    }
}

fn lock(state: &Mutex<JobState>) -> std::sync::MutexGuard<'_, JobState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::zero())
}

async fn run_loop(
    state: Arc<Mutex<JobState>>,
    ctx: JobContext,
    epoch: u64,
    mut stop: oneshot::Receiver<()>,
) {
    let (interval, cluster_name) = {
        let state = lock(&state);
        (state.interval, state.cluster_name.clone())
    };
    let mut ticker = interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    debug!(
        cluster = %cluster_name,
        interval_secs = interval.as_secs(),
        "Collection job started"
    );

    loop {
        tokio::select! {
            biased;
            _ = &mut stop => break,
            _ = ticker.tick() => {}
        }

        let outcome = tokio::select! {
            biased;
            _ = &mut stop => break,
            outcome = run_tick(&state, &ctx, epoch) => outcome,
        };

        let wait = if outcome == TickOutcome::Failed {
            let retry = ctx.settings().retry_interval.min(interval);
            ticker.reset_after(retry);
            retry
        } else {
            interval
        };

        let mut guard = lock(&state);
        if guard.epoch == epoch && outcome != TickOutcome::Skipped {
            guard.next_run = Some(Utc::now() + to_chrono(wait));
        }
    }

    debug!(cluster = %cluster_name, "Collection job stopped");
}

async fn run_tick(state: &Mutex<JobState>, ctx: &JobContext, epoch: u64) -> TickOutcome {
    let settings = ctx.settings();
    let (cluster_id, cluster_name) = {
        let state = lock(state);
        if state.epoch != epoch || matches!(state.status, JobStatus::Suspended | JobStatus::Stopped)
        {
            ctx.metrics.inc_scheduler_tick("skipped");
            return TickOutcome::Skipped;
        }
        (state.cluster_id, state.cluster_name.clone())
    };
    if !settings.enabled {
        debug!(cluster = %cluster_name, "Scheduler disabled, skipping tick");
        ctx.metrics.inc_scheduler_tick("skipped");
        return TickOutcome::Skipped;
    }

    // The gate is never closed, so the permit is always granted
    let _permit = ctx.gate().acquire_owned().await;

    {
        let mut state = lock(state);
        if state.epoch != epoch {
            return TickOutcome::Skipped;
        }
        state.last_run = Some(Utc::now());
        state.run_count += 1;
    }

    let start = Instant::now();
    let result = timeout(
        settings.job_timeout,
        ctx.trigger
            .collect_cluster(cluster_id, settings.enable_persistence),
    )
    .await;
    let error = match result {
        Ok(Ok(report)) => {
            info!(
                cluster = %cluster_name,
                total_pods = report.total_pods,
                unreasonable_pods = report.unreasonable_pods,
                elapsed_ms = start.elapsed().as_millis() as u64,
                "Scheduled collection succeeded"
            );
            None
        }
        Ok(Err(e)) => Some(e.to_string()),
        Err(_) => Some(format!(
            "collection timed out after {}s",
            settings.job_timeout.as_secs()
        )),
    };

    let mut state = lock(state);
    if state.epoch != epoch {
        return TickOutcome::Skipped;
    }

    match error {
        None => {
            state.success_count += 1;
            state.error_count = 0;
            state.status = JobStatus::Running;
            ctx.metrics.inc_scheduler_tick("success");
            TickOutcome::Succeeded
        }
        Some(message) => {
            state.error_count += 1;
            state.status = JobStatus::Error;
            ctx.metrics.inc_scheduler_tick("failure");
            warn!(
                cluster = %cluster_name,
                error_count = state.error_count,
                error = %message,
                "Scheduled collection failed"
            );

            // Suspension is only reachable from the error state
            if state.error_count >= settings.retry_attempts {
                state.status = JobStatus::Suspended;
                ctx.logger
                    .log_job_suspended(&cluster_name, state.error_count, &message);
            }
            state.last_error = Some(message);
            TickOutcome::Failed
        }
    }
}
