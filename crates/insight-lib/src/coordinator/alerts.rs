//! Severity-tiered alerts for a cluster's problem workloads
//!
//! Every ranked problem workload is reported to the activity ledger as a
//! resource alert. Critical findings also become ledger alerts, but only
//! the first few per pass, and every alert goes through the deduplicator.

use std::sync::Arc;

use tracing::warn;

use crate::dedup::AlertDeduplicator;
use crate::models::{AlertLevel, AlertRecord, ClusterDescriptor, WorkloadResourceRecord};
use crate::observability::{InsightMetrics, StructuredLogger};
use crate::ports::ActivityRecorder;

pub const CRITICAL_ALERT_TITLE: &str = "Critical resource configuration issue";
pub const SUMMARY_ALERT_TITLE: &str = "Cluster resource configuration summary";

/// Memory request utilization below this is critical (percent)
const CRITICAL_MEMORY_REQ_PCT: f64 = 10.0;
/// CPU request utilization below this is critical (percent)
const CRITICAL_CPU_REQ_PCT: f64 = 5.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Critical,
    Warning,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Critical => "critical",
            Severity::Warning => "warning",
        }
    }
}

/// Tier a problem workload and describe it
pub fn assess(record: &WorkloadResourceRecord) -> (Severity, String) {
    let qualified = format!("{}/{}", record.namespace, record.pod_name);

    if record.issues.iter().any(|issue| issue.is_missing_request()) {
        return (
            Severity::Critical,
            format!("Pod {qualified} is missing resource requests"),
        );
    }

    let memory_idle =
        record.memory_req_pct > 0.0 && record.memory_req_pct < CRITICAL_MEMORY_REQ_PCT;
    let cpu_idle = record.cpu_req_pct > 0.0 && record.cpu_req_pct < CRITICAL_CPU_REQ_PCT;
    if memory_idle || cpu_idle {
        return (
            Severity::Critical,
            format!(
                "Pod {qualified} has very low utilization: memory {:.1}%, CPU {:.1}%",
                record.memory_req_pct, record.cpu_req_pct
            ),
        );
    }

    (
        Severity::Warning,
        format!("Pod {qualified} has an unreasonable resource configuration"),
    )
}

/// Counts from one alerting pass over a cluster
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AlertTally {
    pub critical: usize,
    pub warning: usize,
    pub emitted: usize,
    pub suppressed: usize,
}

#[derive(Clone)]
pub(crate) struct AlertEmitter {
    activity: Arc<dyn ActivityRecorder>,
    dedup: Arc<AlertDeduplicator>,
    metrics: InsightMetrics,
    logger: StructuredLogger,
    critical_limit: usize,
}

impl AlertEmitter {
    pub(crate) fn new(
        activity: Arc<dyn ActivityRecorder>,
        dedup: Arc<AlertDeduplicator>,
        metrics: InsightMetrics,
        logger: StructuredLogger,
        critical_limit: usize,
    ) -> Self {
        Self {
            activity,
            dedup,
            metrics,
            logger,
            critical_limit,
        }
    }

    /// Alert on the problem records of one cluster, worst first
    ///
    /// `records` is expected in severity order; critical ledger alerts go to
    /// the first few critical findings. Ledger failures are logged and never
    /// abort the pass.
    pub(crate) async fn emit_cluster_alerts(
        &self,
        cluster: &ClusterDescriptor,
        records: &[WorkloadResourceRecord],
    ) -> AlertTally {
        let mut tally = AlertTally::default();

        for record in records.iter().filter(|r| r.is_unreasonable()) {
            let (severity, message) = assess(record);

            if let Err(e) = self
                .activity
                .record_resource_alert(cluster, &record.pod_name, severity.as_str(), &message)
                .await
            {
                warn!(cluster = %cluster.name, pod = %record.pod_name, error = %e, "Failed to record resource alert");
            }

            match severity {
                Severity::Critical => {
                    tally.critical += 1;
                    if tally.critical <= self.critical_limit {
                        self.emit(cluster, AlertLevel::Error, CRITICAL_ALERT_TITLE, message, false, &mut tally)
                            .await;
                    }
                }
                Severity::Warning => tally.warning += 1,
            }
        }

        if tally.critical > 0 || tally.warning > 0 {
            let level = if tally.critical > self.critical_limit {
                AlertLevel::Error
            } else {
                AlertLevel::Warning
            };
            let message = format!(
                "Found {} critical and {} warning resource issues",
                tally.critical, tally.warning
            );
            self.emit(cluster, level, SUMMARY_ALERT_TITLE, message, true, &mut tally)
                .await;
        }

        tally
    }

    async fn emit(
        &self,
        cluster: &ClusterDescriptor,
        level: AlertLevel,
        title: &str,
        message: String,
        summary: bool,
        tally: &mut AlertTally,
    ) {
        let decision = self.dedup.should_emit(cluster.id, level, title);
        self.logger.log_alert(
            &cluster.name,
            &level.to_string(),
            title,
            decision.emit,
            decision.occurrences,
        );

        if !decision.emit {
            tally.suppressed += 1;
            self.metrics.inc_alerts_suppressed();
            if let Some(alert_id) = decision.prior_alert_id {
                if let Err(e) = self
                    .activity
                    .update_alert_occurrences(alert_id, decision.occurrences)
                    .await
                {
                    warn!(alert_id = alert_id, error = %e, "Failed to update alert occurrences");
                }
            }
            return;
        }

        let alert = AlertRecord {
            cluster_id: cluster.id,
            cluster_name: cluster.name.clone(),
            level,
            title: title.to_string(),
            message,
            occurrences: decision.occurrences,
        };
        let recorded = if summary {
            self.activity.record_summary_alert(&alert).await
        } else {
            self.activity.record_alert(&alert).await
        };

        match recorded {
            Ok(alert_id) => {
                tally.emitted += 1;
                self.metrics.inc_alerts_emitted();
                self.dedup.record_alert_id(cluster.id, level, title, alert_id);
            }
            Err(e) => {
                warn!(cluster = %cluster.name, title = %title, error = %e, "Failed to record alert");
            }
        }
    }
}
