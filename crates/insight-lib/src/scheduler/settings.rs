use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::SettingsError;
use crate::models::MAX_COLLECT_INTERVAL;

/// Runtime-swappable scheduler settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleSettings {
    /// When false the loops stay alive but ticks do nothing
    pub enabled: bool,
    /// Interval for clusters without their own (default: 30 minutes)
    #[serde(with = "secs")]
    pub default_interval: Duration,
    /// Collections running at once across all jobs (default: 5)
    pub max_concurrent_jobs: usize,
    /// Consecutive failures before a job is suspended (default: 3)
    ///
    /// Each failure first marks the job `error`; with 1 the job moves on to
    /// `suspended` in the same tick as its first failure.
    pub retry_attempts: u32,
    /// Wait before the next attempt after a failure (default: 5 minutes)
    #[serde(with = "secs")]
    pub retry_interval: Duration,
    /// Persist each scheduled collection (default: true)
    pub enable_persistence: bool,
    #[serde(with = "secs")]
    pub health_check_interval: Duration,
    /// Roster reconciliation and maintenance cadence (default: 30 minutes)
    #[serde(with = "secs")]
    pub management_interval: Duration,
    /// Deadline for one scheduled collection (default: 5 minutes)
    #[serde(with = "secs")]
    pub job_timeout: Duration,
    /// Activity and history retention used by maintenance (default: 30 days)
    pub retention_days: u32,
}

impl Default for ScheduleSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            default_interval: Duration::from_secs(30 * 60),
            max_concurrent_jobs: 5,
            retry_attempts: 3,
            retry_interval: Duration::from_secs(5 * 60),
            enable_persistence: true,
            health_check_interval: Duration::from_secs(10 * 60),
            management_interval: Duration::from_secs(30 * 60),
            job_timeout: Duration::from_secs(5 * 60),
            retention_days: 30,
        }
    }
}

impl ScheduleSettings {
    /// Every duration and count must be positive, and no duration may
    /// exceed `MAX_COLLECT_INTERVAL`
    pub fn validate(&self) -> Result<(), SettingsError> {
        let durations = [
            ("default_interval", self.default_interval),
            ("retry_interval", self.retry_interval),
            ("health_check_interval", self.health_check_interval),
            ("management_interval", self.management_interval),
            ("job_timeout", self.job_timeout),
        ];
        if let Some((field, _)) = durations.iter().find(|(_, d)| d.is_zero()) {
            return Err(SettingsError::NotPositive(*field));
        }
        if let Some((field, _)) = durations.iter().find(|(_, d)| *d > MAX_COLLECT_INTERVAL) {
            return Err(SettingsError::TooLarge {
                field: *field,
                max_secs: MAX_COLLECT_INTERVAL.as_secs(),
            });
        }
        if self.max_concurrent_jobs == 0 {
            return Err(SettingsError::NotPositive("max_concurrent_jobs"));
        }
        if self.retry_attempts == 0 {
            return Err(SettingsError::NotPositive("retry_attempts"));
        }
        if self.retention_days == 0 {
            return Err(SettingsError::NotPositive("retention_days"));
        }
        Ok(())
    }
}

/// Durations as whole seconds on the wire
pub(crate) mod secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}
