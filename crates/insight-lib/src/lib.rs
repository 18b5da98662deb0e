//! Multi-cluster workload resource collection engine
//!
//! This crate provides the core functionality for:
//! - Per-cluster workload and usage collection over the Kubernetes API
//! - Resource analysis and severity ranking
//! - Cached multi-cluster aggregation, search and pagination
//! - Periodic per-cluster collection jobs
//! - Alert deduplication and health/observability

pub mod analyzer;
pub mod cache;
pub mod collector;
pub mod coordinator;
pub mod dedup;
pub mod error;
pub mod health;
pub mod models;
pub mod observability;
pub mod ports;
pub mod scheduler;
pub mod search;

#[cfg(test)]
pub(crate) mod testing;

pub use coordinator::{Coordinator, EngineConfig};
pub use dedup::AlertDeduplicator;
pub use error::{
    ClientBuildError, CollectorError, EngineError, SchedulerError, SettingsError, StoreError,
};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{InsightMetrics, StructuredLogger};
pub use ports::{ActivityRecorder, ClusterConfigStore, PersistenceStore};
pub use scheduler::{CollectionTrigger, JobState, JobStatus, ScheduleSettings, Scheduler};
pub use search::{PagedResult, SearchFilter};
