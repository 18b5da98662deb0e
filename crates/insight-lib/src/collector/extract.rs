//! Per-workload resource extraction
//!
//! Sums container requests and limits, fills usage from the metrics sample
//! or estimates it, synthesizes missing requests/limits and computes the
//! utilization percentages.

use super::{PodSnapshot, UsageSample};
use crate::models::{WorkloadResourceRecord, WorkloadStatus, MIB};

pub const DEFAULT_MEMORY_REQUEST: u64 = 256 * MIB;
pub const DEFAULT_MEMORY_LIMIT: u64 = 512 * MIB;
pub const DEFAULT_CPU_REQUEST: u64 = 100;
pub const DEFAULT_CPU_LIMIT: u64 = 500;

const ESTIMATED_MEMORY_FLOOR: u64 = 128 * MIB;
const ESTIMATED_CPU_FLOOR: u64 = 50;

/// Build an unclassified record for one workload
///
/// `usage` is the workload's metrics sample, if the metrics source had one.
pub fn extract_record(
    pod: &PodSnapshot,
    usage: Option<&UsageSample>,
    cluster_name: &str,
) -> WorkloadResourceRecord {
    let mut memory_request = 0u64;
    let mut memory_limit = 0u64;
    let mut cpu_request = 0u64;
    let mut cpu_limit = 0u64;

    for container in &pod.containers {
        memory_request += container.memory_request.unwrap_or(0);
        memory_limit += container.memory_limit.unwrap_or(0);
        cpu_request += container.cpu_request.unwrap_or(0);
        cpu_limit += container.cpu_limit.unwrap_or(0);
    }

    let sample = usage.copied().unwrap_or_default();
    let (memory_usage, memory_estimated) = match sample.memory_bytes {
        0 => (estimate_memory_usage(memory_request, memory_limit), true),
        sampled => (sampled, false),
    };
    let (cpu_usage, cpu_estimated) = match sample.cpu_millicores {
        0 => (estimate_cpu_usage(cpu_request, cpu_limit), true),
        sampled => (sampled, false),
    };

    let memory_request_declared = memory_request > 0;
    let cpu_request_declared = cpu_request > 0;

    let (memory_request, memory_limit) = default_memory(memory_request, memory_limit);
    let (cpu_request, cpu_limit) = default_cpu(cpu_request, cpu_limit);

    WorkloadResourceRecord {
        pod_name: pod.name.clone(),
        namespace: pod.namespace.clone(),
        node_name: pod.node_name.clone(),
        cluster_name: cluster_name.trim().to_string(),
        memory_usage,
        memory_request,
        memory_limit,
        cpu_usage,
        cpu_request,
        cpu_limit,
        memory_req_pct: percent(memory_usage, memory_request),
        memory_limit_pct: percent(memory_usage, memory_limit),
        cpu_req_pct: percent(cpu_usage, cpu_request),
        cpu_limit_pct: percent(cpu_usage, cpu_limit),
        memory_request_declared,
        cpu_request_declared,
        metrics_estimated: memory_estimated || cpu_estimated,
        status: WorkloadStatus::Reasonable,
        issues: Vec::new(),
        score: 0.0,
        creation_time: pod.creation_time,
    }
}

/// 40% of request, else 20% of limit, else a fixed floor
fn estimate_memory_usage(request: u64, limit: u64) -> u64 {
    let estimate = if request > 0 {
        scale(request, 0.40)
    } else if limit > 0 {
        scale(limit, 0.20)
    } else {
        ESTIMATED_MEMORY_FLOOR
    };
    estimate.max(1)
}

/// 30% of request, else 12% of limit, else a fixed floor
fn estimate_cpu_usage(request: u64, limit: u64) -> u64 {
    let estimate = if request > 0 {
        scale(request, 0.30)
    } else if limit > 0 {
        scale(limit, 0.12)
    } else {
        ESTIMATED_CPU_FLOOR
    };
    estimate.max(1)
}

fn default_memory(request: u64, limit: u64) -> (u64, u64) {
    match (request, limit) {
        (0, 0) => (DEFAULT_MEMORY_REQUEST, DEFAULT_MEMORY_LIMIT),
        (0, limit) => ((limit / 2).max(1), limit),
        (request, 0) => (request, request.saturating_mul(2)),
        declared => declared,
    }
}

fn default_cpu(request: u64, limit: u64) -> (u64, u64) {
    match (request, limit) {
        (0, 0) => (DEFAULT_CPU_REQUEST, DEFAULT_CPU_LIMIT),
        (0, limit) => (scale(limit, 0.4).max(1), limit),
        (request, 0) => (request, request.saturating_mul(3)),
        declared => declared,
    }
}

fn scale(value: u64, factor: f64) -> u64 {
    (value as f64 * factor) as u64
}

fn percent(usage: u64, base: u64) -> f64 {
    if base == 0 {
        0.0
    } else {
        usage as f64 / base as f64 * 100.0
    }
}
