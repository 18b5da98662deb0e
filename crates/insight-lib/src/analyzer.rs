//! Resource analysis and severity ranking
//!
//! Pure functions over workload records:
//! - issue detection against utilization thresholds
//! - severity scoring (normalized shortfall plus a flat missing-request penalty)
//! - stable descending ranking, truncated to the worst 50

use chrono::{DateTime, Utc};

use crate::models::{AnalysisResult, Issue, WorkloadResourceRecord, WorkloadStatus};

/// Maximum records kept in `AnalysisResult::top_problems`
pub const TOP_PROBLEMS_LIMIT: usize = 50;

/// Request utilization below this is flagged (memory, percent)
pub const MEMORY_REQUEST_THRESHOLD: f64 = 20.0;
/// Limit utilization below this is flagged (memory, percent)
pub const MEMORY_LIMIT_THRESHOLD: f64 = 15.0;
pub const CPU_REQUEST_THRESHOLD: f64 = 15.0;
pub const CPU_LIMIT_THRESHOLD: f64 = 10.0;
/// Limit/request ratios above this are flagged
pub const LIMIT_RATIO_THRESHOLD: f64 = 3.0;
/// Added per resource type with no declared request
pub const MISSING_REQUEST_PENALTY: f64 = 200.0;

/// Issues for a record, in a fixed order
pub fn detect_issues(record: &WorkloadResourceRecord) -> Vec<Issue> {
    let mut issues = Vec::new();

    if below(record.memory_request, record.memory_req_pct, MEMORY_REQUEST_THRESHOLD) {
        issues.push(Issue::MemoryRequestUnderutilized);
    }
    if below(record.memory_limit, record.memory_limit_pct, MEMORY_LIMIT_THRESHOLD) {
        issues.push(Issue::MemoryLimitUnderutilized);
    }
    if below(record.cpu_request, record.cpu_req_pct, CPU_REQUEST_THRESHOLD) {
        issues.push(Issue::CpuRequestUnderutilized);
    }
    if below(record.cpu_limit, record.cpu_limit_pct, CPU_LIMIT_THRESHOLD) {
        issues.push(Issue::CpuLimitUnderutilized);
    }

    if missing_memory_request(record) {
        issues.push(Issue::MissingMemoryRequest);
    }
    if missing_cpu_request(record) {
        issues.push(Issue::MissingCpuRequest);
    }

    if ratio_too_high(record.memory_request, record.memory_limit) {
        issues.push(Issue::MemoryLimitRatioTooHigh);
    }
    if ratio_too_high(record.cpu_request, record.cpu_limit) {
        issues.push(Issue::CpuLimitRatioTooHigh);
    }

    issues
}

/// Severity score; higher is worse
///
/// Each utilization dimension contributes `(threshold - pct) / threshold * 100`,
/// which goes negative above the threshold. Missing requests dominate.
pub fn score(record: &WorkloadResourceRecord) -> f64 {
    let mut score = 0.0;

    score += shortfall(record.memory_req_pct, MEMORY_REQUEST_THRESHOLD);
    score += shortfall(record.memory_limit_pct, MEMORY_LIMIT_THRESHOLD);
    score += shortfall(record.cpu_req_pct, CPU_REQUEST_THRESHOLD);
    score += shortfall(record.cpu_limit_pct, CPU_LIMIT_THRESHOLD);

    if missing_memory_request(record) {
        score += MISSING_REQUEST_PENALTY;
    }
    if missing_cpu_request(record) {
        score += MISSING_REQUEST_PENALTY;
    }

    score
}

/// Attach issues, status and score to a record
pub fn classify(record: &mut WorkloadResourceRecord) {
    record.issues = detect_issues(record);
    record.status = if record.issues.is_empty() {
        WorkloadStatus::Reasonable
    } else {
        WorkloadStatus::Unreasonable
    };
    record.score = score(record);
}

/// Analyze records, stamping the result with the current time
pub fn analyze(records: &[WorkloadResourceRecord], clusters_analyzed: usize) -> AnalysisResult {
    analyze_at(records, clusters_analyzed, Utc::now())
}

/// Deterministic analysis with an explicit generation timestamp
pub fn analyze_at(
    records: &[WorkloadResourceRecord],
    clusters_analyzed: usize,
    generated_at: DateTime<Utc>,
) -> AnalysisResult {
    let mut problems: Vec<WorkloadResourceRecord> = records
        .iter()
        .cloned()
        .map(|mut record| {
            classify(&mut record);
            record
        })
        .filter(WorkloadResourceRecord::is_unreasonable)
        .collect();

    let unreasonable_pods = problems.len();

    // sort_by is stable, so ties keep input order
    problems.sort_by(|a, b| b.score.total_cmp(&a.score));
    problems.truncate(TOP_PROBLEMS_LIMIT);

    AnalysisResult {
        total_pods: records.len(),
        unreasonable_pods,
        top_problems: problems,
        generated_at,
        clusters_analyzed,
    }
}

/// Records with the largest memory requests first
pub fn top_by_memory_request(
    records: &[WorkloadResourceRecord],
    limit: usize,
) -> Vec<WorkloadResourceRecord> {
    top_by(records, limit, |r| r.memory_request)
}

/// Records with the largest CPU requests first
pub fn top_by_cpu_request(
    records: &[WorkloadResourceRecord],
    limit: usize,
) -> Vec<WorkloadResourceRecord> {
    top_by(records, limit, |r| r.cpu_request)
}

fn top_by(
    records: &[WorkloadResourceRecord],
    limit: usize,
    key: impl Fn(&WorkloadResourceRecord) -> u64,
) -> Vec<WorkloadResourceRecord> {
    let mut ranked = records.to_vec();
    ranked.sort_by(|a, b| key(b).cmp(&key(a)));
    ranked.truncate(limit);
    ranked
}

fn missing_memory_request(record: &WorkloadResourceRecord) -> bool {
    !record.memory_request_declared || record.memory_request == 0
}

fn missing_cpu_request(record: &WorkloadResourceRecord) -> bool {
    !record.cpu_request_declared || record.cpu_request == 0
}

fn below(base: u64, pct: f64, threshold: f64) -> bool {
    base > 0 && pct > 0.0 && pct < threshold
}

fn shortfall(pct: f64, threshold: f64) -> f64 {
    if pct > 0.0 {
        (threshold - pct) / threshold * 100.0
    } else {
        0.0
    }
}

fn ratio_too_high(request: u64, limit: u64) -> bool {
    request > 0 && limit > 0 && limit as f64 / request as f64 > LIMIT_RATIO_THRESHOLD
}
