//! Filtering and pagination over the workload inventory

use serde::{Deserialize, Serialize};

use crate::models::{WorkloadResourceRecord, WorkloadStatus};

pub const DEFAULT_PAGE_SIZE: usize = 20;
pub const MAX_PAGE_SIZE: usize = 1000;

/// Inventory filter; unset fields match everything
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchFilter {
    /// Exact cluster name
    #[serde(default)]
    pub cluster: Option<String>,
    /// Exact namespace
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default)]
    pub status: Option<WorkloadStatus>,
    /// Case-insensitive substring of the pod name
    #[serde(default)]
    pub query: Option<String>,
}

impl SearchFilter {
    pub fn with_cluster(mut self, cluster: impl Into<String>) -> Self {
        self.cluster = Some(cluster.into());
        self
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn with_status(mut self, status: WorkloadStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = Some(query.into());
        self
    }

    pub fn matches(&self, record: &WorkloadResourceRecord) -> bool {
        if let Some(cluster) = non_empty(&self.cluster) {
            if record.cluster_name != cluster {
                return false;
            }
        }
        if let Some(namespace) = non_empty(&self.namespace) {
            if record.namespace != namespace {
                return false;
            }
        }
        if let Some(status) = self.status {
            if record.status != status {
                return false;
            }
        }
        if let Some(query) = non_empty(&self.query) {
            let query = query.to_lowercase();
            if !record.pod_name.to_lowercase().contains(&query) {
                return false;
            }
        }
        true
    }
}

/// One page of results plus the totals needed to page further
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PagedResult<T> {
    pub items: Vec<T>,
    /// Matches before pagination
    pub total: usize,
    pub total_pages: usize,
    pub page: usize,
    pub size: usize,
}

/// Normalise a 1-based page and page size
///
/// Page 0 becomes 1. Size 0 becomes the default and sizes above the
/// maximum are capped.
pub fn normalize_page(page: usize, size: usize) -> (usize, usize) {
    let page = page.max(1);
    let size = match size {
        0 => DEFAULT_PAGE_SIZE,
        s => s.min(MAX_PAGE_SIZE),
    };
    (page, size)
}

/// Slice one page out of `items`
///
/// A page past the end yields an empty `items` with the totals intact.
pub fn paginate<T: Clone>(items: &[T], page: usize, size: usize) -> PagedResult<T> {
    let (page, size) = normalize_page(page, size);
    let total = items.len();
    let total_pages = total.div_ceil(size);

    let start = (page - 1).saturating_mul(size).min(total);
    let end = start.saturating_add(size).min(total);

    PagedResult {
        items: items[start..end].to_vec(),
        total,
        total_pages,
        page,
        size,
    }
}

/// Filter then paginate, preserving inventory order
pub fn search(
    records: &[WorkloadResourceRecord],
    filter: &SearchFilter,
    page: usize,
    size: usize,
) -> PagedResult<WorkloadResourceRecord> {
    let matched: Vec<WorkloadResourceRecord> = records
        .iter()
        .filter(|record| filter.matches(record))
        .cloned()
        .collect();
    paginate(&matched, page, size)
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}
