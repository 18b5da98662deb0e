//! Alert deduplication by content fingerprint
//!
//! Alerts are fingerprinted from (cluster, level, title). Repeats inside the
//! suppression window, measured from the last occurrence, are counted but
//! not emitted. Once the window passes the next occurrence emits again and
//! the count keeps accumulating.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError, RwLock};
use std::time::{Duration, Instant};

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::models::AlertLevel;

/// Default suppression window (30 minutes)
pub const DEFAULT_SUPPRESSION_WINDOW: Duration = Duration::from_secs(30 * 60);
/// Entries idle longer than this are dropped on insert (24 hours)
pub const MAX_ENTRY_AGE: Duration = Duration::from_secs(24 * 60 * 60);
pub const DEFAULT_MAX_ENTRIES: usize = 1000;

/// Outcome of a dedup check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DedupDecision {
    /// Whether the caller should emit a new alert
    pub emit: bool,
    /// Ledger id of the alert previously emitted for this fingerprint
    pub prior_alert_id: Option<u64>,
    /// Occurrences seen so far, including this one
    pub occurrences: u32,
}

#[derive(Debug, Clone)]
struct FingerprintEntry {
    first_seen: Instant,
    last_seen: Instant,
    occurrences: u32,
    alert_id: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DedupStats {
    pub cached_fingerprints: usize,
    pub total_occurrences: u64,
    pub suppression_window_secs: u64,
    pub max_entries: usize,
}

/// Fingerprint cache deciding which alerts reach the ledger
pub struct AlertDeduplicator {
    window: RwLock<Duration>,
    max_entries: usize,
    entries: Mutex<HashMap<String, FingerprintEntry>>,
}

impl Default for AlertDeduplicator {
    fn default() -> Self {
        Self::new()
    }
}

impl AlertDeduplicator {
    pub fn new() -> Self {
        Self {
            window: RwLock::new(DEFAULT_SUPPRESSION_WINDOW),
            max_entries: DEFAULT_MAX_ENTRIES,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_suppression_window(self, window: Duration) -> Self {
        self.set_suppression_window(window);
        self
    }

    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries.max(1);
        self
    }

    pub fn set_suppression_window(&self, window: Duration) {
        *self.window.write().unwrap_or_else(PoisonError::into_inner) = window;
    }

    pub fn suppression_window(&self) -> Duration {
        *self.window.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// SHA-256 hex digest of `"{cluster_id}:{level}:{title}"`
    pub fn fingerprint(cluster_id: u64, level: AlertLevel, title: &str) -> String {
        let digest = Sha256::digest(format!("{cluster_id}:{level}:{title}").as_bytes());
        hex::encode(digest)
    }

    pub fn should_emit(&self, cluster_id: u64, level: AlertLevel, title: &str) -> DedupDecision {
        self.should_emit_at(cluster_id, level, title, Instant::now())
    }

    /// Dedup check against an explicit clock reading
    pub fn should_emit_at(
        &self,
        cluster_id: u64,
        level: AlertLevel,
        title: &str,
        now: Instant,
    ) -> DedupDecision {
        let fingerprint = Self::fingerprint(cluster_id, level, title);
        let window = self.suppression_window();
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(entry) = entries.get_mut(&fingerprint) {
            let suppressed = now.saturating_duration_since(entry.last_seen) < window;
            entry.occurrences = entry.occurrences.saturating_add(1);
            entry.last_seen = now;
            return DedupDecision {
                emit: !suppressed,
                prior_alert_id: entry.alert_id,
                occurrences: entry.occurrences,
            };
        }

        entries.insert(
            fingerprint,
            FingerprintEntry {
                first_seen: now,
                last_seen: now,
                occurrences: 1,
                alert_id: None,
            },
        );
        self.evict(&mut entries, now);

        DedupDecision {
            emit: true,
            prior_alert_id: None,
            occurrences: 1,
        }
    }

    /// Remember the ledger id assigned to an emitted alert
    pub fn record_alert_id(&self, cluster_id: u64, level: AlertLevel, title: &str, alert_id: u64) {
        let fingerprint = Self::fingerprint(cluster_id, level, title);
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(entry) = entries.get_mut(&fingerprint) {
            entry.alert_id = Some(alert_id);
        }
    }

    pub fn stats(&self) -> DedupStats {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        DedupStats {
            cached_fingerprints: entries.len(),
            total_occurrences: entries.values().map(|e| u64::from(e.occurrences)).sum(),
            suppression_window_secs: self.suppression_window().as_secs(),
            max_entries: self.max_entries,
        }
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn evict(&self, entries: &mut HashMap<String, FingerprintEntry>, now: Instant) {
        entries.retain(|_, entry| now.saturating_duration_since(entry.last_seen) <= MAX_ENTRY_AGE);

        if entries.len() > self.max_entries {
            let oldest = entries
                .iter()
                .min_by_key(|(_, entry)| entry.first_seen)
                .map(|(key, _)| key.clone());
            if let Some(key) = oldest {
                entries.remove(&key);
            }
        }
    }
}
