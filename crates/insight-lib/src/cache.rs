//! TTL-guarded single-value caches
//!
//! Values are cloned on the way in and on the way out, so callers never
//! share state with the cached copy. An entry is valid only while it holds a
//! value and its expiry lies in the future.

use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use tokio::time::Instant;

/// Default TTL for the raw workload inventory
pub const INVENTORY_TTL: Duration = Duration::from_secs(120);
/// Default TTL for the analysis result
pub const ANALYSIS_TTL: Duration = Duration::from_secs(180);

#[derive(Debug)]
struct CacheEntry<T> {
    value: Option<T>,
    expires_at: Option<Instant>,
}

/// Lock-guarded cache holding one value with an expiry
#[derive(Debug)]
pub struct TtlCache<T> {
    ttl: Duration,
    entry: RwLock<CacheEntry<T>>,
}

impl<T: Clone> TtlCache<T> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entry: RwLock::new(CacheEntry {
                value: None,
                expires_at: None,
            }),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// A copy of the cached value, if present and not expired
    pub fn get(&self) -> Option<T> {
        let entry = self.entry.read().unwrap_or_else(PoisonError::into_inner);
        match (&entry.value, entry.expires_at) {
            (Some(value), Some(expires_at)) if Instant::now() < expires_at => Some(value.clone()),
            _ => None,
        }
    }

    /// Replace the cached value and restart its TTL
    pub fn set(&self, value: T) {
        let mut entry = self.entry.write().unwrap_or_else(PoisonError::into_inner);
        entry.value = Some(value);
        entry.expires_at = Some(Instant::now() + self.ttl);
    }

    /// Expire the entry; the value stays but is never served again
    pub fn invalidate(&self) {
        let mut entry = self.entry.write().unwrap_or_else(PoisonError::into_inner);
        entry.expires_at = None;
    }

    /// Time until expiry, if the entry is currently valid
    pub fn remaining(&self) -> Option<Duration> {
        let entry = self.entry.read().unwrap_or_else(PoisonError::into_inner);
        entry
            .value
            .as_ref()
            .and(entry.expires_at)
            .and_then(|expires_at| expires_at.checked_duration_since(Instant::now()))
            .filter(|remaining| !remaining.is_zero())
    }
}
