//! Observability hooks: hit/miss/stale/error counters and pluggable observers

use crate::cache::types::{CacheKey, CacheStats, EntryState, Tag};
use crate::error::CacheError;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::trace;

/// Something observable that happened inside the cache
#[derive(Debug, Clone)]
pub enum CacheEvent {
    /// Fresh value served
    Hit { key: CacheKey },

    /// Stale or invalidated value served while revalidating
    StaleHit { key: CacheKey, state: EntryState },

    /// No entry existed
    Miss { key: CacheKey },

    /// Caller waited on another caller's refresh
    Joined { key: CacheKey },

    /// A recomputation was admitted through the single-flight gate
    RefreshStarted { key: CacheKey },

    /// A recomputation stored a new version
    RefreshSucceeded {
        key: CacheKey,
        version: u64,
        elapsed: Duration,
    },

    /// A recomputation failed or timed out; the old value was kept
    RefreshFailed { key: CacheKey, error: CacheError },

    /// A waiter gave up on an in-flight refresh
    WaitTimedOut { key: CacheKey },

    /// Last known good value served after a failed synchronous refresh
    Fallback { key: CacheKey, version: u64 },

    /// Entries transitioned to INVALID by tag
    Invalidated { tag: Tag, keys: Vec<CacheKey> },

    /// Entry removed by explicit eviction
    Evicted { key: CacheKey },
}

/// Receives every [`CacheEvent`] recorded by the cache
///
/// Observers run inline on the recording task and must not block.
pub trait CacheObserver: Send + Sync {
    fn on_event(&self, event: &CacheEvent);
}

/// Lock-free counters plus registered observers
#[derive(Default)]
pub struct CacheMetrics {
    hits: AtomicU64,
    stale_hits: AtomicU64,
    misses: AtomicU64,
    joined: AtomicU64,
    refreshes_started: AtomicU64,
    refreshes_succeeded: AtomicU64,
    refresh_failures: AtomicU64,
    refresh_timeouts: AtomicU64,
    wait_timeouts: AtomicU64,
    fallbacks: AtomicU64,
    invalidations: AtomicU64,
    evictions: AtomicU64,
    observers: RwLock<Vec<Arc<dyn CacheObserver>>>,
}

impl std::fmt::Debug for CacheMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheMetrics")
            .field("stats", &self.snapshot(0))
            .finish()
    }
}

impl CacheMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an observer
    pub fn add_observer(&self, observer: Arc<dyn CacheObserver>) {
        let mut observers = self.observers.write().unwrap_or_else(|e| e.into_inner());
        observers.push(observer);
    }

    /// Count an event and forward it to observers
    pub fn record(&self, event: CacheEvent) {
        let counter = match &event {
            CacheEvent::Hit { .. } => Some(&self.hits),
            CacheEvent::StaleHit { .. } => Some(&self.stale_hits),
            CacheEvent::Miss { .. } => Some(&self.misses),
            CacheEvent::Joined { .. } => Some(&self.joined),
            CacheEvent::RefreshStarted { .. } => Some(&self.refreshes_started),
            CacheEvent::RefreshSucceeded { .. } => Some(&self.refreshes_succeeded),
            CacheEvent::RefreshFailed { error, .. } => match error {
                CacheError::SourceTimeout { .. } => Some(&self.refresh_timeouts),
                _ => Some(&self.refresh_failures),
            },
            CacheEvent::WaitTimedOut { .. } => Some(&self.wait_timeouts),
            CacheEvent::Fallback { .. } => Some(&self.fallbacks),
            CacheEvent::Invalidated { keys, .. } => {
                self.invalidations
                    .fetch_add(keys.len() as u64, Ordering::Relaxed);
                None
            }
            CacheEvent::Evicted { .. } => Some(&self.evictions),
        };
        if let Some(counter) = counter {
            counter.fetch_add(1, Ordering::Relaxed);
        }

        trace!(?event, "cache event");

        let observers = self.observers.read().unwrap_or_else(|e| e.into_inner());
        for observer in observers.iter() {
            observer.on_event(&event);
        }
    }

    /// Snapshot the counters
    pub fn snapshot(&self, entries: usize) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            stale_hits: self.stale_hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            joined: self.joined.load(Ordering::Relaxed),
            refreshes_started: self.refreshes_started.load(Ordering::Relaxed),
            refreshes_succeeded: self.refreshes_succeeded.load(Ordering::Relaxed),
            refresh_failures: self.refresh_failures.load(Ordering::Relaxed),
            refresh_timeouts: self.refresh_timeouts.load(Ordering::Relaxed),
            wait_timeouts: self.wait_timeouts.load(Ordering::Relaxed),
            fallbacks: self.fallbacks.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            entries,
        }
    }
}
