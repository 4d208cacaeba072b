//! Cache entry with soft/hard TTL and lifecycle state

use crate::cache::types::{CacheKey, CacheValue, EntryState, Tag};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeSet;
use std::time::{Duration, Instant};

/// A snapshot of one cached artifact
///
/// Snapshots are detached copies; mutating one never affects the store.
#[derive(Debug, Clone, Serialize)]
pub struct CacheEntry {
    /// The cache key
    pub key: CacheKey,

    /// The cached value
    pub value: CacheValue,

    /// Entry metadata
    pub metadata: CacheMetadata,
}

/// Metadata associated with a cache entry
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheMetadata {
    /// Tags for selective invalidation, replaced only by a full rewrite
    pub tags: BTreeSet<Tag>,

    /// Version number, incremented on every successful write
    pub version: u64,

    /// Wall time of the write that produced this value
    pub computed_at: DateTime<Utc>,

    /// Monotonic time of the write, used for TTL arithmetic
    #[serde(skip)]
    pub computed_instant: Instant,

    /// Age after which the entry is stale
    pub soft_ttl: Duration,

    /// Age after which the entry must be refreshed before serving
    pub hard_ttl: Option<Duration>,

    /// State observed when the snapshot was taken
    pub state: EntryState,

    /// Set by tag invalidation, cleared by the next successful write
    pub invalidated: bool,

    /// Whether a recomputation was in flight when the snapshot was taken
    pub refreshing: bool,

    /// Error of the last failed refresh, kept for observability
    pub last_error: Option<String>,
}

impl CacheEntry {
    /// Create a freshly computed entry
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        key: CacheKey,
        value: CacheValue,
        tags: BTreeSet<Tag>,
        version: u64,
        computed_instant: Instant,
        computed_at: DateTime<Utc>,
        soft_ttl: Duration,
        hard_ttl: Option<Duration>,
    ) -> Self {
        Self {
            key,
            value,
            metadata: CacheMetadata {
                tags,
                version,
                computed_at,
                computed_instant,
                soft_ttl,
                hard_ttl,
                state: EntryState::Fresh,
                invalidated: false,
                refreshing: false,
                last_error: None,
            },
        }
    }

    /// Version of the stored value
    pub fn version(&self) -> u64 {
        self.metadata.version
    }

    /// State observed when the snapshot was taken
    pub fn state(&self) -> EntryState {
        self.metadata.state
    }

    /// Get the age of the entry at `now`
    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.metadata.computed_instant)
    }

    /// Whether the soft TTL has elapsed; a zero soft TTL is always elapsed
    pub fn is_soft_expired(&self, now: Instant) -> bool {
        self.age(now) >= self.metadata.soft_ttl
    }

    /// Whether the hard TTL has elapsed
    pub fn is_hard_expired(&self, now: Instant) -> bool {
        self.metadata
            .hard_ttl
            .map(|hard| self.age(now) >= hard)
            .unwrap_or(false)
    }

    /// Servable state at `now`, ignoring any in-flight refresh
    pub fn freshness(&self, now: Instant) -> EntryState {
        if self.metadata.invalidated {
            EntryState::Invalid
        } else if self.is_soft_expired(now) {
            EntryState::Stale
        } else {
            EntryState::Fresh
        }
    }

    /// Full observable state at `now`
    pub fn state_at(&self, now: Instant) -> EntryState {
        if self.metadata.refreshing {
            EntryState::Refreshing
        } else {
            self.freshness(now)
        }
    }

    /// Check if entry has a specific tag
    pub fn has_tag(&self, tag: &str) -> bool {
        self.metadata.tags.contains(tag)
    }

    /// Transition to INVALID; returns false if already invalid
    pub(crate) fn mark_invalid(&mut self) -> bool {
        let changed = !self.metadata.invalidated;
        self.metadata.invalidated = true;
        changed
    }

    /// Copy with the snapshot-time state filled in
    pub(crate) fn snapshot(&self, now: Instant, refreshing: bool) -> CacheEntry {
        let mut entry = self.clone();
        entry.metadata.refreshing = refreshing;
        entry.metadata.state = entry.state_at(now);
        entry
    }
}
