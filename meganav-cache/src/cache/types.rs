//! Core type definitions for the cache system

use serde::{Deserialize, Serialize};
use std::fmt;

/// Cache key type - one key per derivable dataset
pub type CacheKey = String;

/// Label attached to entries for bulk invalidation
pub type Tag = String;

/// Cache value type - opaque JSON payload, immutable once stored
pub type CacheValue = serde_json::Value;

/// Observable lifecycle state of a cache entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntryState {
    /// Within soft TTL and not invalidated
    Fresh,

    /// Past soft TTL, still servable
    Stale,

    /// A recomputation is in flight
    Refreshing,

    /// Explicitly invalidated by tag; value kept until the next refresh
    Invalid,

    /// No entry exists for the key
    Absent,
}

impl EntryState {
    /// Whether a reader may return the value without waiting
    pub fn is_fresh(&self) -> bool {
        matches!(self, EntryState::Fresh)
    }
}

impl fmt::Display for EntryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntryState::Fresh => write!(f, "FRESH"),
            EntryState::Stale => write!(f, "STALE"),
            EntryState::Refreshing => write!(f, "REFRESHING"),
            EntryState::Invalid => write!(f, "INVALID"),
            EntryState::Absent => write!(f, "ABSENT"),
        }
    }
}

/// Statistics and metrics for cache performance monitoring
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Reads answered with a fresh value
    pub hits: u64,

    /// Reads answered with a stale or invalidated value while revalidating
    pub stale_hits: u64,

    /// Reads that found no entry
    pub misses: u64,

    /// Reads that joined another caller's in-flight refresh
    pub joined: u64,

    /// Recomputations started against the data source
    pub refreshes_started: u64,

    /// Recomputations that produced a new version
    pub refreshes_succeeded: u64,

    /// Recomputations that failed in the data source
    pub refresh_failures: u64,

    /// Recomputations abandoned after the compute timeout
    pub refresh_timeouts: u64,

    /// Waiters that gave up on an in-flight refresh
    pub wait_timeouts: u64,

    /// Reads served last-known-good data after a failed refresh
    pub fallbacks: u64,

    /// Entries transitioned to INVALID by tag
    pub invalidations: u64,

    /// Entries removed by explicit eviction
    pub evictions: u64,

    /// Number of entries currently in cache
    pub entries: usize,
}

impl CacheStats {
    /// Total number of reads observed
    pub fn total_reads(&self) -> u64 {
        self.hits + self.stale_hits + self.misses
    }

    /// Share of reads answered without computing, as a percentage
    pub fn hit_rate(&self) -> f64 {
        let total = self.total_reads();
        if total == 0 {
            0.0
        } else {
            ((self.hits + self.stale_hits) as f64 / total as f64) * 100.0
        }
    }

    /// Calculate miss rate as a percentage
    pub fn miss_rate(&self) -> f64 {
        100.0 - self.hit_rate()
    }

    /// Failed plus timed-out recomputations
    pub fn total_refresh_failures(&self) -> u64 {
        self.refresh_failures + self.refresh_timeouts
    }
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CacheStats {{ hits: {}, stale_hits: {}, misses: {}, hit_rate: {:.2}%, refreshes: {}/{}, failures: {}, entries: {} }}",
            self.hits,
            self.stale_hits,
            self.misses,
            self.hit_rate(),
            self.refreshes_succeeded,
            self.refreshes_started,
            self.total_refresh_failures(),
            self.entries
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_stats_hit_rate() {
        let stats = CacheStats {
            hits: 60,
            stale_hits: 20,
            misses: 20,
            ..Default::default()
        };

        assert_eq!(stats.hit_rate(), 80.0);
        assert_eq!(stats.miss_rate(), 20.0);
    }

    #[test]
    fn test_cache_stats_zero_requests() {
        let stats = CacheStats::default();
        assert_eq!(stats.hit_rate(), 0.0);
        assert_eq!(stats.miss_rate(), 100.0);
    }

    #[test]
    fn test_cache_stats_display() {
        let stats = CacheStats {
            hits: 100,
            misses: 50,
            refreshes_started: 4,
            refreshes_succeeded: 3,
            refresh_timeouts: 1,
            entries: 2,
            ..Default::default()
        };

        let display = format!("{}", stats);
        assert!(display.contains("hits: 100"));
        assert!(display.contains("misses: 50"));
        assert!(display.contains("refreshes: 3/4"));
        assert!(display.contains("failures: 1"));
    }

    #[test]
    fn test_entry_state_serialization() {
        assert_eq!(EntryState::Invalid.to_string(), "INVALID");
        assert_eq!(
            serde_json::to_string(&EntryState::Refreshing).unwrap(),
            "\"REFRESHING\""
        );
        assert!(EntryState::Fresh.is_fresh());
        assert!(!EntryState::Stale.is_fresh());
    }
}
