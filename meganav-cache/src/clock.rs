//! Time sources for the cache
//!
//! Entry ages are measured on the monotonic clock; wall time is only recorded
//! for observability (`computed_at`, acknowledgement timestamps).

use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Supplies monotonic and wall time
pub trait Clock: Send + Sync {
    /// Monotonic time used for TTL arithmetic
    fn now(&self) -> Instant;

    /// Wall time used for reporting
    fn wall(&self) -> DateTime<Utc>;
}

/// Clock backed by the operating system
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn wall(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually advanced clock for deterministic TTL tests
///
/// Both readings start at construction time and only move when
/// [`ManualClock::advance`] is called.
#[derive(Debug, Clone)]
pub struct ManualClock {
    base_instant: Instant,
    base_wall: DateTime<Utc>,
    offset: Arc<Mutex<Duration>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            base_instant: Instant::now(),
            base_wall: Utc::now(),
            offset: Arc::new(Mutex::new(Duration::ZERO)),
        }
    }

    /// Move both readings forward
    pub fn advance(&self, by: Duration) {
        let mut offset = self.offset.lock().unwrap_or_else(|e| e.into_inner());
        *offset += by;
    }

    /// Total time advanced since construction
    pub fn elapsed(&self) -> Duration {
        *self.offset.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.base_instant + self.elapsed()
    }

    fn wall(&self) -> DateTime<Utc> {
        self.base_wall + chrono::Duration::from_std(self.elapsed()).unwrap_or(chrono::Duration::zero())
    }
}
