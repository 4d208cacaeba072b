//! Keyed entry storage with a per-key single-flight refresh gate
//!
//! Every key owns a slot guarded by its own mutex, so refreshing one key never
//! serializes readers of another. The key index is only write-locked when a
//! slot is created. All entry mutation goes through [`CacheStore::put`],
//! [`CacheStore::mark_invalid_by_tag`], [`CacheStore::try_begin_refresh`],
//! [`CacheStore::end_refresh`] and [`CacheStore::evict`].

use crate::cache::{
    config::CacheConfig,
    entry::CacheEntry,
    metrics::{CacheEvent, CacheMetrics},
    types::{CacheKey, CacheStats, CacheValue, EntryState, Tag},
};
use crate::clock::Clock;
use crate::error::{CacheError, Result};
use crate::source::SourceValue;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};
use tokio::sync::{watch, Mutex, RwLock};
use tracing::{debug, info, warn};

/// Outcome broadcast to everyone waiting on a refresh: the new version or the error
pub type RefreshOutcome = Result<u64>;

/// Thread-safe keyed storage of cache entries
pub struct CacheStore {
    /// Cache configuration
    config: CacheConfig,

    clock: Arc<dyn Clock>,

    metrics: Arc<CacheMetrics>,

    /// Key index: key -> slot
    slots: RwLock<HashMap<CacheKey, Arc<KeySlot>>>,

    /// Source of refresh ids
    next_refresh_id: AtomicU64,

    /// Bumped on every tag invalidation
    invalidation_seq: AtomicU64,

    /// Tag -> invalidation_seq of its latest invalidation
    tag_generations: StdMutex<HashMap<Tag, u64>>,
}

/// Per-key state and completion signal
struct KeySlot {
    state: Mutex<SlotState>,
    signal: watch::Sender<Option<RefreshOutcome>>,
}

struct SlotState {
    entry: Option<CacheEntry>,

    /// Highest version ever written for this key; survives eviction
    last_version: u64,

    /// Id of the in-flight refresh, if any
    refreshing: Option<u64>,
}

impl KeySlot {
    fn new() -> Self {
        let (signal, _) = watch::channel(None);
        Self {
            state: Mutex::new(SlotState {
                entry: None,
                last_version: 0,
                refreshing: None,
            }),
            signal,
        }
    }
}

/// Proof of winning the single-flight gate for one key
///
/// Must be handed back to [`CacheStore::end_refresh`]; the key stays
/// REFRESHING until then.
#[derive(Debug)]
pub struct RefreshTicket {
    key: CacheKey,
    refresh_id: u64,
    started_at: Instant,
    invalidation_seq: u64,
}

impl RefreshTicket {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn refresh_id(&self) -> u64 {
        self.refresh_id
    }
}

/// Handle for a caller that lost the single-flight race
#[derive(Debug)]
pub struct RefreshWaiter {
    key: CacheKey,
    rx: watch::Receiver<Option<RefreshOutcome>>,
}

impl RefreshWaiter {
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Wait for the in-flight refresh to finish and return its outcome
    pub async fn wait(mut self, timeout: Duration) -> RefreshOutcome {
        match tokio::time::timeout(timeout, self.rx.changed()).await {
            Ok(Ok(())) => self.rx.borrow().clone().unwrap_or_else(|| {
                Err(CacheError::Other(format!(
                    "refresh signal for '{}' carried no outcome",
                    self.key
                )))
            }),
            Ok(Err(_)) => Err(CacheError::Other(format!(
                "refresh signal for '{}' closed",
                self.key
            ))),
            Err(_) => Err(CacheError::ConcurrentRefreshTimeout {
                key: self.key,
                timeout_ms: timeout.as_millis() as u64,
            }),
        }
    }
}

/// Result of [`CacheStore::try_begin_refresh`]
#[derive(Debug)]
pub enum RefreshAdmission {
    /// This caller owns the recomputation
    Winner(RefreshTicket),

    /// A recomputation is already in flight; wait on it
    Joined(RefreshWaiter),

    /// A newer fresh version was written after the caller's snapshot
    Current(CacheEntry),
}

impl CacheStore {
    /// Create a new store with the given configuration
    pub fn new(config: CacheConfig, clock: Arc<dyn Clock>, metrics: Arc<CacheMetrics>) -> Self {
        info!("Initializing cache store with config: {:?}", config);

        Self {
            config,
            clock,
            metrics,
            slots: RwLock::new(HashMap::new()),
            next_refresh_id: AtomicU64::new(1),
            invalidation_seq: AtomicU64::new(0),
            tag_generations: StdMutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn metrics(&self) -> &Arc<CacheMetrics> {
        &self.metrics
    }

    /// Snapshot of the entry for `key`; never waits for a refresh
    pub async fn get(&self, key: &str) -> Option<CacheEntry> {
        let slot = self.existing_slot(key).await?;
        let state = slot.state.lock().await;
        let now = self.clock.now();
        state
            .entry
            .as_ref()
            .map(|entry| entry.snapshot(now, state.refreshing.is_some()))
    }

    /// Create or replace the entry for `key`
    ///
    /// Bumps the version, resets `computed_at`, and wakes callers waiting on
    /// this key. An in-flight refresh stays in flight.
    pub async fn put(&self, key: &str, value: CacheValue, tags: BTreeSet<Tag>) -> CacheEntry {
        let slot = self.slot(key).await;
        let mut state = slot.state.lock().await;
        let refreshing = state.refreshing.is_some();

        let entry = self.write_entry(&mut state, key, value, tags);
        let snapshot = entry.snapshot(self.clock.now(), refreshing);
        slot.signal.send_replace(Some(Ok(snapshot.version())));

        debug!("Stored cache entry: {} (version {})", key, snapshot.version());
        snapshot
    }

    /// Transition every entry tagged with `tag` to INVALID
    ///
    /// Idempotent. Values and versions are untouched. Returns the matching keys.
    pub async fn mark_invalid_by_tag(&self, tag: &str) -> Vec<CacheKey> {
        // Recorded before scanning so refreshes already in flight see it on completion
        let seq = self.invalidation_seq.fetch_add(1, Ordering::SeqCst) + 1;
        {
            let mut generations = self
                .tag_generations
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            generations.insert(tag.to_string(), seq);
        }

        let slots: Vec<(CacheKey, Arc<KeySlot>)> = {
            let index = self.slots.read().await;
            index
                .iter()
                .map(|(key, slot)| (key.clone(), Arc::clone(slot)))
                .collect()
        };

        let mut matched = Vec::new();
        for (key, slot) in slots {
            let mut state = slot.state.lock().await;
            if let Some(entry) = state.entry.as_mut() {
                if entry.has_tag(tag) {
                    if entry.mark_invalid() {
                        debug!("Marked cache entry invalid: {} (tag {})", key, tag);
                    }
                    matched.push(key);
                }
            }
        }
        matched.sort();

        info!("Invalidated {} entries with tag: {}", matched.len(), tag);
        self.metrics.record(CacheEvent::Invalidated {
            tag: tag.to_string(),
            keys: matched.clone(),
        });

        matched
    }

    /// Single-flight admission gate
    ///
    /// Exactly one caller per key gets [`RefreshAdmission::Winner`] until that
    /// caller calls [`CacheStore::end_refresh`]. Everyone else is subscribed to
    /// the completion signal before the slot lock is released.
    pub async fn try_begin_refresh(&self, key: &str) -> RefreshAdmission {
        self.admit_refresh(key, None).await
    }

    /// Like [`CacheStore::try_begin_refresh`], for a caller that last saw
    /// `seen_version` (0 when the key was absent)
    ///
    /// Returns [`RefreshAdmission::Current`] instead of a ticket when a fresh
    /// entry newer than `seen_version` is already stored.
    pub async fn try_begin_refresh_since(&self, key: &str, seen_version: u64) -> RefreshAdmission {
        self.admit_refresh(key, Some(seen_version)).await
    }

    async fn admit_refresh(&self, key: &str, seen_version: Option<u64>) -> RefreshAdmission {
        let slot = self.slot(key).await;
        let mut state = slot.state.lock().await;

        if state.refreshing.is_some() {
            debug!("Joining in-flight refresh: {}", key);
            return RefreshAdmission::Joined(RefreshWaiter {
                key: key.to_string(),
                rx: slot.signal.subscribe(),
            });
        }

        if let (Some(seen), Some(entry)) = (seen_version, state.entry.as_ref()) {
            let now = self.clock.now();
            if entry.version() > seen
                && entry.freshness(now) == EntryState::Fresh
                && !entry.is_hard_expired(now)
            {
                debug!(
                    "Skipping refresh of {}: version {} already supersedes {}",
                    key,
                    entry.version(),
                    seen
                );
                return RefreshAdmission::Current(entry.snapshot(now, false));
            }
        }

        let refresh_id = self.next_refresh_id.fetch_add(1, Ordering::Relaxed);
        state.refreshing = Some(refresh_id);
        drop(state);

        debug!("Refresh {} admitted for: {}", refresh_id, key);
        self.metrics.record(CacheEvent::RefreshStarted {
            key: key.to_string(),
        });

        RefreshAdmission::Winner(RefreshTicket {
            key: key.to_string(),
            refresh_id,
            started_at: self.clock.now(),
            invalidation_seq: self.invalidation_seq.load(Ordering::SeqCst),
        })
    }

    /// Complete a refresh started with [`CacheStore::try_begin_refresh`]
    ///
    /// On success the value is written as a new version. On failure the old
    /// value and its STALE/INVALID state are kept and the error is recorded.
    /// Either way the key leaves REFRESHING and all waiters are woken.
    pub async fn end_refresh(
        &self,
        ticket: RefreshTicket,
        result: std::result::Result<SourceValue, CacheError>,
    ) -> Result<CacheEntry> {
        let slot = self.slot(&ticket.key).await;
        let mut state = slot.state.lock().await;

        if state.refreshing != Some(ticket.refresh_id) {
            warn!(
                "Refresh {} for {} completed but slot tracks {:?}",
                ticket.refresh_id, ticket.key, state.refreshing
            );
        }
        state.refreshing = None;

        let elapsed = self.clock.now().saturating_duration_since(ticket.started_at);

        match result {
            Ok(source_value) => {
                let invalidated_meanwhile =
                    self.invalidated_since(&source_value.tags, ticket.invalidation_seq);
                let entry =
                    self.write_entry(&mut state, &ticket.key, source_value.value, source_value.tags);
                if invalidated_meanwhile {
                    entry.mark_invalid();
                    info!(
                        "Tag invalidated during refresh of {}; version {} stored as INVALID",
                        ticket.key, entry.metadata.version
                    );
                }
                let snapshot = entry.snapshot(self.clock.now(), false);
                drop(state);

                info!(
                    "Refreshed {} to version {} in {:?}",
                    ticket.key,
                    snapshot.version(),
                    elapsed
                );
                slot.signal.send_replace(Some(Ok(snapshot.version())));
                self.metrics.record(CacheEvent::RefreshSucceeded {
                    key: ticket.key,
                    version: snapshot.version(),
                    elapsed,
                });
                Ok(snapshot)
            }
            Err(error) => {
                if let Some(entry) = state.entry.as_mut() {
                    entry.metadata.last_error = Some(error.to_string());
                }
                drop(state);

                warn!("Refresh of {} failed after {:?}: {}", ticket.key, elapsed, error);
                slot.signal.send_replace(Some(Err(error.clone())));
                self.metrics.record(CacheEvent::RefreshFailed {
                    key: ticket.key,
                    error: error.clone(),
                });
                Err(error)
            }
        }
    }

    /// Remove the value for `key`, keeping its version counter
    ///
    /// An in-flight refresh is unaffected and will repopulate the key.
    pub async fn evict(&self, key: &str) -> Option<CacheEntry> {
        let slot = self.existing_slot(key).await?;
        let mut state = slot.state.lock().await;
        let removed = state.entry.take()?;
        drop(state);

        debug!("Evicted cache entry: {}", key);
        self.metrics.record(CacheEvent::Evicted {
            key: key.to_string(),
        });
        Some(removed)
    }

    /// Evict every entry
    pub async fn clear(&self) -> usize {
        let keys = self.keys().await;
        let mut count = 0;
        for key in keys {
            if self.evict(&key).await.is_some() {
                count += 1;
            }
        }

        info!("Cleared {} entries from cache", count);
        count
    }

    /// Keys that currently hold a value
    pub async fn keys(&self) -> Vec<CacheKey> {
        let slots: Vec<(CacheKey, Arc<KeySlot>)> = {
            let index = self.slots.read().await;
            index
                .iter()
                .map(|(key, slot)| (key.clone(), Arc::clone(slot)))
                .collect()
        };

        let mut keys = Vec::new();
        for (key, slot) in slots {
            if slot.state.lock().await.entry.is_some() {
                keys.push(key);
            }
        }
        keys.sort();
        keys
    }

    /// Get number of entries in cache
    pub async fn len(&self) -> usize {
        self.keys().await.len()
    }

    /// Check if cache is empty
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Whether a refresh is in flight for `key`
    pub async fn is_refreshing(&self, key: &str) -> bool {
        match self.existing_slot(key).await {
            Some(slot) => slot.state.lock().await.refreshing.is_some(),
            None => false,
        }
    }

    /// Get cache statistics
    pub async fn stats(&self) -> CacheStats {
        let entries = self.len().await;
        self.metrics.snapshot(entries)
    }

    /// Internal: look up a slot without creating it
    async fn existing_slot(&self, key: &str) -> Option<Arc<KeySlot>> {
        let index = self.slots.read().await;
        index.get(key).cloned()
    }

    /// Internal: look up or create the slot for `key`
    async fn slot(&self, key: &str) -> Arc<KeySlot> {
        if let Some(slot) = self.existing_slot(key).await {
            return slot;
        }

        let mut index = self.slots.write().await;
        Arc::clone(
            index
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(KeySlot::new())),
        )
    }

    /// Internal: write a new version into a locked slot
    fn write_entry<'a>(
        &self,
        state: &'a mut SlotState,
        key: &str,
        value: CacheValue,
        mut tags: BTreeSet<Tag>,
    ) -> &'a mut CacheEntry {
        tags.extend(self.config.default_tags.iter().cloned());

        let version = state.last_version + 1;
        state.last_version = version;

        state.entry.insert(CacheEntry::new(
            key.to_string(),
            value,
            tags,
            version,
            self.clock.now(),
            self.clock.wall(),
            self.config.soft_ttl_with_jitter(),
            self.config.hard_ttl,
        ))
    }

    /// Internal: whether any of `tags` was invalidated after `seq`
    fn invalidated_since(&self, tags: &BTreeSet<Tag>, seq: u64) -> bool {
        let generations = self
            .tag_generations
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        tags.iter()
            .chain(self.config.default_tags.iter())
            .any(|tag| generations.get(tag).is_some_and(|&generation| generation > seq))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use serde_json::json;

    fn store_with(config: CacheConfig) -> (CacheStore, ManualClock) {
        let clock = ManualClock::new();
        let store = CacheStore::new(config, Arc::new(clock.clone()), Arc::new(CacheMetrics::new()));
        (store, clock)
    }

    fn tags(list: &[&str]) -> BTreeSet<Tag> {
        list.iter().map(|t| t.to_string()).collect()
    }

    #[tokio::test]
    async fn test_put_and_get() {
        let (store, _) = store_with(CacheConfig::default());

        assert!(store.get("navigation").await.is_none());

        let entry = store.put("navigation", json!({"v": 1}), tags(&["navigation"])).await;
        assert_eq!(entry.version(), 1);
        assert_eq!(entry.state(), EntryState::Fresh);

        let snapshot = store.get("navigation").await.unwrap();
        assert_eq!(snapshot.value, json!({"v": 1}));
        assert_eq!(snapshot.version(), 1);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_put_bumps_version() {
        let (store, _) = store_with(CacheConfig::default());

        store.put("k", json!(1), BTreeSet::new()).await;
        let second = store.put("k", json!(2), BTreeSet::new()).await;

        assert_eq!(second.version(), 2);
        assert_eq!(store.get("k").await.unwrap().value, json!(2));
    }

    #[tokio::test]
    async fn test_default_tags_applied() {
        let config = CacheConfig::builder().default_tags(["global"]).build();
        let (store, _) = store_with(config);

        let entry = store.put("k", json!(1), tags(&["local"])).await;
        assert!(entry.has_tag("global"));
        assert!(entry.has_tag("local"));
    }

    #[tokio::test]
    async fn test_entry_goes_stale_after_soft_ttl() {
        let config = CacheConfig::builder().soft_ttl(Duration::from_secs(60)).build();
        let (store, clock) = store_with(config);

        store.put("k", json!(1), BTreeSet::new()).await;
        clock.advance(Duration::from_secs(61));

        let snapshot = store.get("k").await.unwrap();
        assert_eq!(snapshot.state(), EntryState::Stale);
        assert_eq!(snapshot.version(), 1);
    }

    #[tokio::test]
    async fn test_mark_invalid_by_tag() {
        let (store, _) = store_with(CacheConfig::default());

        store.put("a", json!("a"), tags(&["navigation"])).await;
        store.put("b", json!("b"), tags(&["footer"])).await;

        let matched = store.mark_invalid_by_tag("navigation").await;
        assert_eq!(matched, vec!["a".to_string()]);

        let a = store.get("a").await.unwrap();
        assert_eq!(a.state(), EntryState::Invalid);
        assert_eq!(a.version(), 1);
        assert_eq!(a.value, json!("a"));
        assert_eq!(store.get("b").await.unwrap().state(), EntryState::Fresh);

        // Idempotent
        let again = store.mark_invalid_by_tag("navigation").await;
        assert_eq!(again, vec!["a".to_string()]);
        assert_eq!(store.get("a").await.unwrap().version(), 1);

        // Unused tag is a no-op
        assert!(store.mark_invalid_by_tag("unused").await.is_empty());
    }

    #[tokio::test]
    async fn test_refresh_since_returns_newer_fresh_entry() {
        let (store, _) = store_with(CacheConfig::default());
        store.put("k", json!("v1"), tags(&["navigation"])).await;
        store.mark_invalid_by_tag("navigation").await;

        // Caller saw v1 INVALID; v1 is still what is stored
        let ticket = match store.try_begin_refresh_since("k", 1).await {
            RefreshAdmission::Winner(ticket) => ticket,
            _ => panic!("expected winner"),
        };
        store
            .end_refresh(ticket, Ok(SourceValue::new(json!("v2"))))
            .await
            .unwrap();

        // A second caller that also saw v1 gets v2 without a new refresh
        match store.try_begin_refresh_since("k", 1).await {
            RefreshAdmission::Current(entry) => {
                assert_eq!(entry.version(), 2);
                assert_eq!(entry.value, json!("v2"));
            }
            _ => panic!("expected current entry"),
        }
        assert!(!store.is_refreshing("k").await);

        // Already up to date, or forced: a refresh is admitted
        assert!(matches!(
            store.try_begin_refresh_since("k", 2).await,
            RefreshAdmission::Winner(_)
        ));
    }

    #[tokio::test]
    async fn test_single_flight_gate() {
        let (store, _) = store_with(CacheConfig::default());

        let first = store.try_begin_refresh("k").await;
        let second = store.try_begin_refresh("k").await;

        let ticket = match first {
            RefreshAdmission::Winner(ticket) => ticket,
            _ => panic!("first caller must win"),
        };
        assert!(matches!(second, RefreshAdmission::Joined(_)));
        assert!(store.is_refreshing("k").await);

        store
            .end_refresh(ticket, Ok(SourceValue::new(json!(1))))
            .await
            .unwrap();
        assert!(!store.is_refreshing("k").await);
        assert!(matches!(
            store.try_begin_refresh("k").await,
            RefreshAdmission::Winner(_)
        ));
    }

    #[tokio::test]
    async fn test_waiter_receives_outcome() {
        let (store, _) = store_with(CacheConfig::default());

        let ticket = match store.try_begin_refresh("k").await {
            RefreshAdmission::Winner(ticket) => ticket,
            _ => panic!("expected winner"),
        };
        let waiter = match store.try_begin_refresh("k").await {
            RefreshAdmission::Joined(waiter) => waiter,
            _ => panic!("expected waiter"),
        };

        let wait = tokio::spawn(waiter.wait(Duration::from_secs(5)));
        store
            .end_refresh(ticket, Ok(SourceValue::new(json!("v"))))
            .await
            .unwrap();

        assert_eq!(wait.await.unwrap(), Ok(1));
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_old_value() {
        let (store, _) = store_with(CacheConfig::default());
        store.put("k", json!("old"), tags(&["t"])).await;
        store.mark_invalid_by_tag("t").await;

        let ticket = match store.try_begin_refresh("k").await {
            RefreshAdmission::Winner(ticket) => ticket,
            _ => panic!("expected winner"),
        };
        let error = CacheError::SourceComputeFailure {
            key: "k".to_string(),
            reason: "down".to_string(),
        };
        let result = store.end_refresh(ticket, Err(error.clone())).await;
        assert_eq!(result.unwrap_err(), error);

        let snapshot = store.get("k").await.unwrap();
        assert_eq!(snapshot.value, json!("old"));
        assert_eq!(snapshot.version(), 1);
        assert_eq!(snapshot.state(), EntryState::Invalid);
        assert!(snapshot.metadata.last_error.unwrap().contains("down"));
        assert_eq!(store.stats().await.refresh_failures, 1);
    }

    #[tokio::test]
    async fn test_invalidation_during_refresh_keeps_entry_invalid() {
        let (store, _) = store_with(CacheConfig::default());
        store.put("k", json!(1), tags(&["t"])).await;

        let ticket = match store.try_begin_refresh("k").await {
            RefreshAdmission::Winner(ticket) => ticket,
            _ => panic!("expected winner"),
        };
        store.mark_invalid_by_tag("t").await;

        let entry = store
            .end_refresh(ticket, Ok(SourceValue::new(json!(2)).with_tag("t")))
            .await
            .unwrap();
        assert_eq!(entry.version(), 2);
        assert_eq!(entry.state(), EntryState::Invalid);
    }

    #[tokio::test]
    async fn test_evict_keeps_version_monotonic() {
        let (store, _) = store_with(CacheConfig::default());
        store.put("k", json!(1), BTreeSet::new()).await;
        store.put("k", json!(2), BTreeSet::new()).await;

        let removed = store.evict("k").await.unwrap();
        assert_eq!(removed.version(), 2);
        assert!(store.get("k").await.is_none());
        assert!(store.evict("k").await.is_none());

        let entry = store.put("k", json!(3), BTreeSet::new()).await;
        assert_eq!(entry.version(), 3);
    }

    #[tokio::test]
    async fn test_clear() {
        let (store, _) = store_with(CacheConfig::default());
        store.put("a", json!(1), BTreeSet::new()).await;
        store.put("b", json!(2), BTreeSet::new()).await;

        assert_eq!(store.clear().await, 2);
        assert!(store.is_empty().await);
        assert_eq!(store.stats().await.evictions, 2);
    }
}
