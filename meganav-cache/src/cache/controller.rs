//! Read-through revalidation on top of [`CacheStore`] and a [`DataSource`]
//!
//! Readers get fresh values immediately, stale values immediately while a
//! background refresh runs, or wait for a single shared recomputation when no
//! servable value exists. Every recomputation runs on its own spawned task and
//! is bounded by the compute timeout, so a caller that goes away can never
//! leave a key stuck in REFRESHING.

use crate::cache::{
    config::CacheConfig,
    entry::CacheEntry,
    invalidation::{InvalidationEvent, InvalidationReason},
    metrics::{CacheEvent, CacheMetrics, CacheObserver},
    store::{CacheStore, RefreshAdmission, RefreshTicket, RefreshWaiter},
    types::{CacheKey, CacheStats, CacheValue, EntryState},
};
use crate::clock::{Clock, SystemClock};
use crate::error::{CacheError, Result};
use crate::source::{DataSource, SourceValue};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// How a read may trade freshness for latency
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadPolicy {
    /// Serve STALE/INVALID values immediately and revalidate in the background
    pub allow_stale: bool,

    /// After a failed synchronous refresh, serve the last known good value
    /// (flagged degraded) if it is not past its hard TTL
    pub fallback_to_stale_on_error: bool,

    /// Patience for someone else's in-flight refresh
    pub wait_timeout: Duration,
}

impl ReadPolicy {
    /// Policy derived from the cache configuration defaults
    pub fn from_config(config: &CacheConfig) -> Self {
        Self {
            allow_stale: config.allow_stale,
            fallback_to_stale_on_error: config.fallback_to_stale_on_error,
            wait_timeout: config.wait_timeout,
        }
    }

    /// Require a fresh value: wait for a refresh instead of serving stale data
    pub fn strict(mut self) -> Self {
        self.allow_stale = false;
        self
    }

    pub fn with_allow_stale(mut self, allow: bool) -> Self {
        self.allow_stale = allow;
        self
    }

    pub fn with_fallback(mut self, enable: bool) -> Self {
        self.fallback_to_stale_on_error = enable;
        self
    }

    pub fn with_wait_timeout(mut self, timeout: Duration) -> Self {
        self.wait_timeout = timeout;
        self
    }
}

impl Default for ReadPolicy {
    fn default() -> Self {
        Self::from_config(&CacheConfig::default())
    }
}

/// How a read was answered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReadOutcome {
    /// Fresh cached value
    Hit,

    /// Stale or invalidated value, revalidation triggered
    Stale,

    /// This caller computed the value
    Computed,

    /// This caller waited on another caller's computation
    Joined,

    /// Refresh failed; last known good value served
    Fallback,
}

impl ReadOutcome {
    /// Value for the `X-Cache-Status` response header
    pub fn as_header_value(&self) -> &'static str {
        match self {
            ReadOutcome::Hit => "HIT",
            ReadOutcome::Stale => "STALE",
            ReadOutcome::Computed => "MISS",
            ReadOutcome::Joined => "JOINED",
            ReadOutcome::Fallback => "FALLBACK",
        }
    }
}

/// Value returned by a read, with the metadata it was served under
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheRead {
    pub key: CacheKey,
    pub value: CacheValue,
    pub version: u64,
    pub state: EntryState,
    pub computed_at: DateTime<Utc>,
    /// True when served last known good data after a failed refresh
    pub degraded: bool,
    pub outcome: ReadOutcome,
}

impl CacheRead {
    fn from_entry(entry: &CacheEntry, outcome: ReadOutcome) -> Self {
        Self {
            key: entry.key.clone(),
            value: entry.value.clone(),
            version: entry.metadata.version,
            state: entry.metadata.state,
            computed_at: entry.metadata.computed_at,
            degraded: outcome == ReadOutcome::Fallback,
            outcome,
        }
    }
}

/// Public read/write contract of the cache
pub struct RevalidationController {
    store: Arc<CacheStore>,
    source: Arc<dyn DataSource>,
}

impl RevalidationController {
    /// Create a controller on the system clock
    pub fn new(config: CacheConfig, source: Arc<dyn DataSource>) -> Result<Self> {
        Self::with_clock(config, source, Arc::new(SystemClock))
    }

    /// Create a controller with an injected clock
    pub fn with_clock(
        config: CacheConfig,
        source: Arc<dyn DataSource>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;
        let store = CacheStore::new(config, clock, Arc::new(CacheMetrics::new()));
        Ok(Self::from_store(Arc::new(store), source))
    }

    /// Layer a controller over an existing store
    pub fn from_store(store: Arc<CacheStore>, source: Arc<dyn DataSource>) -> Self {
        Self { store, source }
    }

    pub fn store(&self) -> &Arc<CacheStore> {
        &self.store
    }

    pub fn config(&self) -> &CacheConfig {
        self.store.config()
    }

    /// Read policy built from the configuration defaults
    pub fn default_policy(&self) -> ReadPolicy {
        ReadPolicy::from_config(self.config())
    }

    /// Register an observability hook
    pub fn add_observer(&self, observer: Arc<dyn CacheObserver>) {
        self.store.metrics().add_observer(observer);
    }

    /// Read `key` under the default policy
    pub async fn get_default(&self, key: &str) -> Result<CacheRead> {
        self.get(key, self.default_policy()).await
    }

    /// Read `key`, recomputing according to `policy`
    pub async fn get(&self, key: &str, policy: ReadPolicy) -> Result<CacheRead> {
        let now = self.store.clock().now();
        let prior = self.store.get(key).await;
        let seen_version = prior.as_ref().map_or(0, CacheEntry::version);

        match &prior {
            Some(entry) if !entry.is_hard_expired(now) => {
                let freshness = entry.freshness(now);
                if freshness == EntryState::Fresh {
                    debug!("Cache hit: {} (version {})", key, entry.version());
                    self.record(CacheEvent::Hit {
                        key: key.to_string(),
                    });
                    return Ok(CacheRead::from_entry(entry, ReadOutcome::Hit));
                }

                if policy.allow_stale {
                    debug!("Serving {} entry for {} while revalidating", freshness, key);
                    self.record(CacheEvent::StaleHit {
                        key: key.to_string(),
                        state: freshness,
                    });
                    self.revalidate_in_background(key, seen_version).await;
                    return Ok(CacheRead::from_entry(entry, ReadOutcome::Stale));
                }
                debug!("Strict read of {} entry: {}", freshness, key);
            }
            Some(entry) => {
                debug!("Cache entry past hard TTL: {} (version {})", key, entry.version());
            }
            None => {
                debug!("Cache miss: {}", key);
            }
        }
        self.record(CacheEvent::Miss {
            key: key.to_string(),
        });

        match self
            .refresh_and_wait(key, policy.wait_timeout, Some(seen_version))
            .await
        {
            Ok(read) => Ok(read),
            Err(error) => self.recover(key, policy, prior.is_some(), error).await,
        }
    }

    /// Mark every entry tagged `tag` as INVALID
    ///
    /// Never fails and never recomputes; the next read decides.
    pub async fn invalidate(&self, tag: &str) -> InvalidationEvent {
        self.invalidate_as(
            tag,
            InvalidationReason::TagMatch {
                tag: tag.to_string(),
            },
        )
        .await
    }

    /// Invalidation requested by an agent that just mutated the source
    pub async fn invalidate_after_update(&self, tag: &str) -> InvalidationEvent {
        self.invalidate_as(
            tag,
            InvalidationReason::SourceUpdated {
                tag: tag.to_string(),
            },
        )
        .await
    }

    /// Recompute `key` now and wait for the result
    ///
    /// Joins a refresh already in flight instead of starting a second one.
    pub async fn force_refresh(&self, key: &str) -> Result<CacheRead> {
        info!("Forced refresh requested: {}", key);
        self.refresh_and_wait(key, self.config().wait_timeout, None)
            .await
    }

    /// Remove the value for `key`; its version counter is kept
    pub async fn evict(&self, key: &str) -> InvalidationEvent {
        let keys = match self.store.evict(key).await {
            Some(_) => vec![key.to_string()],
            None => Vec::new(),
        };
        InvalidationEvent::new(InvalidationReason::Evicted, keys, self.store.clock().wall())
    }

    /// Snapshot of the stored entry without triggering any refresh
    pub async fn entry(&self, key: &str) -> Option<CacheEntry> {
        self.store.get(key).await
    }

    /// Get cache statistics
    pub async fn stats(&self) -> CacheStats {
        self.store.stats().await
    }

    async fn invalidate_as(&self, tag: &str, reason: InvalidationReason) -> InvalidationEvent {
        let keys = self.store.mark_invalid_by_tag(tag).await;
        let context = format!("{} entries marked invalid", keys.len());
        InvalidationEvent::new(reason, keys, self.store.clock().wall()).with_context(context)
    }

    /// Kick off a detached refresh unless one is already running
    async fn revalidate_in_background(&self, key: &str, seen_version: u64) {
        match self.store.try_begin_refresh_since(key, seen_version).await {
            RefreshAdmission::Winner(ticket) => {
                debug!("Background refresh {} started: {}", ticket.refresh_id(), key);
                // Detached: failures end up in the metrics, not with this caller
                drop(self.spawn_refresh(ticket));
            }
            RefreshAdmission::Joined(_) => {
                debug!("Background refresh already in flight: {}", key);
            }
            RefreshAdmission::Current(entry) => {
                debug!("{} already at version {}", key, entry.version());
            }
        }
    }

    /// Run or join the single-flight refresh for `key` and wait for it
    ///
    /// With `seen_version`, a fresh entry newer than that version is returned
    /// as is instead of recomputing.
    async fn refresh_and_wait(
        &self,
        key: &str,
        wait_timeout: Duration,
        seen_version: Option<u64>,
    ) -> Result<CacheRead> {
        let admission = match seen_version {
            Some(seen) => self.store.try_begin_refresh_since(key, seen).await,
            None => self.store.try_begin_refresh(key).await,
        };

        match admission {
            RefreshAdmission::Winner(ticket) => {
                let entry = self.run_owned_refresh(ticket).await?;
                Ok(CacheRead::from_entry(&entry, ReadOutcome::Computed))
            }
            RefreshAdmission::Joined(waiter) => {
                self.record(CacheEvent::Joined {
                    key: key.to_string(),
                });
                let entry = self.await_refresh(waiter, wait_timeout).await?;
                Ok(CacheRead::from_entry(&entry, ReadOutcome::Joined))
            }
            RefreshAdmission::Current(entry) => {
                self.record(CacheEvent::Joined {
                    key: key.to_string(),
                });
                Ok(CacheRead::from_entry(&entry, ReadOutcome::Joined))
            }
        }
    }

    async fn run_owned_refresh(&self, ticket: RefreshTicket) -> Result<CacheEntry> {
        let key = ticket.key().to_string();
        match self.spawn_refresh(ticket).await {
            Ok(result) => result,
            Err(join_error) => Err(CacheError::Other(format!(
                "refresh task for '{}' did not complete: {}",
                key, join_error
            ))),
        }
    }

    async fn await_refresh(&self, waiter: RefreshWaiter, timeout: Duration) -> Result<CacheEntry> {
        let key = waiter.key().to_string();
        match waiter.wait(timeout).await {
            Ok(_) => self.store.get(&key).await.ok_or_else(|| CacheError::NotFound {
                key: key.clone(),
                reason: "entry evicted after refresh".to_string(),
            }),
            Err(error) => {
                if matches!(error, CacheError::ConcurrentRefreshTimeout { .. }) {
                    warn!("Gave up waiting for in-flight refresh: {}", key);
                    self.record(CacheEvent::WaitTimedOut { key });
                }
                Err(error)
            }
        }
    }

    /// Apply the failure policy to a failed synchronous refresh
    async fn recover(
        &self,
        key: &str,
        policy: ReadPolicy,
        had_entry: bool,
        error: CacheError,
    ) -> Result<CacheRead> {
        let current = self.store.get(key).await;

        match current {
            Some(entry)
                if policy.fallback_to_stale_on_error
                    && !entry.is_hard_expired(self.store.clock().now()) =>
            {
                warn!(
                    "Serving last known good version {} of {} after error: {}",
                    entry.version(),
                    key,
                    error
                );
                self.record(CacheEvent::Fallback {
                    key: key.to_string(),
                    version: entry.version(),
                });
                Ok(CacheRead::from_entry(&entry, ReadOutcome::Fallback))
            }
            None if !had_entry && error.is_refresh_failure() => Err(CacheError::NotFound {
                key: key.to_string(),
                reason: error.to_string(),
            }),
            _ => Err(error),
        }
    }

    /// Spawn the recomputation for a won ticket; always ends the refresh
    fn spawn_refresh(&self, ticket: RefreshTicket) -> JoinHandle<Result<CacheEntry>> {
        let store = Arc::clone(&self.store);
        let source = Arc::clone(&self.source);
        let timeout = store.config().compute_timeout;

        tokio::spawn(async move {
            let key = ticket.key().to_string();
            let result = compute_bounded(source, key, timeout).await;
            store.end_refresh(ticket, result).await
        })
    }

    fn record(&self, event: CacheEvent) {
        self.store.metrics().record(event);
    }
}

/// Run `DataSource::compute` on its own task, bounded by `timeout`
///
/// A panic inside the source is reported as a compute failure; on timeout the
/// compute task is aborted.
async fn compute_bounded(
    source: Arc<dyn DataSource>,
    key: CacheKey,
    timeout: Duration,
) -> std::result::Result<SourceValue, CacheError> {
    let compute_key = key.clone();
    let mut task = tokio::spawn(async move { source.compute(&compute_key).await });

    match tokio::time::timeout(timeout, &mut task).await {
        Ok(Ok(Ok(value))) => Ok(value),
        Ok(Ok(Err(source_error))) => Err(CacheError::SourceComputeFailure {
            key,
            reason: source_error.to_string(),
        }),
        Ok(Err(join_error)) => Err(CacheError::SourceComputeFailure {
            key,
            reason: format!("compute task failed: {}", join_error),
        }),
        Err(_) => {
            task.abort();
            Err(CacheError::SourceTimeout {
                key,
                timeout_ms: timeout.as_millis() as u64,
            })
        }
    }
}
