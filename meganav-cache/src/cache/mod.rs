//! # Revalidating Cache
//!
//! Stale-while-revalidate caching for computed artifacts such as the site
//! navigation tree.
//!
//! ## Features
//!
//! - **Soft/Hard TTL**: entries turn STALE after the soft TTL and must be
//!   recomputed before serving once past the optional hard TTL
//! - **Stale-While-Revalidate**: stale values are served immediately while a
//!   single background recomputation runs
//! - **Single-Flight Refresh**: at most one recomputation per key; concurrent
//!   readers join it instead of stampeding the source
//! - **Tag Invalidation**: entries flip to INVALID by tag without losing their
//!   last known good value
//! - **Fallback**: failed synchronous refreshes may serve the previous value,
//!   flagged degraded
//! - **Observability**: counters and pluggable [`CacheObserver`] hooks
//!
//! ## Example
//!
//! ```rust
//! use meganav_cache::cache::{CacheConfig, RevalidationController};
//! use meganav_cache::source::{FnSource, SourceValue};
//! use meganav_cache::SourceError;
//! use serde_json::json;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn example() -> meganav_cache::Result<()> {
//! let config = CacheConfig::builder()
//!     .soft_ttl(Duration::from_secs(3600))
//!     .build();
//!
//! let source = Arc::new(FnSource::new(|_key: String| async move {
//!     Ok::<_, SourceError>(SourceValue::new(json!({"logo": "MegaNav"})).with_tag("navigation"))
//! }));
//! let controller = RevalidationController::new(config, source)?;
//!
//! let read = controller.get_default("navigation").await?;
//! println!("version {} served as {:?}", read.version, read.outcome);
//!
//! controller.invalidate("navigation").await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod controller;
pub mod entry;
pub mod invalidation;
pub mod metrics;
pub mod store;
pub mod types;

pub use config::{CacheConfig, CacheConfigBuilder, CachePreset};
pub use controller::{CacheRead, ReadOutcome, ReadPolicy, RevalidationController};
pub use entry::{CacheEntry, CacheMetadata};
pub use invalidation::{InvalidationEvent, InvalidationReason};
pub use metrics::{CacheEvent, CacheMetrics, CacheObserver};
pub use store::{CacheStore, RefreshAdmission, RefreshOutcome, RefreshTicket, RefreshWaiter};
pub use types::{CacheKey, CacheStats, CacheValue, EntryState, Tag};
