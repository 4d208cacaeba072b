//! # MegaNav Cache (meganav-cache)
//!
//! A revalidating cache for derived data that many readers request while the
//! underlying source keeps changing.
//!
//! ## Features
//!
//! - Stale-while-revalidate reads with soft and hard TTLs
//! - Single-flight recomputation per key, with bounded compute and wait times
//! - Tag-based invalidation that keeps the last known good value servable
//! - Fallback to last known good data when a synchronous refresh fails
//! - Event hooks and counters for hits, misses, stale serves and failures
//! - Injectable [`Clock`] for deterministic tests
//!
//! ## Reading Through the Cache
//!
//! ```no_run
//! use meganav_cache::{
//!     CacheConfig, NavigationSource, NavigationStore, RevalidationController, NAVIGATION_KEY,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> meganav_cache::Result<()> {
//!     let store = Arc::new(NavigationStore::demo());
//!     let source = Arc::new(NavigationSource::new(store));
//!     let controller = RevalidationController::new(CacheConfig::hourly(), source)?;
//!
//!     let read = controller.get_default(NAVIGATION_KEY).await?;
//!     println!("v{} ({:?}): {}", read.version, read.outcome, read.value);
//!     Ok(())
//! }
//! ```
//!
//! ## Pushing Updates
//!
//! Writers mutate the source and then invalidate by tag. The next reader gets
//! the old value immediately while a background refresh picks up the change.
//!
//! ```no_run
//! use meganav_cache::{
//!     CacheConfig, NavigationSource, NavigationStore, ProductUpdateSimulator,
//!     RevalidationController, UpdateSimulator,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let store = Arc::new(NavigationStore::demo());
//!     let source = Arc::new(NavigationSource::new(store.clone()));
//!     let controller = Arc::new(RevalidationController::new(CacheConfig::default(), source)?);
//!
//!     let simulator = ProductUpdateSimulator::new(store, controller.clone());
//!     let ack = simulator.simulate_update().await?;
//!     println!("{}", ack.message);
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod clock;
pub mod error;
pub mod navigation;
pub mod simulator;
pub mod source;

// Re-export main types for convenience
pub use cache::{
    CacheConfig, CacheConfigBuilder, CacheEntry, CacheEvent, CacheKey, CacheMetadata, CachePreset,
    CacheMetrics, CacheObserver, CacheRead, CacheStats, CacheStore, CacheValue, EntryState,
    InvalidationEvent, InvalidationReason, ReadOutcome, ReadPolicy, RevalidationController, Tag,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{CacheError, Result, SourceError};
pub use navigation::{
    NavigationData, NavigationSnapshot, NavigationSource, NavigationStore, NAVIGATION_KEY,
    NAVIGATION_TAG,
};
pub use simulator::{ProductUpdateSimulator, SimulationError, UpdateAck, UpdateSimulator};
pub use source::{DataSource, FnSource, SourceValue};
