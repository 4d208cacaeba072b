//! Agents that mutate the navigation source and request invalidation

use crate::cache::controller::RevalidationController;
use crate::cache::types::{CacheKey, Tag};
use crate::navigation::{NavigationStore, NAVIGATION_KEY, NAVIGATION_TAG, PRODUCTS_ITEM};
use chrono::{DateTime, Utc};
use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

const DESCRIPTORS: [&str; 10] = [
    "New",
    "Updated",
    "Featured",
    "Hot",
    "Best Seller",
    "Limited Edition",
    "On Sale",
    "Premium",
    "Exclusive",
    "Trending",
];

const COLORS: [&str; 7] = ["Red", "Blue", "Green", "Black", "Purple", "Gold", "Silver"];

/// Number of product slots the simulator picks from
const PRODUCT_SLOTS: usize = 3;

/// Acknowledgement of one source mutation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateAck {
    pub success: bool,
    pub message: String,
    pub affected_key: CacheKey,
    pub timestamp: DateTime<Utc>,
    pub update_id: Uuid,
    /// Source version after the mutation
    pub source_version: u64,
    /// Cache keys flipped to INVALID by the follow-up invalidation
    pub invalidated_keys: Vec<CacheKey>,
}

/// Simulated update failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SimulationError {
    /// Nothing in the source matched the update target
    #[error("No update performed - {0}")]
    TargetNotFound(String),
}

impl SimulationError {
    pub fn to_http_status_code(&self) -> u16 {
        match self {
            SimulationError::TargetNotFound(_) => 404,
        }
    }
}

/// Any agent that mutates the source of truth
///
/// After mutating it must invalidate the affected tag so the cache does not
/// keep serving the old view indefinitely.
#[async_trait]
pub trait UpdateSimulator: Send + Sync {
    async fn simulate_update(&self) -> Result<UpdateAck, SimulationError>;
}

/// Renames a random product in the "Products" dropdown
pub struct ProductUpdateSimulator {
    store: Arc<NavigationStore>,
    controller: Arc<RevalidationController>,
    rng: Mutex<StdRng>,
    tag: Tag,
    affected_key: CacheKey,
}

struct ProductEdit {
    slot: usize,
    descriptor: &'static str,
    color: &'static str,
}

impl ProductUpdateSimulator {
    pub fn new(store: Arc<NavigationStore>, controller: Arc<RevalidationController>) -> Self {
        Self::with_rng(store, controller, StdRng::from_entropy())
    }

    /// Deterministic simulator for tests
    pub fn with_seed(
        store: Arc<NavigationStore>,
        controller: Arc<RevalidationController>,
        seed: u64,
    ) -> Self {
        Self::with_rng(store, controller, StdRng::seed_from_u64(seed))
    }

    fn with_rng(
        store: Arc<NavigationStore>,
        controller: Arc<RevalidationController>,
        rng: StdRng,
    ) -> Self {
        Self {
            store,
            controller,
            rng: Mutex::new(rng),
            tag: NAVIGATION_TAG.to_string(),
            affected_key: NAVIGATION_KEY.to_string(),
        }
    }

    fn pick_edit(&self) -> ProductEdit {
        let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
        ProductEdit {
            slot: rng.gen_range(0..PRODUCT_SLOTS),
            descriptor: DESCRIPTORS[rng.gen_range(0..DESCRIPTORS.len())],
            color: COLORS[rng.gen_range(0..COLORS.len())],
        }
    }

    async fn run(&self) -> Result<UpdateAck, SimulationError> {
        let edit = self.pick_edit();
        let timestamp = self.controller.store().clock().wall();
        let new_title = format!(
            "⏱️ {} - {} Product {} ({})",
            timestamp.format("%H:%M:%S"),
            edit.color,
            edit.slot + 1,
            edit.descriptor
        );

        let committed = self
            .store
            .update(|data| {
                let link = data.dropdown_links_mut(PRODUCTS_ITEM)?.get_mut(edit.slot)?;
                Some(std::mem::replace(&mut link.title, new_title.clone()))
            })
            .await;

        let Some((old_title, snapshot)) = committed else {
            warn!("Product slot {} not found in navigation", edit.slot + 1);
            return Err(SimulationError::TargetNotFound(
                "could not find product in navigation".to_string(),
            ));
        };

        let event = self.controller.invalidate_after_update(&self.tag).await;
        info!(
            "Source version {} written; invalidated {} cache entries",
            snapshot.version,
            event.keys.len()
        );

        Ok(UpdateAck {
            success: true,
            message: format!("Updated: \"{}\" → \"{}\"", old_title, new_title),
            affected_key: self.affected_key.clone(),
            timestamp,
            update_id: Uuid::new_v4(),
            source_version: snapshot.version,
            invalidated_keys: event.keys,
        })
    }
}

#[async_trait]
impl UpdateSimulator for ProductUpdateSimulator {
    async fn simulate_update(&self) -> Result<UpdateAck, SimulationError> {
        self.run().await
    }
}
