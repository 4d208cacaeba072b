//! Navigation menu model and its in-memory source of truth

use crate::cache::types::Tag;
use crate::error::SourceError;
use crate::source::{DataSource, SourceValue};
use chrono::{DateTime, Utc};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::debug;

/// Cache key of the navigation document
pub const NAVIGATION_KEY: &str = "navigation";

/// Tag carried by every entry derived from navigation data
pub const NAVIGATION_TAG: &str = "navigation";

/// Title of the top-level item whose dropdown lists products
pub const PRODUCTS_ITEM: &str = "Products";

/// Site navigation document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NavigationData {
    pub header: NavHeader,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NavHeader {
    pub logo: String,
    pub items: Vec<NavItem>,
}

/// Top-level menu entry, either a plain link or a dropdown
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NavItem {
    pub title: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub href: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dropdown: Option<Dropdown>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dropdown {
    pub title: String,
    pub items: Vec<NavLink>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NavLink {
    pub title: String,
    pub href: String,
}

impl NavigationData {
    /// Seed menu: a "Products" dropdown with three products
    pub fn demo() -> Self {
        let products = (1..=3)
            .map(|i| NavLink {
                title: format!("Product {}", i),
                href: "/products".to_string(),
            })
            .collect();

        Self {
            header: NavHeader {
                logo: "MegaNav".to_string(),
                items: vec![NavItem {
                    title: PRODUCTS_ITEM.to_string(),
                    href: None,
                    dropdown: Some(Dropdown {
                        title: "Our Products".to_string(),
                        items: products,
                    }),
                }],
            },
        }
    }

    pub fn find_item(&self, title: &str) -> Option<&NavItem> {
        self.header.items.iter().find(|item| item.title == title)
    }

    pub fn find_item_mut(&mut self, title: &str) -> Option<&mut NavItem> {
        self.header.items.iter_mut().find(|item| item.title == title)
    }

    /// Dropdown links under the top-level item `title`
    pub fn dropdown_links_mut(&mut self, title: &str) -> Option<&mut Vec<NavLink>> {
        self.find_item_mut(title)
            .and_then(|item| item.dropdown.as_mut())
            .map(|dropdown| &mut dropdown.items)
    }
}

/// Navigation data as of one committed update
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NavigationSnapshot {
    pub data: NavigationData,
    pub last_updated: DateTime<Utc>,
    /// Source-side version, independent of cache entry versions
    pub version: u64,
}

/// Mutable source of truth for navigation data
#[derive(Debug)]
pub struct NavigationStore {
    inner: RwLock<NavigationSnapshot>,
}

impl NavigationStore {
    pub fn new(data: NavigationData) -> Self {
        Self {
            inner: RwLock::new(NavigationSnapshot {
                data,
                last_updated: Utc::now(),
                version: 1,
            }),
        }
    }

    /// Store seeded with [`NavigationData::demo`]
    pub fn demo() -> Self {
        Self::new(NavigationData::demo())
    }

    pub async fn snapshot(&self) -> NavigationSnapshot {
        self.inner.read().await.clone()
    }

    pub async fn data(&self) -> NavigationData {
        self.inner.read().await.data.clone()
    }

    pub async fn version(&self) -> u64 {
        self.inner.read().await.version
    }

    /// Replace the whole document
    pub async fn replace(&self, data: NavigationData) -> NavigationSnapshot {
        let mut inner = self.inner.write().await;
        inner.data = data;
        inner.last_updated = Utc::now();
        inner.version += 1;
        inner.clone()
    }

    /// Apply `edit` to a copy of the data and commit it if it returns `Some`
    ///
    /// Returns the edit's result together with the committed snapshot; a
    /// `None` from `edit` leaves the store untouched.
    pub async fn update<F, T>(&self, edit: F) -> Option<(T, NavigationSnapshot)>
    where
        F: FnOnce(&mut NavigationData) -> Option<T>,
    {
        let mut inner = self.inner.write().await;
        let mut draft = inner.data.clone();
        let result = edit(&mut draft)?;

        inner.data = draft;
        inner.last_updated = Utc::now();
        inner.version += 1;
        Some((result, inner.clone()))
    }
}

impl Default for NavigationStore {
    fn default() -> Self {
        Self::demo()
    }
}

/// [`DataSource`] serving the navigation document from a [`NavigationStore`]
pub struct NavigationSource {
    store: Arc<NavigationStore>,
    latency: Duration,
    tag: Tag,
}

impl NavigationSource {
    pub fn new(store: Arc<NavigationStore>) -> Self {
        Self {
            store,
            latency: Duration::ZERO,
            tag: NAVIGATION_TAG.to_string(),
        }
    }

    /// Add artificial latency to every compute, for demos
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn store(&self) -> &Arc<NavigationStore> {
        &self.store
    }
}

#[async_trait]
impl DataSource for NavigationSource {
    async fn compute(&self, key: &str) -> Result<SourceValue, SourceError> {
        if key != NAVIGATION_KEY {
            return Err(SourceError::UnknownKey(key.to_string()));
        }

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let snapshot = self.store.snapshot().await;
        debug!("Computed navigation from source version {}", snapshot.version);

        let value = serde_json::to_value(&snapshot.data)?;
        Ok(SourceValue::new(value).with_tag(self.tag.clone()))
    }
}
