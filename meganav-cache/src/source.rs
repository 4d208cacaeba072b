//! Data sources that derive cache values on demand

use crate::cache::types::{CacheValue, Tag};
use crate::error::SourceError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::future::Future;

/// A freshly computed value together with the tags it should be stored under
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceValue {
    pub value: CacheValue,
    pub tags: BTreeSet<Tag>,
}

impl SourceValue {
    /// Create an untagged value
    pub fn new(value: CacheValue) -> Self {
        Self {
            value,
            tags: BTreeSet::new(),
        }
    }

    /// Attach a tag for bulk invalidation
    pub fn with_tag(mut self, tag: impl Into<Tag>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    /// Attach several tags
    pub fn with_tags<I, T>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<Tag>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }
}

/// Produces a fresh value for a key
///
/// Implementations may be slow or fail, and must tolerate being retried for
/// the same key. They must not touch the cache themselves.
#[async_trait]
pub trait DataSource: Send + Sync {
    async fn compute(&self, key: &str) -> Result<SourceValue, SourceError>;
}

/// Adapts an async closure into a [`DataSource`]
pub struct FnSource<F> {
    f: F,
}

impl<F> FnSource<F> {
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F, Fut> DataSource for FnSource<F>
where
    F: Fn(String) -> Fut + Send + Sync,
    Fut: Future<Output = Result<SourceValue, SourceError>> + Send + 'static,
{
    async fn compute(&self, key: &str) -> Result<SourceValue, SourceError> {
        (self.f)(key.to_string()).await
    }
}
