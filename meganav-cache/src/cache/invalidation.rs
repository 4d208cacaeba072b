//! Cache invalidation events
//!
//! Invalidation never deletes data: tag matches flip entries to INVALID and
//! the next read decides whether to serve them stale or recompute first.
//! Only explicit eviction removes a value.

use crate::cache::types::{CacheKey, Tag};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Reason for cache invalidation
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InvalidationReason {
    /// Invalidated by tag match
    TagMatch { tag: Tag },

    /// Source data changed and an update agent requested invalidation
    SourceUpdated { tag: Tag },

    /// Removed by explicit eviction
    Evicted,
}

impl std::fmt::Display for InvalidationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InvalidationReason::TagMatch { tag } => write!(f, "tag match: {}", tag),
            InvalidationReason::SourceUpdated { tag } => {
                write!(f, "source updated: {}", tag)
            }
            InvalidationReason::Evicted => write!(f, "explicit eviction"),
        }
    }
}

/// Event describing one invalidation call
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvalidationEvent {
    /// Reason for invalidation
    pub reason: InvalidationReason,

    /// When the invalidation occurred
    pub timestamp: DateTime<Utc>,

    /// Keys whose state changed
    pub keys: Vec<CacheKey>,

    /// Additional context
    pub context: Option<String>,
}

impl InvalidationEvent {
    /// Create a new invalidation event
    pub fn new(reason: InvalidationReason, keys: Vec<CacheKey>, timestamp: DateTime<Utc>) -> Self {
        Self {
            reason,
            timestamp,
            keys,
            context: None,
        }
    }

    /// Add context to the event
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    /// Whether any entry changed state
    pub fn is_noop(&self) -> bool {
        self.keys.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalidation_reason_display() {
        let reason = InvalidationReason::TagMatch {
            tag: "navigation".to_string(),
        };
        assert_eq!(reason.to_string(), "tag match: navigation");

        let reason = InvalidationReason::SourceUpdated {
            tag: "navigation".to_string(),
        };
        assert!(reason.to_string().contains("source updated"));
        assert_eq!(InvalidationReason::Evicted.to_string(), "explicit eviction");
    }

    #[test]
    fn test_invalidation_event() {
        let event = InvalidationEvent::new(
            InvalidationReason::TagMatch {
                tag: "navigation".to_string(),
            },
            vec!["navigation".to_string(), "footer".to_string()],
            Utc::now(),
        )
        .with_context("manual revalidation");

        assert_eq!(event.keys.len(), 2);
        assert!(!event.is_noop());
        assert_eq!(event.context.as_deref(), Some("manual revalidation"));
    }

    #[test]
    fn test_invalidation_event_serialization() {
        let event = InvalidationEvent::new(InvalidationReason::Evicted, Vec::new(), Utc::now());
        assert!(event.is_noop());

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["reason"]["kind"], "evicted");
        assert!(json["keys"].as_array().unwrap().is_empty());
    }
}
