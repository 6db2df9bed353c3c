//! Cache metadata: when each collection was last refreshed
//!
//! Persisted as `metadata.json` next to the snapshots. Staleness is decided
//! from this file alone, per collection.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Refresh bookkeeping for a single collection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionMeta {
    /// Fetch time of the snapshot currently on disk
    pub refreshed_at: DateTime<Utc>,
    /// Number of items in that snapshot
    pub item_count: usize,
}

/// Refresh bookkeeping for every cached collection
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheMetadata {
    #[serde(default)]
    pub collections: BTreeMap<String, CollectionMeta>,
}

impl CacheMetadata {
    pub fn get(&self, collection: &str) -> Option<&CollectionMeta> {
        self.collections.get(collection)
    }

    /// Records a completed refresh
    pub fn record(&mut self, collection: &str, refreshed_at: DateTime<Utc>, item_count: usize) {
        self.collections.insert(
            collection.to_string(),
            CollectionMeta {
                refreshed_at,
                item_count,
            },
        );
    }

    /// Forgets a collection; returns whether it was known
    pub fn remove(&mut self, collection: &str) -> bool {
        self.collections.remove(collection).is_some()
    }

    pub fn clear(&mut self) {
        self.collections.clear();
    }

    /// Time since the collection was refreshed, or `None` if it never was
    pub fn age(&self, collection: &str, now: DateTime<Utc>) -> Option<Duration> {
        self.get(collection).map(|meta| now - meta.refreshed_at)
    }

    /// A collection is stale once its age reaches the window, or if it was
    /// never refreshed
    pub fn is_stale(&self, collection: &str, window: Duration, now: DateTime<Utc>) -> bool {
        match self.age(collection, now) {
            Some(age) => age >= window,
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_collection_is_stale() {
        let meta = CacheMetadata::default();
        assert!(meta.is_stale("bands", Duration::hours(24), Utc::now()));
        assert!(meta.age("bands", Utc::now()).is_none());
    }

    #[test]
    fn test_staleness_is_per_collection() {
        let now = Utc::now();
        let mut meta = CacheMetadata::default();
        meta.record("bands", now - Duration::hours(1), 38);
        meta.record("albums", now - Duration::hours(25), 487);

        let window = Duration::hours(24);
        assert!(!meta.is_stale("bands", window, now));
        assert!(meta.is_stale("albums", window, now));
        assert!(meta.is_stale("songs", window, now));
    }

    #[test]
    fn test_staleness_boundary_is_inclusive() {
        let now = Utc::now();
        let mut meta = CacheMetadata::default();
        meta.record("bands", now - Duration::hours(24), 38);

        assert!(meta.is_stale("bands", Duration::hours(24), now));
    }

    #[test]
    fn test_record_and_remove() {
        let now = Utc::now();
        let mut meta = CacheMetadata::default();
        meta.record("songs", now, 10);

        assert_eq!(meta.get("songs").map(|m| m.item_count), Some(10));
        assert!(meta.remove("songs"));
        assert!(!meta.remove("songs"));
        assert!(meta.get("songs").is_none());
    }

    #[test]
    fn test_metadata_json_shape() {
        let mut meta = CacheMetadata::default();
        meta.record("bands", Utc::now(), 38);

        let json = serde_json::to_string(&meta).unwrap();
        assert!(json.contains("\"collections\""));
        assert!(json.contains("\"refreshed_at\""));
        assert!(json.contains("\"item_count\":38"));

        let empty: CacheMetadata = serde_json::from_str("{}").unwrap();
        assert!(empty.collections.is_empty());
    }
}
