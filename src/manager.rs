//! Cache manager for CMS collections
//!
//! `CacheManager` drives full-collection refreshes through a
//! [`CollectionSource`], commits completed snapshots to the [`SnapshotStore`],
//! and serves reads from the last committed snapshot without ever touching
//! the network.
//!
//! Per collection the lifecycle is `Empty -> Fresh -> Stale -> (Refreshing) -> Fresh`.
//! A failed refresh drops everything it fetched and leaves the collection in
//! whatever state it was in before. Errors stop at the `refresh` boundary and
//! are reported as a [`RefreshOutcome`]; readers never see them.
//!
//! Every disk mutation and every cold load from disk happens under one disk
//! lock, so a `clear` can never be undone by a read that raced it. Readers
//! served from memory never take that lock.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fmt;
use std::io;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use thiserror::Error;

use crate::cache::{CacheMetadata, SnapshotStore, StoreError};
use crate::config::is_valid_collection_name;
use crate::data::{ApiError, CollectionSnapshot, CollectionSource, FieldFilter, ItemRecord, Page};
use crate::retry::RetryPolicy;

/// Settings the manager runs with
#[derive(Debug, Clone)]
pub struct CacheSettings {
    /// Local collection name to remote collection id
    pub collections: BTreeMap<String, String>,
    /// Age at which a snapshot becomes eligible for refresh
    pub stale_after: Duration,
    /// Items requested per page
    pub page_size: u32,
    /// Retry policy for transient page failures
    pub retry: RetryPolicy,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            collections: BTreeMap::new(),
            stale_after: Duration::hours(24),
            page_size: 100,
            retry: RetryPolicy::default(),
        }
    }
}

/// Where a collection is in its refresh lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CollectionState {
    /// Never refreshed (or cleared)
    Empty,
    /// Refreshed within the staleness window
    Fresh,
    /// Older than the staleness window
    Stale,
    /// A refresh is in flight
    Refreshing,
}

impl fmt::Display for CollectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            CollectionState::Empty => "empty",
            CollectionState::Fresh => "fresh",
            CollectionState::Stale => "stale",
            CollectionState::Refreshing => "refreshing",
        };
        f.write_str(label)
    }
}

/// Why a refresh did not commit
#[derive(Debug, Error)]
pub enum RefreshError {
    /// The collection is not configured
    #[error("unknown collection '{0}'")]
    UnknownCollection(String),

    /// A page could not be fetched
    #[error("fetch failed at offset {offset} after {attempts} attempt(s): {source}")]
    Fetch {
        offset: u32,
        attempts: u32,
        #[source]
        source: ApiError,
    },

    /// The API returned the same item twice in one cycle
    #[error("duplicate item id '{id}' at offset {offset}")]
    DuplicateItem { id: String, offset: u32 },

    /// The completed snapshot could not be written
    #[error("failed to write snapshot: {0}")]
    Store(#[from] StoreError),
}

impl RefreshError {
    /// Short machine-friendly label for logs
    pub fn kind(&self) -> &'static str {
        match self {
            RefreshError::UnknownCollection(_) => "unknown_collection",
            RefreshError::Fetch { source, .. } => source.kind(),
            RefreshError::DuplicateItem { .. } => "duplicate_item",
            RefreshError::Store(_) => "store",
        }
    }
}

/// Result of a single collection refresh
#[derive(Debug)]
pub enum RefreshOutcome {
    /// A new snapshot was committed
    Refreshed { items: usize, pages: u32 },
    /// The snapshot is still within the staleness window
    Skipped,
    /// Another refresh of this collection is in flight
    AlreadyRefreshing,
    /// No source is configured, or refreshing is turned off
    Disabled,
    /// The refresh failed; the previous snapshot is untouched
    Failed(RefreshError),
}

impl RefreshOutcome {
    /// True unless the refresh failed
    pub fn is_ok(&self) -> bool {
        !matches!(self, RefreshOutcome::Failed(_))
    }

    pub fn error(&self) -> Option<&RefreshError> {
        match self {
            RefreshOutcome::Failed(err) => Some(err),
            _ => None,
        }
    }
}

impl fmt::Display for RefreshOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RefreshOutcome::Refreshed { items, pages } => {
                write!(f, "refreshed {} items in {} page(s)", items, pages)
            }
            RefreshOutcome::Skipped => f.write_str("fresh, skipped"),
            RefreshOutcome::AlreadyRefreshing => f.write_str("already refreshing"),
            RefreshOutcome::Disabled => f.write_str("refresh disabled"),
            RefreshOutcome::Failed(err) => write!(f, "failed: {}", err),
        }
    }
}

/// Summary of one collection for status displays
#[derive(Debug, Clone, Serialize)]
pub struct CollectionInfo {
    pub name: String,
    pub state: CollectionState,
    pub item_count: Option<usize>,
    pub refreshed_at: Option<DateTime<Utc>>,
    pub age_secs: Option<i64>,
}

/// Marks a collection as in flight until dropped
struct InFlightGuard<'a> {
    in_flight: &'a Mutex<HashSet<String>>,
    collection: String,
}

impl<'a> InFlightGuard<'a> {
    fn acquire(in_flight: &'a Mutex<HashSet<String>>, collection: &str) -> Option<Self> {
        if !in_flight.lock().insert(collection.to_string()) {
            return None;
        }
        Some(Self {
            in_flight,
            collection: collection.to_string(),
        })
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.in_flight.lock().remove(&self.collection);
    }
}

/// Owns the on-disk cache and the refresh policy for a set of collections
///
/// Construct one and share it by `Arc` with the background worker and the
/// readers.
pub struct CacheManager {
    store: SnapshotStore,
    settings: CacheSettings,
    source: Option<Arc<dyn CollectionSource>>,
    metadata: Arc<Mutex<CacheMetadata>>,
    snapshots: Arc<RwLock<HashMap<String, Arc<CollectionSnapshot>>>>,
    /// Serializes file writes, removals and cold loads
    disk: Arc<Mutex<()>>,
    in_flight: Mutex<HashSet<String>>,
}

impl fmt::Debug for CacheManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheManager")
            .field("store", &self.store)
            .field("settings", &self.settings)
            .field("has_source", &self.source.is_some())
            .finish_non_exhaustive()
    }
}

impl CacheManager {
    /// Creates a read-only manager; call [`with_source`](Self::with_source) to enable refreshing
    ///
    /// Existing metadata is loaded from the store. Unreadable metadata is
    /// logged and treated as empty, which only makes every collection stale.
    pub fn new(store: SnapshotStore, settings: CacheSettings) -> Self {
        let metadata = store.load_metadata().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "ignoring unreadable cache metadata");
            CacheMetadata::default()
        });

        Self {
            store,
            settings,
            source: None,
            metadata: Arc::new(Mutex::new(metadata)),
            snapshots: Arc::new(RwLock::new(HashMap::new())),
            disk: Arc::new(Mutex::new(())),
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    /// Attach the source refreshes page through
    pub fn with_source(mut self, source: Arc<dyn CollectionSource>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn settings(&self) -> &CacheSettings {
        &self.settings
    }

    pub fn store(&self) -> &SnapshotStore {
        &self.store
    }

    /// Names of the configured collections
    pub fn collections(&self) -> impl Iterator<Item = &str> {
        self.settings.collections.keys().map(String::as_str)
    }

    /// Refresh one collection if it is stale, or unconditionally when `force` is set
    ///
    /// Pages through the whole collection from offset 0 and commits the result
    /// atomically. Any failure discards the partial fetch and leaves the
    /// existing snapshot and metadata untouched.
    pub async fn refresh(&self, collection: &str, force: bool) -> RefreshOutcome {
        let Some(remote_id) = self.settings.collections.get(collection) else {
            tracing::warn!(collection, "refresh requested for unknown collection");
            return RefreshOutcome::Failed(RefreshError::UnknownCollection(collection.to_string()));
        };

        let Some(source) = self.source.as_deref() else {
            tracing::debug!(collection, "no source configured, refresh disabled");
            return RefreshOutcome::Disabled;
        };

        if !force && !self.is_stale(collection) {
            tracing::debug!(collection, "cache is fresh, skipping refresh");
            return RefreshOutcome::Skipped;
        }

        let Some(_guard) = InFlightGuard::acquire(&self.in_flight, collection) else {
            tracing::debug!(collection, "refresh already in progress");
            return RefreshOutcome::AlreadyRefreshing;
        };

        let started = Utc::now();
        tracing::info!(collection, force, "refreshing collection");

        let result = match self.fetch_all(source, collection, remote_id).await {
            Ok((items, pages)) => self
                .commit(collection, items, started)
                .await
                .map(|snapshot| (snapshot.item_count, pages))
                .map_err(RefreshError::from),
            Err(err) => Err(err),
        };

        match result {
            Ok((items, pages)) => {
                tracing::info!(collection, items, pages, "collection refreshed");
                RefreshOutcome::Refreshed { items, pages }
            }
            Err(err) => {
                if matches!(err, RefreshError::Fetch { source: ApiError::Auth { .. }, .. }) {
                    tracing::error!(
                        collection,
                        kind = err.kind(),
                        error = %err,
                        "refresh aborted, check the API token"
                    );
                } else {
                    tracing::warn!(
                        collection,
                        kind = err.kind(),
                        error = %err,
                        "refresh failed, keeping previous snapshot"
                    );
                }
                RefreshOutcome::Failed(err)
            }
        }
    }

    /// Refresh every configured collection
    ///
    /// Collections are refreshed concurrently and independently; one failure
    /// never stops the others.
    pub async fn refresh_all(&self, force: bool) -> BTreeMap<String, RefreshOutcome> {
        let refreshes = self
            .settings
            .collections
            .keys()
            .map(|name| async move { (name.clone(), self.refresh(name, force).await) });

        let results: BTreeMap<String, RefreshOutcome> =
            join_all(refreshes).await.into_iter().collect();

        let failed = results.values().filter(|o| !o.is_ok()).count();
        tracing::info!(collections = results.len(), failed, "refresh cycle complete");

        results
    }

    /// Items from the last committed snapshot, optionally filtered
    ///
    /// Returns an empty list if the collection has no snapshot yet. Never
    /// blocks on the network.
    pub fn get(&self, collection: &str, filter: Option<&FieldFilter>) -> Vec<ItemRecord> {
        let Some(snapshot) = self.snapshot(collection) else {
            return Vec::new();
        };

        match filter {
            Some(filter) => snapshot
                .items
                .iter()
                .filter(|item| filter.matches(item))
                .cloned()
                .collect(),
            None => snapshot.items.clone(),
        }
    }

    /// The last committed snapshot, loading it from disk on first use
    pub fn snapshot(&self, collection: &str) -> Option<Arc<CollectionSnapshot>> {
        if let Some(snapshot) = self.snapshots.read().get(collection) {
            return Some(Arc::clone(snapshot));
        }

        if !is_valid_collection_name(collection) {
            return None;
        }

        let _disk = self.disk.lock();

        // a commit or another loader may have filled it while we waited
        if let Some(snapshot) = self.snapshots.read().get(collection) {
            return Some(Arc::clone(snapshot));
        }

        match self.store.read_snapshot(collection) {
            Ok(Some(snapshot)) => {
                let loaded = Arc::new(snapshot);
                self.snapshots
                    .write()
                    .insert(collection.to_string(), Arc::clone(&loaded));
                Some(loaded)
            }
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(collection, error = %e, "ignoring unreadable snapshot");
                None
            }
        }
    }

    /// Delete one collection's snapshot, or all of them
    ///
    /// Returns the number of snapshot files removed. Subsequent reads return
    /// nothing until the next successful refresh.
    pub fn clear(&self, collection: Option<&str>) -> Result<usize, StoreError> {
        if collection.is_some_and(|name| !is_valid_collection_name(name)) {
            return Ok(0);
        }

        let _disk = self.disk.lock();

        let removed = match collection {
            Some(name) => {
                let removed = usize::from(self.store.remove_snapshot(name)?);
                self.snapshots.write().remove(name);

                let updated = {
                    let mut metadata = self.metadata.lock();
                    metadata.remove(name).then(|| metadata.clone())
                };
                if let Some(updated) = updated {
                    self.store.save_metadata(&updated)?;
                }
                removed
            }
            None => {
                let removed = self.store.remove_all_snapshots()?;
                self.snapshots.write().clear();

                let updated = {
                    let mut metadata = self.metadata.lock();
                    metadata.clear();
                    metadata.clone()
                };
                self.store.save_metadata(&updated)?;
                removed
            }
        };

        tracing::info!(collection = collection.unwrap_or("*"), removed, "cache cleared");
        Ok(removed)
    }

    /// Whether the collection is due for a refresh
    pub fn is_stale(&self, collection: &str) -> bool {
        self.metadata
            .lock()
            .is_stale(collection, self.settings.stale_after, Utc::now())
    }

    /// Current lifecycle state of a collection
    pub fn state(&self, collection: &str) -> CollectionState {
        if self.in_flight.lock().contains(collection) {
            return CollectionState::Refreshing;
        }

        let metadata = self.metadata.lock();
        match metadata.get(collection) {
            None => CollectionState::Empty,
            Some(_) if metadata.is_stale(collection, self.settings.stale_after, Utc::now()) => {
                CollectionState::Stale
            }
            Some(_) => CollectionState::Fresh,
        }
    }

    /// Status of every configured or previously cached collection
    pub fn info(&self) -> Vec<CollectionInfo> {
        let now = Utc::now();
        let names: BTreeSet<String> = {
            let metadata = self.metadata.lock();
            self.settings
                .collections
                .keys()
                .chain(metadata.collections.keys())
                .cloned()
                .collect()
        };

        names
            .into_iter()
            .map(|name| {
                let state = self.state(&name);
                let meta = self.metadata.lock().get(&name).cloned();
                CollectionInfo {
                    state,
                    item_count: meta.as_ref().map(|m| m.item_count),
                    refreshed_at: meta.as_ref().map(|m| m.refreshed_at),
                    age_secs: meta.as_ref().map(|m| (now - m.refreshed_at).num_seconds()),
                    name,
                }
            })
            .collect()
    }

    /// Page through a whole collection, accumulating items in API order
    async fn fetch_all(
        &self,
        source: &dyn CollectionSource,
        collection: &str,
        remote_id: &str,
    ) -> Result<(Vec<ItemRecord>, u32), RefreshError> {
        let mut items = Vec::new();
        let mut seen = HashSet::new();
        let mut offset = 0u32;
        let mut pages = 0u32;

        loop {
            let Page {
                items: page_items,
                has_more,
            } = self.fetch_page(source, collection, remote_id, offset).await?;
            pages += 1;

            let count = page_items.len() as u32;
            for item in page_items {
                if !seen.insert(item.id.clone()) {
                    return Err(RefreshError::DuplicateItem { id: item.id, offset });
                }
                items.push(item);
            }

            tracing::debug!(collection, page = pages, offset, items = count, "page accumulated");

            if !has_more || count == 0 {
                break;
            }
            offset += count;
        }

        Ok((items, pages))
    }

    /// Fetch one page, retrying transient errors with backoff
    async fn fetch_page(
        &self,
        source: &dyn CollectionSource,
        collection: &str,
        remote_id: &str,
        offset: u32,
    ) -> Result<Page, RefreshError> {
        let retry = &self.settings.retry;
        let mut attempt = 0u32;

        loop {
            match source.fetch_page(remote_id, offset, self.settings.page_size).await {
                Ok(page) => return Ok(page),
                Err(err) if retry.should_retry(attempt, &err) => {
                    attempt += 1;
                    let delay = retry.delay_for(attempt, &err);
                    tracing::warn!(
                        collection,
                        offset,
                        attempt,
                        kind = err.kind(),
                        error = %err,
                        "transient error, retrying in {:?}",
                        delay
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => {
                    return Err(RefreshError::Fetch {
                        offset,
                        attempts: attempt + 1,
                        source: err,
                    })
                }
            }
        }
    }

    /// Write the snapshot, then record it in metadata and memory
    ///
    /// File I/O runs on the blocking pool while holding the disk lock; the
    /// metadata lock is only held long enough to update and copy the map.
    async fn commit(
        &self,
        collection: &str,
        items: Vec<ItemRecord>,
        fetched_at: DateTime<Utc>,
    ) -> Result<Arc<CollectionSnapshot>, StoreError> {
        let snapshot = Arc::new(CollectionSnapshot::new(collection, items, fetched_at));
        let path = self.store.snapshot_path(collection);

        let store = self.store.clone();
        let disk = Arc::clone(&self.disk);
        let metadata = Arc::clone(&self.metadata);
        let snapshots = Arc::clone(&self.snapshots);
        let committed = Arc::clone(&snapshot);

        tokio::task::spawn_blocking(move || {
            let _disk = disk.lock();
            store.write_snapshot(&committed)?;

            let name = committed.collection.clone();
            let updated = {
                let mut metadata = metadata.lock();
                metadata.record(&name, committed.fetched_at, committed.item_count);
                metadata.clone()
            };
            if let Err(e) = store.save_metadata(&updated) {
                // the snapshot is committed; a lost timestamp only causes an early refetch
                tracing::warn!(collection = %name, error = %e, "failed to persist cache metadata");
            }

            snapshots.write().insert(name, committed);
            Ok::<(), StoreError>(())
        })
        .await
        .map_err(|e| StoreError::Io {
            path,
            source: io::Error::other(e),
        })??;

        Ok(snapshot)
    }
}
