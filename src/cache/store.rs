//! Snapshot store for persisting collection snapshots to disk
//!
//! Provides a `SnapshotStore` that keeps one `<collection>.snapshot.json` file
//! per collection plus a shared `metadata.json`. Every write goes to a temporary file in the same
//! directory and is renamed over the target, so readers see either the old
//! file or the new one, never a partial write.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use directories::ProjectDirs;
use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

use super::CacheMetadata;
use crate::data::CollectionSnapshot;

/// Name of the shared metadata file
const METADATA_FILE: &str = "metadata.json";

/// Suffix of snapshot files; never collides with `METADATA_FILE`
const SNAPSHOT_SUFFIX: &str = ".snapshot.json";

/// Suffix for in-progress writes
const TEMP_SUFFIX: &str = ".tmp";

/// Distinguishes concurrent temp files written by the same process
static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Errors from reading or writing the cache directory
#[derive(Debug, Error)]
pub enum StoreError {
    /// Filesystem operation failed
    #[error("cache I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// File contents could not be encoded or decoded
    #[error("cache file {path} is not valid JSON: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl StoreError {
    fn io(path: &Path, source: io::Error) -> Self {
        StoreError::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    fn json(path: &Path, source: serde_json::Error) -> Self {
        StoreError::Json {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Reads and writes snapshot and metadata files in one cache directory
///
/// The default location is an XDG-compliant cache directory
/// (`~/.cache/flowcache/` on Linux).
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    /// Directory where cache files are stored
    cache_dir: PathBuf,
}

impl SnapshotStore {
    /// Creates a store in the XDG-compliant cache directory
    ///
    /// Returns `None` if the cache directory cannot be determined (e.g., no home directory).
    pub fn new() -> Option<Self> {
        let project_dirs = ProjectDirs::from("", "", "flowcache")?;
        let cache_dir = project_dirs.cache_dir().to_path_buf();
        Some(Self { cache_dir })
    }

    /// Creates a store with a custom cache directory
    pub fn with_dir(cache_dir: PathBuf) -> Self {
        Self { cache_dir }
    }

    pub fn dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Returns the path to the snapshot file for a collection
    pub fn snapshot_path(&self, collection: &str) -> PathBuf {
        self.cache_dir.join(format!("{}{}", collection, SNAPSHOT_SUFFIX))
    }

    fn metadata_path(&self) -> PathBuf {
        self.cache_dir.join(METADATA_FILE)
    }

    /// Ensures the cache directory exists
    fn ensure_dir(&self) -> Result<(), StoreError> {
        fs::create_dir_all(&self.cache_dir).map_err(|e| StoreError::io(&self.cache_dir, e))
    }

    /// Atomically replaces a collection's snapshot file
    pub fn write_snapshot(&self, snapshot: &CollectionSnapshot) -> Result<(), StoreError> {
        self.write_atomic(&self.snapshot_path(&snapshot.collection), snapshot)
    }

    /// Reads a collection's snapshot
    ///
    /// # Returns
    /// * `Ok(Some(snapshot))` if the file exists and parses
    /// * `Ok(None)` if the collection has never been written
    /// * `Err` if the file is unreadable or corrupt
    pub fn read_snapshot(
        &self,
        collection: &str,
    ) -> Result<Option<CollectionSnapshot>, StoreError> {
        self.read_json(&self.snapshot_path(collection))
    }

    /// Deletes a collection's snapshot; returns whether a file was removed
    pub fn remove_snapshot(&self, collection: &str) -> Result<bool, StoreError> {
        let path = self.snapshot_path(collection);
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StoreError::io(&path, e)),
        }
    }

    /// Deletes every snapshot file (and stray temp files), keeping the metadata file
    ///
    /// Returns the number of snapshots removed.
    pub fn remove_all_snapshots(&self) -> Result<usize, StoreError> {
        let entries = match fs::read_dir(&self.cache_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(StoreError::io(&self.cache_dir, e)),
        };

        let mut removed = 0;
        for entry in entries {
            let entry = entry.map_err(|e| StoreError::io(&self.cache_dir, e))?;
            let path = entry.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };

            let is_temp = name.ends_with(TEMP_SUFFIX);
            let is_snapshot = name.ends_with(SNAPSHOT_SUFFIX);
            if !is_temp && !is_snapshot {
                continue;
            }

            fs::remove_file(&path).map_err(|e| StoreError::io(&path, e))?;
            if is_snapshot {
                removed += 1;
            }
        }

        Ok(removed)
    }

    /// Loads cache metadata, defaulting to empty when the file does not exist
    pub fn load_metadata(&self) -> Result<CacheMetadata, StoreError> {
        Ok(self.read_json(&self.metadata_path())?.unwrap_or_default())
    }

    /// Atomically replaces the metadata file
    pub fn save_metadata(&self, metadata: &CacheMetadata) -> Result<(), StoreError> {
        self.write_atomic(&self.metadata_path(), metadata)
    }

    fn read_json<T: DeserializeOwned>(&self, path: &Path) -> Result<Option<T>, StoreError> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StoreError::io(path, e)),
        };

        serde_json::from_str(&content)
            .map(Some)
            .map_err(|e| StoreError::json(path, e))
    }

    /// Writes JSON to a sibling temp file, syncs it, then renames it over `path`
    fn write_atomic<T: Serialize>(&self, path: &Path, value: &T) -> Result<(), StoreError> {
        self.ensure_dir()?;

        let json = serde_json::to_vec_pretty(value).map_err(|e| StoreError::json(path, e))?;

        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("snapshot");
        let temp_path = path.with_file_name(format!(
            ".{}.{}.{}{}",
            file_name,
            std::process::id(),
            TEMP_COUNTER.fetch_add(1, Ordering::Relaxed),
            TEMP_SUFFIX
        ));

        let result = (|| {
            let mut file = File::create(&temp_path)?;
            file.write_all(&json)?;
            file.sync_all()?;
            fs::rename(&temp_path, path)
        })();

        if let Err(e) = result {
            let _ = fs::remove_file(&temp_path);
            return Err(StoreError::io(path, e));
        }

        Ok(())
    }
}
