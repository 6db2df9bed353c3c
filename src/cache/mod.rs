//! On-disk cache of CMS collection snapshots
//!
//! One JSON file per collection plus a shared metadata file recording when
//! each collection was last refreshed. All writes are atomic (temp file then
//! rename), so a crash or a concurrent reader never sees a partial snapshot.

mod metadata;
mod store;

pub use metadata::{CacheMetadata, CollectionMeta};
pub use store::{SnapshotStore, StoreError};
