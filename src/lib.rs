//! flowcache library
//!
//! Keeps a local, always-readable cache of Webflow CMS collections. The
//! binary in `main.rs` is a thin operator front end over these modules.

pub mod cache;
pub mod cli;
pub mod config;
pub mod data;
pub mod manager;
pub mod refresh;
pub mod retry;

pub use manager::{CacheManager, CacheSettings, CollectionState, RefreshOutcome};
