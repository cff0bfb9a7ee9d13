//! Persistent, namespaced request → response storage.
//!
//! This module provides the cache storage the worker runs on:
//! - Named namespaces, created on first open/write and deleted only explicitly
//! - Entries keyed by request identity (method + URL, plus body when present)
//! - Lookup in one namespace or across all of them, oldest namespace first
//! - SQLite persistence, so namespaces outlive a single worker invocation

mod layer;
mod storage;
mod traits;

pub use layer::{Cache, CacheLayer};
pub use storage::{CacheStorage, CachedEntry, SqliteStorage};
pub use traits::{CacheKey, CacheResult, CacheSource};
