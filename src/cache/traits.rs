//! Core traits and types for the caching system.

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

use crate::net::Request;

/// Stable identity of something stored in a cache namespace.
pub trait CacheKey {
  /// Fixed-length key used as the storage primary key.
  fn cache_hash(&self) -> String;

  /// Human-readable form for logs.
  fn description(&self) -> String;
}

impl CacheKey for Request {
  fn cache_hash(&self) -> String {
    // Method + URL identifies a request; bodies only matter for queued
    // submissions, where two different messages to one endpoint must not collide.
    let mut hasher = Sha256::new();
    hasher.update(self.method.as_str().as_bytes());
    hasher.update(b" ");
    hasher.update(self.url.as_str().as_bytes());
    if let Some(body) = &self.body {
      hasher.update(b"\n");
      hasher.update(body);
    }
    hex::encode(hasher.finalize())
  }

  fn description(&self) -> String {
    format!("{} {}", self.method, self.url)
  }
}

/// A response handed back by the worker, with metadata about where it came from.
#[derive(Debug, Clone)]
pub struct CacheResult<T> {
  /// The actual data
  pub data: T,
  /// Where the data came from
  pub source: CacheSource,
  /// When the data was cached (if from cache)
  pub cached_at: Option<DateTime<Utc>>,
}

impl<T> CacheResult<T> {
  /// Create a new cache result from fresh network data.
  pub fn from_network(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Network,
      cached_at: None,
    }
  }

  /// Create a new cache result from a cache hit.
  pub fn from_cache(data: T, cached_at: DateTime<Utc>) -> Self {
    Self {
      data,
      source: CacheSource::Cache,
      cached_at: Some(cached_at),
    }
  }

  /// Create a new cache result for the offline fallback page.
  pub fn offline(data: T, cached_at: DateTime<Utc>) -> Self {
    Self {
      data,
      source: CacheSource::OfflineFallback,
      cached_at: Some(cached_at),
    }
  }
}

/// Indicates where a served response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Fresh response from the network
  Network,
  /// Found in one of the cache namespaces
  Cache,
  /// Network unavailable, serving the cached offline page instead
  OfflineFallback,
}
