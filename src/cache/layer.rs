//! Namespace-level view over a cache storage backend.

use color_eyre::Result;
use std::sync::Arc;

use super::storage::{CacheStorage, CachedEntry};
use crate::net::{Request, Response};

/// Entry point to every cache namespace in a store.
///
/// Cheap to clone; clones share the same storage.
pub struct CacheLayer<S: CacheStorage> {
  storage: Arc<S>,
}

impl<S: CacheStorage> CacheLayer<S> {
  /// Create a new cache layer with the given storage backend.
  pub fn new(storage: S) -> Self {
    Self {
      storage: Arc::new(storage),
    }
  }

  /// Open a namespace, creating it if needed.
  pub fn open(&self, name: &str) -> Result<Cache<S>> {
    self.storage.create_namespace(name)?;
    Ok(Cache {
      storage: Arc::clone(&self.storage),
      name: name.to_string(),
    })
  }

  /// Names of all namespaces, oldest first.
  pub fn keys(&self) -> Result<Vec<String>> {
    self.storage.namespaces()
  }

  pub fn has(&self, name: &str) -> Result<bool> {
    self.storage.has_namespace(name)
  }

  /// Delete a whole namespace.
  pub fn delete(&self, name: &str) -> Result<bool> {
    self.storage.delete_namespace(name)
  }

  /// Create `name` and write a batch into it in one transaction. Nothing is
  /// left behind, not even the empty namespace, if the write fails.
  pub fn put_all(&self, name: &str, entries: &[(Request, Response)]) -> Result<()> {
    self.storage.put_all(name, entries)
  }

  /// Look a request up in any namespace.
  pub fn match_any(&self, request: &Request) -> Result<Option<CachedEntry>> {
    self.storage.get_any(request)
  }
}

impl<S: CacheStorage> Clone for CacheLayer<S> {
  fn clone(&self) -> Self {
    Self {
      storage: Arc::clone(&self.storage),
    }
  }
}

/// Handle to one open namespace.
pub struct Cache<S: CacheStorage> {
  storage: Arc<S>,
  name: String,
}

impl<S: CacheStorage> Cache<S> {
  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn put(&self, request: &Request, response: &Response) -> Result<()> {
    self.storage.put(&self.name, request, response)
  }

  /// Store a batch atomically.
  pub fn put_all(&self, entries: &[(Request, Response)]) -> Result<()> {
    self.storage.put_all(&self.name, entries)
  }

  pub fn match_request(&self, request: &Request) -> Result<Option<CachedEntry>> {
    self.storage.get(&self.name, request)
  }

  /// Stored requests in write order.
  pub fn keys(&self) -> Result<Vec<Request>> {
    Ok(
      self
        .storage
        .entries(&self.name)?
        .into_iter()
        .map(|entry| entry.request)
        .collect(),
    )
  }

  pub fn delete(&self, request: &Request) -> Result<bool> {
    self.storage.delete(&self.name, request)
  }

  pub fn len(&self) -> Result<usize> {
    self.storage.count(&self.name)
  }
}
