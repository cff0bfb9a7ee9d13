//! Install and activate handlers, and the state machine they move through.

use color_eyre::{
  eyre::{eyre, WrapErr},
  Result,
};
use futures::future::try_join_all;
use tracing::{debug, error, info, warn};

use super::OfflineWorker;
use crate::cache::CacheStorage;
use crate::net::{Network, Request};

/// Worker lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
  /// Script evaluated, nothing run yet
  Parsed,
  Installing,
  /// Installed and waiting to take over
  Installed,
  Activating,
  /// Controls clients and receives fetch/sync/push events
  Activated,
  /// Failed to install, or replaced by a newer version
  Redundant,
}

/// Outcome of a successful install.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallReport {
  pub cache: String,
  /// Number of manifest assets written
  pub cached: usize,
  /// The worker asked to activate without waiting for a reload
  pub skip_waiting: bool,
}

/// What the activation GC did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActivationReport {
  pub deleted: Vec<String>,
  /// Stale namespaces that could not be deleted; retried on the next version bump
  pub failed: Vec<String>,
}

impl<S: CacheStorage, N: Network> OfflineWorker<S, N> {
  pub fn state(&self) -> WorkerState {
    match self.state.lock() {
      Ok(state) => *state,
      Err(poisoned) => *poisoned.into_inner(),
    }
  }

  pub(crate) fn set_state(&self, to: WorkerState) {
    match self.state.lock() {
      Ok(mut state) => *state = to,
      Err(poisoned) => *poisoned.into_inner() = to,
    }
  }

  fn transition(&self, from: WorkerState, to: WorkerState) -> Result<()> {
    let mut state = self
      .state
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    if *state != from {
      return Err(eyre!(
        "Worker {} cannot move from {:?} to {:?}",
        self.version,
        *state,
        to
      ));
    }
    *state = to;
    Ok(())
  }

  /// Seed the static cache with every manifest asset.
  ///
  /// Fails closed: if any asset cannot be fetched (or comes back non-2xx)
  /// nothing is written and the worker becomes redundant, leaving the
  /// previous version in control.
  pub async fn install(&self) -> Result<InstallReport> {
    self.transition(WorkerState::Parsed, WorkerState::Installing)?;
    info!(
      version = %self.version,
      cache = %self.static_cache,
      assets = self.manifest.len(),
      "Installing worker"
    );

    match self.seed_static_cache().await {
      Ok(cached) => {
        self.set_state(WorkerState::Installed);
        info!(version = %self.version, cached, "Worker installed");
        Ok(InstallReport {
          cache: self.static_cache.clone(),
          cached,
          skip_waiting: self.skip_waiting,
        })
      }
      Err(e) => {
        self.set_state(WorkerState::Redundant);
        error!(version = %self.version, "Install failed: {:#}", e);
        Err(e)
      }
    }
  }

  async fn seed_static_cache(&self) -> Result<usize> {
    let fetches = self.manifest.iter().map(|url| async move {
      let request = Request::get(url.clone());
      let response = self
        .network
        .fetch(&request)
        .await
        .wrap_err_with(|| format!("Failed to fetch manifest asset {}", url))?;

      if !response.ok() {
        return Err(eyre!(
          "Manifest asset {} returned {} {}",
          url,
          response.status,
          response.status_text
        ));
      }
      debug!(url = %url, bytes = response.body.len(), "Fetched manifest asset");
      Ok((request, response))
    });

    let entries = try_join_all(fetches).await?;
    // The namespace only appears once the whole batch commits
    self.caches.put_all(&self.static_cache, &entries)?;

    Ok(entries.len())
  }

  /// Take over from the previous version: purge stale caches, then mark
  /// the worker active. Clients are claimed by the registration.
  pub fn activate(&self) -> Result<ActivationReport> {
    self.transition(WorkerState::Installed, WorkerState::Activating)?;
    info!(version = %self.version, "Activating worker");

    let report = self.collect_stale_caches();

    self.set_state(WorkerState::Activated);
    info!(
      version = %self.version,
      deleted = report.deleted.len(),
      "Worker activated"
    );
    Ok(report)
  }

  /// Delete every namespace that is not one of this version's caches.
  ///
  /// Never fails: a namespace that cannot be deleted is logged and reported,
  /// and the rest are still attempted. Running it again deletes nothing new.
  pub fn collect_stale_caches(&self) -> ActivationReport {
    let mut report = ActivationReport::default();

    let names = match self.caches.keys() {
      Ok(names) => names,
      Err(e) => {
        warn!("Failed to enumerate caches: {:#}", e);
        return report;
      }
    };

    for name in names.into_iter().filter(|name| !self.is_current(name)) {
      match self.caches.delete(&name) {
        Ok(_) => {
          info!(cache = %name, "Deleted old cache");
          report.deleted.push(name);
        }
        Err(e) => {
          warn!(cache = %name, "Failed to delete old cache: {:#}", e);
          report.failed.push(name);
        }
      }
    }

    report
  }

  /// Mark the worker as replaced.
  pub fn retire(&self) {
    self.set_state(WorkerState::Redundant);
  }
}

#[cfg(test)]
mod tests {
  use std::sync::Arc;

  use super::super::testing::*;
  use super::*;
  use crate::cache::{CacheLayer, CachedEntry, SqliteStorage};
  use crate::net::testing::ScriptedNetwork;
  use crate::net::Response;

  #[tokio::test]
  async fn test_install_seeds_every_manifest_asset() {
    let caches = caches();
    let network = Arc::new(ScriptedNetwork::new());
    serve_manifest(&network, &config("v1"));
    let w = worker("v1", &caches, &network);

    let report = w.install().await.unwrap();

    assert_eq!(report.cache, "static-v1");
    assert_eq!(report.cached, 12);
    assert!(report.skip_waiting);
    assert_eq!(w.state(), WorkerState::Installed);

    let cache = caches.open("static-v1").unwrap();
    assert_eq!(cache.len().unwrap(), 12);
    let css = Request::get(url("/style.css").parse().unwrap());
    assert_eq!(
      cache.match_request(&css).unwrap().unwrap().response.text(),
      "asset /style.css"
    );
  }

  #[tokio::test]
  async fn test_install_fails_closed_on_network_error() {
    let caches = caches();
    let network = Arc::new(ScriptedNetwork::new());
    serve_manifest(&network, &config("v1"));
    network.offline(&url("/javascript.html"));
    let w = worker("v1", &caches, &network);

    assert!(w.install().await.is_err());
    assert_eq!(w.state(), WorkerState::Redundant);
    assert!(!caches.has("static-v1").unwrap());
  }

  #[tokio::test]
  async fn test_install_fails_closed_on_error_status() {
    let caches = caches();
    let network = Arc::new(ScriptedNetwork::new());
    serve_manifest(&network, &config("v1"));
    network.route(&url("/about.html"), Response::new(404, "missing"));
    let w = worker("v1", &caches, &network);

    assert!(w.install().await.is_err());
    assert!(caches.keys().unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_install_twice_is_rejected() {
    let caches = caches();
    let network = Arc::new(ScriptedNetwork::new());
    serve_manifest(&network, &config("v1"));
    let w = worker("v1", &caches, &network);

    w.install().await.unwrap();
    assert!(w.install().await.is_err());
    assert_eq!(w.state(), WorkerState::Installed);
  }

  #[test]
  fn test_activate_requires_install() {
    let caches = caches();
    let network = Arc::new(ScriptedNetwork::new());
    let w = worker("v1", &caches, &network);

    assert!(w.activate().is_err());
    assert_eq!(w.state(), WorkerState::Parsed);
  }

  #[tokio::test]
  async fn test_activate_keeps_exactly_current_generation() {
    let caches = caches();
    for name in ["static-v1", "web-training-v1", "static-v2", "web-training-v2"] {
      caches.open(name).unwrap();
    }
    let network = Arc::new(ScriptedNetwork::new());
    serve_manifest(&network, &config("v2"));
    let w = worker("v2", &caches, &network);

    w.install().await.unwrap();
    let report = w.activate().unwrap();

    assert_eq!(report.deleted, vec!["static-v1", "web-training-v1"]);
    assert!(report.failed.is_empty());
    assert_eq!(caches.keys().unwrap(), vec!["static-v2", "web-training-v2"]);
    assert_eq!(w.state(), WorkerState::Activated);
  }

  #[test]
  fn test_collect_stale_caches_is_idempotent() {
    let caches = caches();
    for name in ["static-v1", "web-training-v1", "static-v2", "web-training-v2"] {
      caches.open(name).unwrap();
    }
    let network = Arc::new(ScriptedNetwork::new());
    let w = worker("v2", &caches, &network);

    assert_eq!(w.collect_stale_caches().deleted.len(), 2);
    assert_eq!(w.collect_stale_caches(), ActivationReport::default());
    assert_eq!(caches.keys().unwrap(), vec!["static-v2", "web-training-v2"]);
  }

  #[test]
  fn test_collect_stale_caches_purges_submission_queue() {
    let caches = caches();
    for name in [
      "static-v1",
      "web-training-v1",
      "static-v2",
      "web-training-v2",
      "contact-form-cache",
    ] {
      caches.open(name).unwrap();
    }
    let network = Arc::new(ScriptedNetwork::new());
    let w = worker("v2", &caches, &network);

    let report = w.collect_stale_caches();

    assert_eq!(
      report.deleted,
      vec!["static-v1", "web-training-v1", "contact-form-cache"]
    );
    assert_eq!(caches.keys().unwrap(), vec!["static-v2", "web-training-v2"]);
  }

  /// SQLite store whose namespace deletes fail for one name.
  struct StuckNamespace {
    inner: SqliteStorage,
    stuck: &'static str,
  }

  impl CacheStorage for StuckNamespace {
    fn create_namespace(&self, name: &str) -> Result<()> {
      self.inner.create_namespace(name)
    }

    fn has_namespace(&self, name: &str) -> Result<bool> {
      self.inner.has_namespace(name)
    }

    fn namespaces(&self) -> Result<Vec<String>> {
      self.inner.namespaces()
    }

    fn delete_namespace(&self, name: &str) -> Result<bool> {
      if name == self.stuck {
        return Err(eyre!("database is locked"));
      }
      self.inner.delete_namespace(name)
    }

    fn put(&self, namespace: &str, request: &Request, response: &Response) -> Result<()> {
      self.inner.put(namespace, request, response)
    }

    fn put_all(&self, namespace: &str, entries: &[(Request, Response)]) -> Result<()> {
      self.inner.put_all(namespace, entries)
    }

    fn get(&self, namespace: &str, request: &Request) -> Result<Option<CachedEntry>> {
      self.inner.get(namespace, request)
    }

    fn get_any(&self, request: &Request) -> Result<Option<CachedEntry>> {
      self.inner.get_any(request)
    }

    fn entries(&self, namespace: &str) -> Result<Vec<CachedEntry>> {
      self.inner.entries(namespace)
    }

    fn delete(&self, namespace: &str, request: &Request) -> Result<bool> {
      self.inner.delete(namespace, request)
    }

    fn count(&self, namespace: &str) -> Result<usize> {
      self.inner.count(namespace)
    }
  }

  #[tokio::test]
  async fn test_activate_proceeds_past_failed_delete() {
    let caches = CacheLayer::new(StuckNamespace {
      inner: SqliteStorage::open_in_memory().unwrap(),
      stuck: "web-training-v1",
    });
    for name in ["static-v1", "web-training-v1", "static-v0"] {
      caches.open(name).unwrap();
    }
    let network = Arc::new(ScriptedNetwork::new());
    serve_manifest(&network, &config("v2"));
    let w = OfflineWorker::new(&config("v2"), caches.clone(), Arc::clone(&network)).unwrap();

    w.install().await.unwrap();
    let report = w.activate().unwrap();

    assert_eq!(report.deleted, vec!["static-v1", "static-v0"]);
    assert_eq!(report.failed, vec!["web-training-v1"]);
    assert_eq!(w.state(), WorkerState::Activated);
    assert_eq!(caches.keys().unwrap(), vec!["web-training-v1", "static-v2"]);
  }
}
