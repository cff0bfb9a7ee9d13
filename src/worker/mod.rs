//! The offline caching worker.
//!
//! One method per lifecycle event. Each handler runs to completion before the
//! caller proceeds, which is how "wait until this work is done" is expressed:
//! - `install` seeds the static cache from the manifest
//! - `activate` purges stale cache generations
//! - `handle_fetch` serves cache-first with network fallback
//! - `handle_sync` drains the deferred contact form queue
//! - `handle_push` / `handle_notification_click` are the notification pass-through
//!
//! [`Registration`] is the page-side view that drives these handlers.

mod fetch;
mod lifecycle;
mod push;
mod registration;
mod sync;

use color_eyre::{eyre::eyre, Result};
use std::sync::{Arc, Mutex};
use url::Url;

use crate::cache::{CacheLayer, CacheStorage};
use crate::config::{Config, NotificationConfig, SyncConfig};
use crate::net::Network;

pub use fetch::FetchDecision;
pub use lifecycle::{ActivationReport, InstallReport, WorkerState};
pub use push::{LogNotifier, Notification, NotificationData, Notifier, PushPayload, WindowOpener};
pub use registration::{ClientId, Registration, RegistrationEvent};
pub use sync::{ContactSubmission, InvalidSubmission, SyncReport};

/// A single worker version bound to one pair of cache names.
pub struct OfflineWorker<S: CacheStorage, N: Network> {
  caches: CacheLayer<S>,
  network: Arc<N>,
  version: String,
  origin: Url,
  static_cache: String,
  dynamic_cache: String,
  manifest: Vec<Url>,
  offline_page: Url,
  skip_waiting: bool,
  sync: SyncConfig,
  sync_endpoint: Url,
  notifications: NotificationConfig,
  notification_url: Url,
  state: Mutex<WorkerState>,
}

impl<S: CacheStorage, N: Network> OfflineWorker<S, N> {
  /// Create a freshly parsed worker that still has to be installed.
  pub fn new(config: &Config, caches: CacheLayer<S>, network: Arc<N>) -> Result<Self> {
    let manifest = config
      .manifest
      .iter()
      .map(|path| config.resolve(path))
      .collect::<Result<Vec<_>>>()?;

    Ok(Self {
      caches,
      network,
      version: config.cache_version.clone(),
      origin: config.origin_url()?,
      static_cache: config.static_cache_name(),
      dynamic_cache: config.dynamic_cache_name(),
      manifest,
      offline_page: config.resolve(&config.offline_page)?,
      skip_waiting: config.skip_waiting,
      sync: config.sync.clone(),
      sync_endpoint: config.resolve(&config.sync.endpoint)?,
      notifications: config.notifications.clone(),
      notification_url: config.resolve(&config.notifications.open_url)?,
      state: Mutex::new(WorkerState::Parsed),
    })
  }

  /// Bring back a worker that was activated in an earlier process.
  ///
  /// The cache store is the only state that outlives a worker process. A
  /// static cache with committed entries is what marks this version as
  /// installed; install only creates it once every asset is written.
  pub fn resume(config: &Config, caches: CacheLayer<S>, network: Arc<N>) -> Result<Self> {
    let worker = Self::new(config, caches, network)?;
    let installed = worker.caches.has(&worker.static_cache)?
      && worker.caches.open(&worker.static_cache)?.len()? > 0;
    if !installed {
      return Err(eyre!(
        "Worker {} is not installed (no cache named {})",
        worker.version,
        worker.static_cache
      ));
    }
    worker.set_state(WorkerState::Activated);
    Ok(worker)
  }

  pub fn version(&self) -> &str {
    &self.version
  }

  pub fn static_cache(&self) -> &str {
    &self.static_cache
  }

  pub fn dynamic_cache(&self) -> &str {
    &self.dynamic_cache
  }

  pub fn caches(&self) -> &CacheLayer<S> {
    &self.caches
  }

  /// Whether a namespace belongs to this worker version and survives activation.
  fn is_current(&self, name: &str) -> bool {
    name == self.static_cache || name == self.dynamic_cache
  }
}
