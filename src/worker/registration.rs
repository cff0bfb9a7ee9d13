//! Page-side registration: which worker version controls which client.

use color_eyre::{eyre::eyre, Result};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};
use url::Url;

use super::{ActivationReport, FetchDecision, OfflineWorker};
use crate::cache::{CacheResult, CacheStorage};
use crate::config::SCRIPT_PATH;
use crate::net::{Network, Request, Response};

/// Signals surfaced to page code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistrationEvent {
  /// A new worker version started installing
  UpdateFound { version: String },
  /// A new version is installed while an older one controls the page;
  /// show the "update available" prompt, whose action is `apply_update`
  UpdateAvailable { version: String },
  /// Clients are now controlled by this version
  ControllerChange { version: String },
  InstallFailed { version: String, reason: String },
}

/// An open page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ClientId(u64);

/// The worker registration for one scope.
pub struct Registration<S: CacheStorage, N: Network> {
  script_url: Url,
  network: Arc<N>,
  waiting: Option<Arc<OfflineWorker<S, N>>>,
  active: Option<Arc<OfflineWorker<S, N>>>,
  /// Client -> whether the active worker controls it
  clients: BTreeMap<ClientId, bool>,
  next_client: u64,
  events: mpsc::UnboundedSender<RegistrationEvent>,
}

impl<S: CacheStorage, N: Network> Registration<S, N> {
  /// Create a registration for the worker script at the root of `origin`.
  pub fn new(
    origin: &Url,
    network: Arc<N>,
  ) -> Result<(Self, mpsc::UnboundedReceiver<RegistrationEvent>)> {
    let script_url = origin
      .join(SCRIPT_PATH)
      .map_err(|e| eyre!("Invalid worker script URL: {}", e))?;
    let (tx, rx) = mpsc::unbounded_channel();

    Ok((
      Self {
        script_url,
        network,
        waiting: None,
        active: None,
        clients: BTreeMap::new(),
        next_client: 0,
        events: tx,
      },
      rx,
    ))
  }

  pub fn script_url(&self) -> &Url {
    &self.script_url
  }

  pub fn active(&self) -> Option<&Arc<OfflineWorker<S, N>>> {
    self.active.as_ref()
  }

  pub fn waiting(&self) -> Option<&Arc<OfflineWorker<S, N>>> {
    self.waiting.as_ref()
  }

  /// Open a page. Pages opened under an active worker are controlled by it.
  pub fn open_client(&mut self) -> ClientId {
    let id = ClientId(self.next_client);
    self.next_client += 1;
    self.clients.insert(id, self.active.is_some());
    id
  }

  pub fn close_client(&mut self, id: ClientId) {
    self.clients.remove(&id);
  }

  pub fn is_controlled(&self, id: ClientId) -> bool {
    self.clients.get(&id).copied().unwrap_or(false)
  }

  fn emit(&self, event: RegistrationEvent) {
    // Nobody listening is fine
    let _ = self.events.send(event);
  }

  /// Install a new worker version and, if it asks to skip waiting, activate it.
  ///
  /// On install failure the new version is discarded and whatever was active
  /// stays in control.
  pub async fn register(&mut self, worker: OfflineWorker<S, N>) -> Result<()> {
    let worker = Arc::new(worker);
    let version = worker.version().to_string();
    info!(script = %self.script_url, version = %version, "Registering worker");
    self.emit(RegistrationEvent::UpdateFound {
      version: version.clone(),
    });

    let report = match worker.install().await {
      Ok(report) => report,
      Err(e) => {
        self.emit(RegistrationEvent::InstallFailed {
          version,
          reason: format!("{:#}", e),
        });
        return Err(e);
      }
    };

    if self.active.is_some() && self.clients.values().any(|controlled| *controlled) {
      self.emit(RegistrationEvent::UpdateAvailable {
        version: version.clone(),
      });
    }

    if let Some(previous) = self.waiting.replace(worker) {
      previous.retire();
    }

    if report.skip_waiting {
      self.apply_update()?;
    }
    Ok(())
  }

  /// Hand control to the waiting worker, if any: activate it, retire the old
  /// one and claim every open client. This is what the page's reload action does.
  pub fn apply_update(&mut self) -> Result<Option<ActivationReport>> {
    let Some(worker) = self.waiting.take() else {
      return Ok(None);
    };

    let report = match worker.activate() {
      Ok(report) => report,
      Err(e) => {
        warn!(version = %worker.version(), "Activation failed: {:#}", e);
        worker.retire();
        return Err(e);
      }
    };

    if let Some(previous) = self.active.replace(Arc::clone(&worker)) {
      previous.retire();
    }
    for controlled in self.clients.values_mut() {
      *controlled = true;
    }
    self.emit(RegistrationEvent::ControllerChange {
      version: worker.version().to_string(),
    });

    Ok(Some(report))
  }

  /// Issue a request from a page.
  ///
  /// Controlled pages go through the active worker; everything else, and
  /// anything the worker passes through, goes straight to the network.
  pub async fn fetch(&self, client: ClientId, request: &Request) -> Result<CacheResult<Response>> {
    if let Some(worker) = self.active.as_ref().filter(|_| self.is_controlled(client)) {
      if let FetchDecision::Respond(result) = worker.handle_fetch(request).await? {
        return Ok(result);
      }
    }

    let response = self.network.fetch(request).await?;
    Ok(CacheResult::from_network(response))
  }
}
