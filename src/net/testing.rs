//! In-process network double for worker tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use color_eyre::{eyre::eyre, Result};

use super::client::Network;
use super::types::{Request, Response};

/// Serves scripted responses by URL. Unscripted URLs behave as if offline.
#[derive(Default)]
pub struct ScriptedNetwork {
  routes: Mutex<HashMap<String, Option<Response>>>,
  calls: AtomicUsize,
  sent: Mutex<Vec<Request>>,
}

impl ScriptedNetwork {
  pub fn new() -> Self {
    Self::default()
  }

  /// Respond to `url` with `response`.
  pub fn route(&self, url: &str, response: Response) {
    self
      .routes
      .lock()
      .unwrap()
      .insert(url.to_string(), Some(response));
  }

  /// Fail every request to `url` as a network error.
  pub fn offline(&self, url: &str) {
    self.routes.lock().unwrap().insert(url.to_string(), None);
  }

  pub fn calls(&self) -> usize {
    self.calls.load(Ordering::SeqCst)
  }

  pub fn sent(&self) -> Vec<Request> {
    self.sent.lock().unwrap().clone()
  }
}

impl Network for ScriptedNetwork {
  async fn fetch(&self, request: &Request) -> Result<Response> {
    self.calls.fetch_add(1, Ordering::SeqCst);
    self.sent.lock().unwrap().push(request.clone());

    let route = self
      .routes
      .lock()
      .unwrap()
      .get(request.url.as_str())
      .cloned()
      .flatten();

    route.ok_or_else(|| eyre!("network unreachable: {}", request.url))
  }
}
