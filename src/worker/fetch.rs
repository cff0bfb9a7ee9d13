//! Fetch intercept: cache first, then network, then the offline page.

use color_eyre::Result;
use reqwest::Method;
use tracing::{debug, warn};

use super::OfflineWorker;
use crate::cache::{CacheKey, CacheResult, CacheStorage, CachedEntry};
use crate::net::{Network, Request, Response};

/// What the worker does with an intercepted request.
#[derive(Debug, Clone)]
pub enum FetchDecision {
  /// Not handled; the request goes out unmodified
  Passthrough,
  /// Answer the request with this response
  Respond(CacheResult<Response>),
}

impl<S: CacheStorage, N: Network> OfflineWorker<S, N> {
  /// Handle one intercepted request.
  ///
  /// Same-origin GETs are answered from any cache namespace when present,
  /// with no freshness check. Otherwise the network is asked; 2xx responses
  /// are copied into the dynamic cache. If the network is unreachable, HTML
  /// requests get the cached offline page and everything else fails.
  ///
  /// An `Err` is a failed request with no response at all.
  pub async fn handle_fetch(&self, request: &Request) -> Result<FetchDecision> {
    if request.method != Method::GET {
      return Ok(FetchDecision::Passthrough);
    }
    if request.url.origin() != self.origin.origin() {
      debug!(url = %request.url, "Skipping cross-origin request");
      return Ok(FetchDecision::Passthrough);
    }

    if let Some(hit) = self.lookup(request) {
      debug!(url = %request.url, "Serving from cache");
      return Ok(FetchDecision::Respond(CacheResult::from_cache(
        hit.response,
        hit.cached_at,
      )));
    }

    match self.network.fetch(request).await {
      Ok(response) => {
        if response.ok() {
          self.store_dynamic(request, &response);
        } else {
          debug!(url = %request.url, status = response.status, "Not caching error response");
        }
        Ok(FetchDecision::Respond(CacheResult::from_network(response)))
      }
      Err(e) => {
        if !request.accepts_html() {
          return Err(e.wrap_err(format!("{} is unavailable offline", request.url)));
        }

        let fallback = Request::get(self.offline_page.clone());
        match self.lookup(&fallback) {
          Some(page) => {
            debug!(url = %request.url, "Network down, serving offline page");
            Ok(FetchDecision::Respond(CacheResult::offline(
              page.response,
              page.cached_at,
            )))
          }
          None => Err(e.wrap_err(format!(
            "{} is unavailable offline and {} is not cached",
            request.url, self.offline_page
          ))),
        }
      }
    }
  }

  /// Cache lookup across all namespaces. A storage error counts as a miss.
  fn lookup(&self, request: &Request) -> Option<CachedEntry> {
    match self.caches.match_any(request) {
      Ok(hit) => hit,
      Err(e) => {
        warn!("Cache lookup for {} failed: {:#}", request.description(), e);
        None
      }
    }
  }

  fn store_dynamic(&self, request: &Request, response: &Response) {
    let stored = self
      .caches
      .open(&self.dynamic_cache)
      .and_then(|cache| cache.put(request, response));

    if let Err(e) = stored {
      warn!("Failed to cache {}: {:#}", request.description(), e);
    }
  }
}
