//! Deferred contact form submissions, retried on background sync.

use color_eyre::Result;
use reqwest::Method;
use std::fmt;
use tracing::{debug, info, warn};
use url::form_urlencoded;

use super::OfflineWorker;
use crate::cache::{CacheKey, CacheStorage};
use crate::net::{Network, Request, Response};

/// A message from the site's contact form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContactSubmission {
  pub name: String,
  pub email: String,
  pub message: String,
}

/// Why a submission was refused before queueing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidSubmission {
  MissingFields,
  InvalidEmail,
}

impl fmt::Display for InvalidSubmission {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::MissingFields => write!(f, "Please fill in all required fields."),
      Self::InvalidEmail => write!(f, "Please enter a valid email address."),
    }
  }
}

impl std::error::Error for InvalidSubmission {}

impl ContactSubmission {
  pub fn validate(&self) -> std::result::Result<(), InvalidSubmission> {
    if [&self.name, &self.email, &self.message]
      .iter()
      .any(|field| field.trim().is_empty())
    {
      return Err(InvalidSubmission::MissingFields);
    }
    if !looks_like_email(&self.email) {
      return Err(InvalidSubmission::InvalidEmail);
    }
    Ok(())
  }

  fn form_body(&self) -> String {
    form_urlencoded::Serializer::new(String::new())
      .append_pair("name", &self.name)
      .append_pair("email", &self.email)
      .append_pair("message", &self.message)
      .finish()
  }
}

/// `local@domain.tld`: no whitespace, exactly one `@`, and a dot inside the domain.
fn looks_like_email(email: &str) -> bool {
  if email.chars().any(char::is_whitespace) {
    return false;
  }
  let Some((local, domain)) = email.split_once('@') else {
    return false;
  };
  if local.is_empty() || domain.contains('@') {
    return false;
  }
  domain
    .char_indices()
    .any(|(i, c)| c == '.' && i > 0 && i + 1 < domain.len())
}

/// Result of draining the submission queue.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
  /// Delivered and removed from the queue
  pub sent: Vec<Request>,
  /// Still queued for the next sync
  pub retained: Vec<Request>,
}

impl<S: CacheStorage, N: Network> OfflineWorker<S, N> {
  /// Queue a validated submission for delivery on the next sync.
  pub fn queue_submission(&self, submission: &ContactSubmission) -> Result<Request> {
    submission.validate()?;

    let request = Request::new(Method::POST, self.sync_endpoint.clone())
      .with_header("Content-Type", "application/x-www-form-urlencoded")
      .with_body(submission.form_body());

    // The queue only needs the request; the stored response is a placeholder
    let placeholder = Response::new(202, Vec::new());
    self
      .caches
      .open(&self.sync.queue)?
      .put(&request, &placeholder)?;

    info!(queue = %self.sync.queue, "Queued contact form submission");
    Ok(request)
  }

  /// Handle a background-sync trigger.
  ///
  /// Returns `None` for tags this worker does not own. Never fails: entries
  /// that cannot be delivered stay queued for the next trigger.
  pub async fn handle_sync(&self, tag: &str) -> Option<SyncReport> {
    if tag != self.sync.tag {
      debug!(tag, "Ignoring sync tag");
      return None;
    }

    match self.drain_queue().await {
      Ok(report) => Some(report),
      Err(e) => {
        warn!("Background sync failed: {:#}", e);
        Some(SyncReport::default())
      }
    }
  }

  async fn drain_queue(&self) -> Result<SyncReport> {
    let queue = self.caches.open(&self.sync.queue)?;
    let mut report = SyncReport::default();

    for request in queue.keys()? {
      match self.network.fetch(&request).await {
        // A 4xx is a definitive answer; resending it would never succeed
        Ok(response) if response.status < 500 => {
          if let Err(e) = queue.delete(&request) {
            warn!(
              "Delivered {} but could not dequeue it: {:#}",
              request.description(),
              e
            );
          }
          info!(status = response.status, "Synced contact form submission");
          report.sent.push(request);
        }
        Ok(response) => {
          warn!(
            status = response.status,
            "Failed to sync contact form submission"
          );
          report.retained.push(request);
        }
        Err(e) => {
          warn!("Failed to sync contact form submission: {:#}", e);
          report.retained.push(request);
        }
      }
    }

    Ok(report)
  }
}

#[cfg(test)]
mod tests {
  use std::sync::Arc;

  use super::super::testing::*;
  use super::*;
  use crate::net::testing::ScriptedNetwork;
  use url::Url;

  fn submission(name: &str) -> ContactSubmission {
    ContactSubmission {
      name: name.to_string(),
      email: format!("{}@example.com", name.to_lowercase()),
      message: "Loved the CSS tutorial".to_string(),
    }
  }

  fn queued(body: &str) -> Request {
    Request::new(Method::POST, Url::parse(&url("/api/contact")).unwrap()).with_body(body)
  }

  #[test]
  fn test_validate_required_fields() {
    let mut s = submission("Ada");
    assert_eq!(s.validate(), Ok(()));

    s.message = "   ".to_string();
    assert_eq!(s.validate(), Err(InvalidSubmission::MissingFields));
  }

  #[test]
  fn test_email_shapes() {
    assert!(looks_like_email("ada@example.com"));
    assert!(looks_like_email("a.b@mail.example.org"));
    assert!(!looks_like_email("ada@example"));
    assert!(!looks_like_email("ada@.com"));
    assert!(!looks_like_email("ada@example."));
    assert!(!looks_like_email("@example.com"));
    assert!(!looks_like_email("ada@@example.com"));
    assert!(!looks_like_email("ada lovelace@example.com"));
  }

  #[test]
  fn test_queue_submission_stores_form_post() {
    let caches = caches();
    let network = Arc::new(ScriptedNetwork::new());
    let w = worker("v1", &caches, &network);

    let request = w.queue_submission(&submission("Ada")).unwrap();

    assert_eq!(request.method, Method::POST);
    assert_eq!(request.url.as_str(), "https://tutorial.test/api/contact");
    assert_eq!(
      request.body.as_deref(),
      Some(&b"name=Ada&email=ada%40example.com&message=Loved+the+CSS+tutorial"[..])
    );
    assert_eq!(
      caches.open("contact-form-cache").unwrap().keys().unwrap(),
      vec![request]
    );
  }

  #[test]
  fn test_queue_submission_rejects_invalid() {
    let caches = caches();
    let network = Arc::new(ScriptedNetwork::new());
    let w = worker("v1", &caches, &network);

    let mut bad = submission("Ada");
    bad.email = "not-an-email".to_string();

    assert!(w.queue_submission(&bad).is_err());
    assert!(!caches.has("contact-form-cache").unwrap());
  }

  #[tokio::test]
  async fn test_sync_drains_queue_when_all_succeed() {
    let caches = caches();
    let network = Arc::new(ScriptedNetwork::new());
    network.route(&url("/api/contact"), Response::new(200, "thanks"));
    let w = worker("v1", &caches, &network);
    for name in ["Ada", "Grace", "Linus"] {
      w.queue_submission(&submission(name)).unwrap();
    }

    let report = w.handle_sync("contact-form-sync").await.unwrap();

    assert_eq!(report.sent.len(), 3);
    assert!(report.retained.is_empty());
    assert_eq!(caches.open("contact-form-cache").unwrap().len().unwrap(), 0);
    assert_eq!(network.calls(), 3);

    let resent = network.sent();
    assert!(resent.iter().all(|r| r.method == Method::POST));
    assert_eq!(
      resent[0].headers.get("content-type"),
      Some("application/x-www-form-urlencoded")
    );
    assert_eq!(
      resent[0].body.as_deref(),
      Some(&b"name=Ada&email=ada%40example.com&message=Loved+the+CSS+tutorial"[..])
    );
  }

  #[tokio::test]
  async fn test_sync_keeps_exactly_failed_subset() {
    let caches = caches();
    let network = Arc::new(ScriptedNetwork::new());
    network.route(&url("/api/contact"), Response::new(200, "thanks"));
    network.offline(&url("/api/other"));
    let w = worker("v1", &caches, &network);

    let queue = caches.open("contact-form-cache").unwrap();
    let ok_a = queued("a=1");
    let failing = Request::new(Method::POST, Url::parse(&url("/api/other")).unwrap());
    let ok_b = queued("b=2");
    for request in [&ok_a, &failing, &ok_b] {
      queue.put(request, &Response::new(202, "")).unwrap();
    }

    let report = w.handle_sync("contact-form-sync").await.unwrap();

    assert_eq!(report.sent, vec![ok_a, ok_b]);
    assert_eq!(report.retained, vec![failing.clone()]);
    assert_eq!(queue.keys().unwrap(), vec![failing]);
  }

  #[tokio::test]
  async fn test_sync_retains_on_server_error() {
    let caches = caches();
    let network = Arc::new(ScriptedNetwork::new());
    network.route(&url("/api/contact"), Response::new(503, "busy"));
    let w = worker("v1", &caches, &network);
    w.queue_submission(&submission("Ada")).unwrap();

    let report = w.handle_sync("contact-form-sync").await.unwrap();

    assert!(report.sent.is_empty());
    assert_eq!(report.retained.len(), 1);
    assert_eq!(caches.open("contact-form-cache").unwrap().len().unwrap(), 1);
  }

  #[tokio::test]
  async fn test_sync_ignores_other_tags() {
    let caches = caches();
    let network = Arc::new(ScriptedNetwork::new());
    let w = worker("v1", &caches, &network);
    w.queue_submission(&submission("Ada")).unwrap();

    assert!(w.handle_sync("newsletter-sync").await.is_none());
    assert_eq!(network.calls(), 0);
    assert_eq!(caches.open("contact-form-cache").unwrap().len().unwrap(), 1);
  }

  #[tokio::test]
  async fn test_sync_with_empty_queue() {
    let caches = caches();
    let network = Arc::new(ScriptedNetwork::new());
    let w = worker("v1", &caches, &network);

    assert_eq!(
      w.handle_sync("contact-form-sync").await,
      Some(SyncReport::default())
    );
  }
}
