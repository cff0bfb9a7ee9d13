//! Request and response values exchanged between pages, the worker and the network.

use reqwest::Method;
use serde::{Deserialize, Serialize};
use url::Url;

/// Ordered header list. Names compare case-insensitively.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Headers(Vec<(String, String)>);

impl Headers {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
    self.0.push((name.into(), value.into()));
  }

  /// First value for `name`, if any.
  pub fn get<'a>(&'a self, name: &'a str) -> Option<&'a str> {
    self.get_all(name).next()
  }

  /// Every value for `name`, in insertion order.
  pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
    self
      .0
      .iter()
      .filter(move |(n, _)| n.eq_ignore_ascii_case(name))
      .map(|(_, v)| v.as_str())
  }

  pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
    self.0.iter().map(|(n, v)| (n.as_str(), v.as_str()))
  }
}

/// An outgoing request as seen by the fetch intercept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
  pub method: Method,
  pub url: Url,
  pub headers: Headers,
  pub body: Option<Vec<u8>>,
}

impl Request {
  pub fn new(method: Method, url: Url) -> Self {
    Self {
      method,
      url,
      headers: Headers::new(),
      body: None,
    }
  }

  pub fn get(url: Url) -> Self {
    Self::new(Method::GET, url)
  }

  pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
    self.headers.append(name, value);
    self
  }

  pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
    self.body = Some(body.into());
    self
  }

  /// Whether the `Accept` header lists `text/html` with a non-zero quality.
  ///
  /// All header lines and all comma-separated media ranges are considered, so
  /// `application/json, text/html;q=0.8` accepts HTML. A request without an
  /// `Accept` header does not.
  pub fn accepts_html(&self) -> bool {
    self
      .headers
      .get_all("accept")
      .flat_map(|value| value.split(','))
      .any(|range| {
        let mut parts = range.split(';');
        let media = parts.next().unwrap_or_default().trim();
        if !media.eq_ignore_ascii_case("text/html") {
          return false;
        }
        parts.all(|param| match param.trim().strip_prefix("q=") {
          Some(q) => q.trim().parse::<f32>().map(|q| q > 0.0).unwrap_or(true),
          None => true,
        })
      })
  }
}

/// A response, either fresh from the network or read back from a cache namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
  pub status: u16,
  pub status_text: String,
  pub headers: Headers,
  pub body: Vec<u8>,
}

impl Response {
  pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
    Self {
      status,
      status_text: reqwest::StatusCode::from_u16(status)
        .ok()
        .and_then(|s| s.canonical_reason())
        .unwrap_or_default()
        .to_string(),
      headers: Headers::new(),
      body: body.into(),
    }
  }

  pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
    self.headers.append(name, value);
    self
  }

  /// Status in the 2xx range.
  pub fn ok(&self) -> bool {
    (200..300).contains(&self.status)
  }

  pub fn text(&self) -> String {
    String::from_utf8_lossy(&self.body).into_owned()
  }
}
