use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use url::Url;

/// Cache generation, stamped into both cache names. Set
/// `OFFLINE_WORKER_CACHE_VERSION` at build time to cut a new generation.
pub const CACHE_VERSION: &str = match option_env!("OFFLINE_WORKER_CACHE_VERSION") {
  Some(version) => version,
  None => "v1.0.0",
};

pub const STATIC_CACHE_PREFIX: &str = "static";
pub const DYNAMIC_CACHE_PREFIX: &str = "web-training";

/// Root-relative path the page registers the worker script at.
pub const SCRIPT_PATH: &str = "/sw.js";

/// Pages, styles and scripts seeded into the static cache at install.
pub const MANIFEST: &[&str] = &[
  "/",
  "/index.html",
  "/style.css",
  "/script.js",
  "/about.html",
  "/services.html",
  "/contact.html",
  "/basics.html",
  "/css.html",
  "/javascript.html",
  "/responsive.html",
  "/accessibility.html",
];

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
  /// Origin the worker is scoped to; cross-origin requests are never intercepted
  pub origin: String,
  pub cache_version: String,
  /// Explicit static cache name (defaults to `static-<cache_version>`)
  pub static_cache: Option<String>,
  /// Explicit dynamic cache name (defaults to `web-training-<cache_version>`)
  pub dynamic_cache: Option<String>,
  pub manifest: Vec<String>,
  /// Page served to HTML requests when the network is down
  pub offline_page: String,
  /// Activate right after install instead of waiting for a reload
  pub skip_waiting: bool,
  pub store_path: Option<PathBuf>,
  pub sync: SyncConfig,
  pub notifications: NotificationConfig,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      origin: "http://localhost:8080".to_string(),
      cache_version: CACHE_VERSION.to_string(),
      static_cache: None,
      dynamic_cache: None,
      manifest: MANIFEST.iter().map(|p| p.to_string()).collect(),
      offline_page: "/index.html".to_string(),
      skip_waiting: true,
      store_path: None,
      sync: SyncConfig::default(),
      notifications: NotificationConfig::default(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
  /// Background-sync tag that drains the contact form queue
  pub tag: String,
  /// Namespace holding queued submissions
  pub queue: String,
  /// Root-relative endpoint submissions are posted to
  pub endpoint: String,
}

impl Default for SyncConfig {
  fn default() -> Self {
    Self {
      tag: "contact-form-sync".to_string(),
      queue: "contact-form-cache".to_string(),
      endpoint: "/api/contact".to_string(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
  pub icon: String,
  pub badge: String,
  /// Vibration pattern in milliseconds (on, off, on, ...)
  pub vibrate: Vec<u32>,
  /// Page opened when a notification is clicked
  pub open_url: String,
}

impl Default for NotificationConfig {
  fn default() -> Self {
    Self {
      icon: "/icon-192x192.png".to_string(),
      badge: "/icon-192x192.png".to_string(),
      vibrate: vec![100, 50, 100],
      open_url: "/index.html".to_string(),
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./offline-worker.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/offline-worker/config.yaml
  ///
  /// With no file anywhere the built-in defaults are used.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Ok(Self::default()),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("offline-worker.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("offline-worker").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::from_yaml(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  pub fn from_yaml(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents)?;
    Ok(config)
  }

  pub fn static_cache_name(&self) -> String {
    self
      .static_cache
      .clone()
      .unwrap_or_else(|| format!("{}-{}", STATIC_CACHE_PREFIX, self.cache_version))
  }

  pub fn dynamic_cache_name(&self) -> String {
    self
      .dynamic_cache
      .clone()
      .unwrap_or_else(|| format!("{}-{}", DYNAMIC_CACHE_PREFIX, self.cache_version))
  }

  pub fn origin_url(&self) -> Result<Url> {
    let url =
      Url::parse(&self.origin).map_err(|e| eyre!("Invalid origin '{}': {}", self.origin, e))?;
    if !url.origin().is_tuple() {
      return Err(eyre!("Origin '{}' has no host", self.origin));
    }
    Ok(url)
  }

  /// Resolve a root-relative path against the origin.
  pub fn resolve(&self, path: &str) -> Result<Url> {
    self
      .origin_url()?
      .join(path)
      .map_err(|e| eyre!("Invalid path '{}': {}", path, e))
  }

  pub fn store_path(&self) -> Result<PathBuf> {
    match &self.store_path {
      Some(p) => Ok(p.clone()),
      None => crate::cache::SqliteStorage::default_path(),
    }
  }
}
