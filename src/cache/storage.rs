//! Cache storage trait and SQLite implementation.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use reqwest::Method;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::warn;
use url::Url;

use super::traits::CacheKey;
use crate::net::{Headers, Request, Response};

/// A request/response pair read back from a namespace.
#[derive(Debug, Clone)]
pub struct CachedEntry {
  pub request: Request,
  pub response: Response,
  /// When the entry was written
  pub cached_at: DateTime<Utc>,
}

/// Trait for cache storage backends.
///
/// Every method is a single atomic operation on the store. Only `put_all`
/// spans several keys, and it is all-or-nothing.
pub trait CacheStorage: Send + Sync {
  /// Create the namespace if it does not exist yet.
  fn create_namespace(&self, name: &str) -> Result<()>;

  fn has_namespace(&self, name: &str) -> Result<bool>;

  /// All namespace names in creation order.
  fn namespaces(&self) -> Result<Vec<String>>;

  /// Drop a namespace and everything in it. Returns false if it did not exist.
  fn delete_namespace(&self, name: &str) -> Result<bool>;

  /// Store one entry, replacing any entry with the same request identity.
  fn put(&self, namespace: &str, request: &Request, response: &Response) -> Result<()>;

  /// Store a batch of entries. Either all are written or none are.
  fn put_all(&self, namespace: &str, entries: &[(Request, Response)]) -> Result<()>;

  /// Look a request up in one namespace.
  fn get(&self, namespace: &str, request: &Request) -> Result<Option<CachedEntry>>;

  /// Look a request up across all namespaces, oldest namespace first.
  fn get_any(&self, request: &Request) -> Result<Option<CachedEntry>>;

  /// Entries of a namespace in write order. Rows that cannot be decoded are
  /// logged and skipped.
  fn entries(&self, namespace: &str) -> Result<Vec<CachedEntry>>;

  /// Remove one entry. Returns false if it was not there.
  fn delete(&self, namespace: &str, request: &Request) -> Result<bool>;

  fn count(&self, namespace: &str) -> Result<usize>;
}

/// SQLite-based cache storage implementation.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
}

impl SqliteStorage {
  /// Open (or create) the store at `path`.
  pub fn open(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    Self::with_connection(conn)
  }

  /// Open a throwaway store that lives only as long as this value.
  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory cache database: {}", e))?;

    Self::with_connection(conn)
  }

  fn with_connection(conn: Connection) -> Result<Self> {
    let storage = Self {
      conn: Mutex::new(conn),
    };
    storage.run_migrations()?;

    Ok(storage)
  }

  /// Get the default database path.
  pub fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("offline-worker").join("caches.db"))
  }

  /// Run database migrations for cache tables.
  fn run_migrations(&self) -> Result<()> {
    self
      .lock()?
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    Ok(())
  }

  fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
    self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))
  }
}

/// Schema for cache tables.
const CACHE_SCHEMA: &str = r#"
PRAGMA foreign_keys = ON;

-- Namespaces; id order is creation order
CREATE TABLE IF NOT EXISTS cache_namespaces (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Request -> response entries
CREATE TABLE IF NOT EXISTS cache_entries (
    namespace_id INTEGER NOT NULL,
    request_hash TEXT NOT NULL,
    method TEXT NOT NULL,
    url TEXT NOT NULL,
    request_headers TEXT NOT NULL,
    request_body BLOB,
    status INTEGER NOT NULL,
    status_text TEXT NOT NULL,
    response_headers TEXT NOT NULL,
    body BLOB NOT NULL,
    cached_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (namespace_id, request_hash),
    FOREIGN KEY (namespace_id) REFERENCES cache_namespaces(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_cache_entries_hash ON cache_entries(request_hash);
"#;

const ENTRY_COLUMNS: &str = "e.method, e.url, e.request_headers, e.request_body, \
  e.status, e.status_text, e.response_headers, e.body, e.cached_at";

/// Row as stored, before URL/header parsing.
struct RawEntry {
  method: String,
  url: String,
  request_headers: String,
  request_body: Option<Vec<u8>>,
  status: u16,
  status_text: String,
  response_headers: String,
  body: Vec<u8>,
  cached_at: String,
}

impl RawEntry {
  fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      method: row.get(0)?,
      url: row.get(1)?,
      request_headers: row.get(2)?,
      request_body: row.get(3)?,
      status: row.get(4)?,
      status_text: row.get(5)?,
      response_headers: row.get(6)?,
      body: row.get(7)?,
      cached_at: row.get(8)?,
    })
  }

  fn into_entry(self) -> Result<CachedEntry> {
    let method = Method::from_bytes(self.method.as_bytes())
      .map_err(|e| eyre!("Invalid stored method '{}': {}", self.method, e))?;
    let url =
      Url::parse(&self.url).map_err(|e| eyre!("Invalid stored URL '{}': {}", self.url, e))?;
    let request_headers: Headers = serde_json::from_str(&self.request_headers)
      .map_err(|e| eyre!("Failed to deserialize request headers: {}", e))?;
    let response_headers: Headers = serde_json::from_str(&self.response_headers)
      .map_err(|e| eyre!("Failed to deserialize response headers: {}", e))?;

    Ok(CachedEntry {
      request: Request {
        method,
        url,
        headers: request_headers,
        body: self.request_body,
      },
      response: Response {
        status: self.status,
        status_text: self.status_text,
        headers: response_headers,
        body: self.body,
      },
      cached_at: parse_datetime(&self.cached_at)?,
    })
  }
}

/// Id of `name`, creating the namespace first.
fn ensure_namespace(conn: &Connection, name: &str) -> Result<i64> {
  conn
    .execute(
      "INSERT OR IGNORE INTO cache_namespaces (name) VALUES (?)",
      params![name],
    )
    .map_err(|e| eyre!("Failed to create namespace {}: {}", name, e))?;

  conn
    .query_row(
      "SELECT id FROM cache_namespaces WHERE name = ?",
      params![name],
      |row| row.get(0),
    )
    .map_err(|e| eyre!("Failed to look up namespace {}: {}", name, e))
}

fn insert_entry(
  conn: &Connection,
  namespace_id: i64,
  request: &Request,
  response: &Response,
) -> Result<()> {
  let request_headers = serde_json::to_string(&request.headers)
    .map_err(|e| eyre!("Failed to serialize request headers: {}", e))?;
  let response_headers = serde_json::to_string(&response.headers)
    .map_err(|e| eyre!("Failed to serialize response headers: {}", e))?;

  conn
    .execute(
      "INSERT OR REPLACE INTO cache_entries (namespace_id, request_hash, method, url,
         request_headers, request_body, status, status_text, response_headers, body, cached_at)
       VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, datetime('now'))",
      params![
        namespace_id,
        request.cache_hash(),
        request.method.as_str(),
        request.url.as_str(),
        request_headers,
        request.body,
        response.status,
        response.status_text,
        response_headers,
        response.body,
      ],
    )
    .map_err(|e| eyre!("Failed to store {}: {}", request.description(), e))?;

  Ok(())
}

impl CacheStorage for SqliteStorage {
  fn create_namespace(&self, name: &str) -> Result<()> {
    let conn = self.lock()?;
    ensure_namespace(&conn, name)?;
    Ok(())
  }

  fn has_namespace(&self, name: &str) -> Result<bool> {
    let conn = self.lock()?;

    let found: Option<i64> = conn
      .query_row(
        "SELECT id FROM cache_namespaces WHERE name = ?",
        params![name],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| eyre!("Failed to look up namespace {}: {}", name, e))?;

    Ok(found.is_some())
  }

  fn namespaces(&self) -> Result<Vec<String>> {
    let conn = self.lock()?;

    let mut stmt = conn
      .prepare("SELECT name FROM cache_namespaces ORDER BY id")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let names = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list namespaces: {}", e))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(|e| eyre!("Failed to read namespace name: {}", e))?;

    Ok(names)
  }

  fn delete_namespace(&self, name: &str) -> Result<bool> {
    let conn = self.lock()?;

    // Entries go with it through ON DELETE CASCADE
    let deleted = conn
      .execute("DELETE FROM cache_namespaces WHERE name = ?", params![name])
      .map_err(|e| eyre!("Failed to delete namespace {}: {}", name, e))?;

    Ok(deleted > 0)
  }

  fn put(&self, namespace: &str, request: &Request, response: &Response) -> Result<()> {
    let conn = self.lock()?;
    let namespace_id = ensure_namespace(&conn, namespace)?;
    insert_entry(&conn, namespace_id, request, response)
  }

  fn put_all(&self, namespace: &str, entries: &[(Request, Response)]) -> Result<()> {
    let mut conn = self.lock()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    let namespace_id = ensure_namespace(&tx, namespace)?;
    for (request, response) in entries {
      // An early return drops `tx`, which rolls the whole batch back
      insert_entry(&tx, namespace_id, request, response)?;
    }

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(())
  }

  fn get(&self, namespace: &str, request: &Request) -> Result<Option<CachedEntry>> {
    let conn = self.lock()?;

    let raw = conn
      .query_row(
        &format!(
          "SELECT {ENTRY_COLUMNS} FROM cache_entries e
           INNER JOIN cache_namespaces n ON n.id = e.namespace_id
           WHERE n.name = ? AND e.request_hash = ?"
        ),
        params![namespace, request.cache_hash()],
        RawEntry::from_row,
      )
      .optional()
      .map_err(|e| eyre!("Failed to query {}: {}", request.description(), e))?;

    raw.map(RawEntry::into_entry).transpose()
  }

  fn get_any(&self, request: &Request) -> Result<Option<CachedEntry>> {
    let conn = self.lock()?;

    let raw = conn
      .query_row(
        &format!(
          "SELECT {ENTRY_COLUMNS} FROM cache_entries e
           INNER JOIN cache_namespaces n ON n.id = e.namespace_id
           WHERE e.request_hash = ?
           ORDER BY n.id
           LIMIT 1"
        ),
        params![request.cache_hash()],
        RawEntry::from_row,
      )
      .optional()
      .map_err(|e| eyre!("Failed to query {}: {}", request.description(), e))?;

    raw.map(RawEntry::into_entry).transpose()
  }

  fn entries(&self, namespace: &str) -> Result<Vec<CachedEntry>> {
    let conn = self.lock()?;

    let mut stmt = conn
      .prepare(&format!(
        "SELECT {ENTRY_COLUMNS} FROM cache_entries e
         INNER JOIN cache_namespaces n ON n.id = e.namespace_id
         WHERE n.name = ?
         ORDER BY e.rowid"
      ))
      .map_err(|e| eyre!("Failed to prepare entry query: {}", e))?;

    let rows = stmt
      .query_map(params![namespace], RawEntry::from_row)
      .map_err(|e| eyre!("Failed to query entries of {}: {}", namespace, e))?;

    let mut entries = Vec::new();
    for row in rows {
      let decoded = row
        .map_err(|e| eyre!("Failed to read entry: {}", e))
        .and_then(RawEntry::into_entry);
      match decoded {
        Ok(entry) => entries.push(entry),
        Err(e) => warn!(namespace, "Skipping unreadable cache entry: {:#}", e),
      }
    }

    Ok(entries)
  }

  fn delete(&self, namespace: &str, request: &Request) -> Result<bool> {
    let conn = self.lock()?;

    let deleted = conn
      .execute(
        "DELETE FROM cache_entries
         WHERE request_hash = ?
           AND namespace_id = (SELECT id FROM cache_namespaces WHERE name = ?)",
        params![request.cache_hash(), namespace],
      )
      .map_err(|e| eyre!("Failed to delete {}: {}", request.description(), e))?;

    Ok(deleted > 0)
  }

  fn count(&self, namespace: &str) -> Result<usize> {
    let conn = self.lock()?;

    let count: i64 = conn
      .query_row(
        "SELECT COUNT(*) FROM cache_entries e
         INNER JOIN cache_namespaces n ON n.id = e.namespace_id
         WHERE n.name = ?",
        params![namespace],
        |row| row.get(0),
      )
      .map_err(|e| eyre!("Failed to count entries of {}: {}", namespace, e))?;

    Ok(count as usize)
  }
}

/// Parse a datetime string from SQLite format.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  // SQLite stores as "YYYY-MM-DD HH:MM:SS"
  chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
    .map(|dt| dt.and_utc())
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}
