//! SQLite-backed cache store.

use chrono::{DateTime, NaiveDate, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;

use super::traits::{CacheStore, ResponseSnapshot, StoredEntry, VersionRecord};
use crate::identity::RequestIdentity;

/// SQLite-based store implementation.
pub struct SqliteStore {
  conn: Mutex<Connection>,
}

impl SqliteStore {
  /// Open or create the store at the given path.
  pub fn open(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    let store = Self {
      conn: Mutex::new(conn),
    };
    store.run_migrations()?;

    Ok(store)
  }

  /// Run database migrations for cache tables.
  fn run_migrations(&self) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute_batch(STORE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    Ok(())
  }
}

/// Schema for cache tables.
const STORE_SCHEMA: &str = r#"
-- Role-to-current-generation record (single row)
CREATE TABLE IF NOT EXISTS lifecycle_state (
    id INTEGER PRIMARY KEY CHECK (id = 0),
    shell_version TEXT,
    data_version TEXT
);

-- Named, versioned generations
CREATE TABLE IF NOT EXISTS generations (
    name TEXT PRIMARY KEY,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Response snapshots keyed by request identity
CREATE TABLE IF NOT EXISTS entries (
    generation TEXT NOT NULL,
    identity_hash TEXT NOT NULL,
    url TEXT NOT NULL,
    status INTEGER NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    stored_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (generation, identity_hash),
    FOREIGN KEY (generation) REFERENCES generations(name) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_entries_generation ON entries(generation);

-- Last-notified day per task, for reminder dedup across periodic firings
CREATE TABLE IF NOT EXISTS reminder_log (
    task_id INTEGER PRIMARY KEY,
    notified_on TEXT NOT NULL
);
"#;

impl CacheStore for SqliteStore {
  fn read_versions(&self) -> Result<VersionRecord> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let record = conn
      .query_row(
        "SELECT shell_version, data_version FROM lifecycle_state WHERE id = 0",
        [],
        |row| {
          Ok(VersionRecord {
            shell_version: row.get(0)?,
            data_version: row.get(1)?,
          })
        },
      )
      .optional()
      .map_err(|e| eyre!("Failed to read version record: {}", e))?;

    Ok(record.unwrap_or_default())
  }

  fn write_versions(&self, record: &VersionRecord) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute(
        "INSERT OR REPLACE INTO lifecycle_state (id, shell_version, data_version) VALUES (0, ?, ?)",
        params![record.shell_version, record.data_version],
      )
      .map_err(|e| eyre!("Failed to write version record: {}", e))?;

    Ok(())
  }

  fn list_generations(&self) -> Result<Vec<String>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare("SELECT name FROM generations ORDER BY name")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let names: Vec<String> = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list generations: {}", e))?
      .filter_map(|r| r.ok())
      .collect();

    Ok(names)
  }

  fn delete_generation(&self, name: &str) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute("BEGIN TRANSACTION", [])
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    let result = conn
      .execute("DELETE FROM entries WHERE generation = ?", params![name])
      .and_then(|_| conn.execute("DELETE FROM generations WHERE name = ?", params![name]));

    match result {
      Ok(_) => {
        conn
          .execute("COMMIT", [])
          .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;
        Ok(())
      }
      Err(e) => {
        let _ = conn.execute("ROLLBACK", []);
        Err(eyre!("Failed to delete generation {}: {}", name, e))
      }
    }
  }

  fn put_entry(
    &self,
    generation: &str,
    identity: &RequestIdentity,
    snapshot: &ResponseSnapshot,
  ) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    insert_generation(&conn, generation)?;
    insert_entry(&conn, generation, identity, snapshot)?;

    Ok(())
  }

  fn put_entries(
    &self,
    generation: &str,
    entries: &[(RequestIdentity, ResponseSnapshot)],
  ) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute("BEGIN TRANSACTION", [])
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    let result = (|| -> Result<()> {
      insert_generation(&conn, generation)?;
      for (identity, snapshot) in entries {
        insert_entry(&conn, generation, identity, snapshot)?;
      }
      Ok(())
    })();

    match result {
      Ok(()) => {
        conn
          .execute("COMMIT", [])
          .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;
        Ok(())
      }
      Err(e) => {
        let _ = conn.execute("ROLLBACK", []);
        Err(e)
      }
    }
  }

  fn get_entry(
    &self,
    generation: &str,
    identity: &RequestIdentity,
  ) -> Result<Option<StoredEntry>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare(
        "SELECT status, headers, body, stored_at FROM entries
         WHERE generation = ? AND identity_hash = ?",
      )
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let row: Option<(u16, String, Vec<u8>, String)> = stmt
      .query_row(params![generation, identity.hash()], |row| {
        Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
      })
      .optional()
      .map_err(|e| eyre!("Failed to query entry: {}", e))?;

    match row {
      Some((status, headers_json, body, stored_at_str)) => {
        let headers: Vec<(String, String)> = serde_json::from_str(&headers_json)
          .map_err(|e| eyre!("Failed to deserialize headers: {}", e))?;
        let stored_at = parse_datetime(&stored_at_str)?;
        Ok(Some(StoredEntry {
          snapshot: ResponseSnapshot {
            status,
            headers,
            body,
          },
          stored_at,
        }))
      }
      None => Ok(None),
    }
  }

  fn reminder_logged_on(&self, task_id: i64) -> Result<Option<NaiveDate>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let day: Option<String> = conn
      .query_row(
        "SELECT notified_on FROM reminder_log WHERE task_id = ?",
        params![task_id],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| eyre!("Failed to query reminder log: {}", e))?;

    match day {
      Some(s) => {
        let parsed = NaiveDate::parse_from_str(&s, "%Y-%m-%d")
          .map_err(|e| eyre!("Failed to parse reminder day '{}': {}", s, e))?;
        Ok(Some(parsed))
      }
      None => Ok(None),
    }
  }

  fn log_reminder(&self, task_id: i64, day: NaiveDate) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute(
        "INSERT OR REPLACE INTO reminder_log (task_id, notified_on) VALUES (?, ?)",
        params![task_id, day.format("%Y-%m-%d").to_string()],
      )
      .map_err(|e| eyre!("Failed to write reminder log: {}", e))?;

    Ok(())
  }
}

fn insert_generation(conn: &Connection, generation: &str) -> Result<()> {
  conn
    .execute(
      "INSERT OR IGNORE INTO generations (name) VALUES (?)",
      params![generation],
    )
    .map_err(|e| eyre!("Failed to create generation {}: {}", generation, e))?;
  Ok(())
}

fn insert_entry(
  conn: &Connection,
  generation: &str,
  identity: &RequestIdentity,
  snapshot: &ResponseSnapshot,
) -> Result<()> {
  let headers = serde_json::to_string(&snapshot.headers)
    .map_err(|e| eyre!("Failed to serialize headers: {}", e))?;

  conn
    .execute(
      "INSERT OR REPLACE INTO entries (generation, identity_hash, url, status, headers, body, stored_at)
       VALUES (?, ?, ?, ?, ?, ?, datetime('now'))",
      params![
        generation,
        identity.hash(),
        identity.as_str(),
        snapshot.status,
        headers,
        snapshot.body
      ],
    )
    .map_err(|e| eyre!("Failed to store entry: {}", e))?;

  Ok(())
}

/// Parse a datetime string from SQLite format.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  // SQLite stores as "YYYY-MM-DD HH:MM:SS"
  chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
    .map(|dt| dt.and_utc())
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}

#[cfg(test)]
mod tests {
  use super::*;

  fn open_store() -> (tempfile::TempDir, SqliteStore) {
    let dir = tempfile::tempdir().unwrap();
    let store = SqliteStore::open(&dir.path().join("cache.db")).unwrap();
    (dir, store)
  }

  fn identity(url: &str) -> RequestIdentity {
    RequestIdentity::parse(url).unwrap()
  }

  fn snapshot(body: &[u8]) -> ResponseSnapshot {
    ResponseSnapshot {
      status: 200,
      headers: vec![("content-type".to_string(), "text/html".to_string())],
      body: body.to_vec(),
    }
  }

  #[test]
  fn test_entry_round_trip() {
    let (_dir, store) = open_store();
    let id = identity("http://app.local/index.html");
    let snap = snapshot(b"<html>shell</html>");

    store.put_entry("shell-v1", &id, &snap).unwrap();

    let entry = store.get_entry("shell-v1", &id).unwrap().unwrap();
    assert_eq!(entry.snapshot, snap);
    assert!(store.get_entry("shell-v2", &id).unwrap().is_none());
  }

  #[test]
  fn test_same_key_rewrite_returns_newest() {
    let (_dir, store) = open_store();
    let id = identity("http://app.local/api/tasks");

    store.put_entry("data-v1", &id, &snapshot(b"old")).unwrap();
    store.put_entry("data-v1", &id, &snapshot(b"new")).unwrap();

    let entry = store.get_entry("data-v1", &id).unwrap().unwrap();
    assert_eq!(entry.snapshot.body, b"new");
  }

  #[test]
  fn test_bulk_put_is_atomic_per_generation() {
    let (_dir, store) = open_store();
    let entries = vec![
      (identity("http://app.local/"), snapshot(b"root")),
      (identity("http://app.local/app.js"), snapshot(b"js")),
    ];

    store.put_entries("shell-v1", &entries).unwrap();

    assert_eq!(store.list_generations().unwrap(), vec!["shell-v1"]);
    for (id, snap) in &entries {
      let entry = store.get_entry("shell-v1", id).unwrap().unwrap();
      assert_eq!(&entry.snapshot, snap);
    }
  }

  #[test]
  fn test_delete_generation_removes_entries() {
    let (_dir, store) = open_store();
    let id = identity("http://app.local/old.css");

    store.put_entry("shell-v0", &id, &snapshot(b"css")).unwrap();
    store.put_entry("shell-v1", &id, &snapshot(b"css")).unwrap();
    store.delete_generation("shell-v0").unwrap();

    assert_eq!(store.list_generations().unwrap(), vec!["shell-v1"]);
    assert!(store.get_entry("shell-v0", &id).unwrap().is_none());
    assert!(store.get_entry("shell-v1", &id).unwrap().is_some());
  }

  #[test]
  fn test_version_record_round_trip() {
    let (_dir, store) = open_store();

    assert_eq!(store.read_versions().unwrap(), VersionRecord::default());

    let record = VersionRecord {
      shell_version: Some("shell-v2".to_string()),
      data_version: Some("data-v2".to_string()),
    };
    store.write_versions(&record).unwrap();
    assert_eq!(store.read_versions().unwrap(), record);
  }

  #[test]
  fn test_reminder_log_round_trip() {
    let (_dir, store) = open_store();
    let day = NaiveDate::from_ymd_opt(2024, 1, 5).unwrap();

    assert!(store.reminder_logged_on(1).unwrap().is_none());
    store.log_reminder(1, day).unwrap();
    assert_eq!(store.reminder_logged_on(1).unwrap(), Some(day));
  }

  #[test]
  fn test_reopen_preserves_state() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cache.db");
    let id = identity("http://app.local/index.html");

    {
      let store = SqliteStore::open(&path).unwrap();
      store.put_entry("shell-v1", &id, &snapshot(b"shell")).unwrap();
      store
        .write_versions(&VersionRecord {
          shell_version: Some("shell-v1".to_string()),
          data_version: Some("data-v1".to_string()),
        })
        .unwrap();
    }

    let store = SqliteStore::open(&path).unwrap();
    assert!(store.get_entry("shell-v1", &id).unwrap().is_some());
    assert_eq!(
      store.read_versions().unwrap().shell_version.as_deref(),
      Some("shell-v1")
    );
  }
}
