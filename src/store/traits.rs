//! Core types and the storage trait for the generation cache.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::identity::RequestIdentity;

/// A response captured at insertion time.
///
/// Immutable once written; a later write under the same identity replaces
/// the whole value atomically from the reader's perspective.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseSnapshot {
  pub status: u16,
  /// Header pairs in response order
  pub headers: Vec<(String, String)>,
  pub body: Vec<u8>,
}

impl ResponseSnapshot {
  /// Whether the status indicates success (2xx).
  pub fn is_success(&self) -> bool {
    (200..300).contains(&self.status)
  }

  /// A synthetic 200 response carrying a JSON body.
  pub fn json(body: Vec<u8>) -> Self {
    Self {
      status: 200,
      headers: vec![("content-type".to_string(), "application/json".to_string())],
      body,
    }
  }
}

/// A cache entry as read back from storage.
#[derive(Debug, Clone)]
pub struct StoredEntry {
  pub snapshot: ResponseSnapshot,
  pub stored_at: DateTime<Utc>,
}

/// The persisted role-to-current-generation record.
///
/// This is the single source of truth for which generation serves each
/// role. It is read and written as a whole; writing it is the promotion
/// step that makes superseded generations sweep-eligible.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VersionRecord {
  pub shell_version: Option<String>,
  pub data_version: Option<String>,
}

impl VersionRecord {
  /// Whether `name` is current for either role.
  pub fn is_current(&self, name: &str) -> bool {
    self.shell_version.as_deref() == Some(name) || self.data_version.as_deref() == Some(name)
  }
}

/// Trait for cache storage backends.
///
/// All mutations are whole-entry or whole-generation replacements, so
/// concurrent readers never observe a torn value. Concurrent writers to
/// the same key are last-write-wins.
pub trait CacheStore: Send + Sync {
  /// Read the role-to-generation record (default when never written).
  fn read_versions(&self) -> color_eyre::Result<VersionRecord>;

  /// Atomically replace the role-to-generation record.
  fn write_versions(&self, record: &VersionRecord) -> color_eyre::Result<()>;

  /// All generation names present in the store.
  fn list_generations(&self) -> color_eyre::Result<Vec<String>>;

  /// Delete a generation and every entry in it.
  fn delete_generation(&self, name: &str) -> color_eyre::Result<()>;

  /// Store one entry, creating the generation if absent.
  fn put_entry(
    &self,
    generation: &str,
    identity: &RequestIdentity,
    snapshot: &ResponseSnapshot,
  ) -> color_eyre::Result<()>;

  /// Store a batch of entries all-or-nothing, creating the generation if
  /// absent. If the write fails, no entry from the batch is visible.
  fn put_entries(
    &self,
    generation: &str,
    entries: &[(RequestIdentity, ResponseSnapshot)],
  ) -> color_eyre::Result<()>;

  /// Look up one entry by identity.
  fn get_entry(
    &self,
    generation: &str,
    identity: &RequestIdentity,
  ) -> color_eyre::Result<Option<StoredEntry>>;

  /// The civil day a reminder was last raised for this task, if any.
  fn reminder_logged_on(&self, task_id: i64) -> color_eyre::Result<Option<NaiveDate>>;

  /// Record that a reminder for this task was raised on `day`.
  fn log_reminder(&self, task_id: i64, day: NaiveDate) -> color_eyre::Result<()>;
}
