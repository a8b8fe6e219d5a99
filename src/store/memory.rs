//! In-memory cache store.
//!
//! Backs tests and hermetic runs where persistence across restarts is not
//! wanted. Same visibility semantics as the SQLite store: whole-entry
//! replacement, whole-generation deletion.

use chrono::{NaiveDate, Utc};
use color_eyre::{eyre::eyre, Result};
use std::collections::BTreeMap;
use std::sync::Mutex;

use super::traits::{CacheStore, ResponseSnapshot, StoredEntry, VersionRecord};
use crate::identity::RequestIdentity;

#[derive(Default)]
struct MemoryInner {
  versions: VersionRecord,
  generations: BTreeMap<String, BTreeMap<String, StoredEntry>>,
  reminders: BTreeMap<i64, NaiveDate>,
}

/// Store implementation holding everything in process memory.
#[derive(Default)]
pub struct MemoryStore {
  inner: Mutex<MemoryInner>,
}

impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }
}

impl CacheStore for MemoryStore {
  fn read_versions(&self) -> Result<VersionRecord> {
    let inner = self
      .inner
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(inner.versions.clone())
  }

  fn write_versions(&self, record: &VersionRecord) -> Result<()> {
    let mut inner = self
      .inner
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    inner.versions = record.clone();
    Ok(())
  }

  fn list_generations(&self) -> Result<Vec<String>> {
    let inner = self
      .inner
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(inner.generations.keys().cloned().collect())
  }

  fn delete_generation(&self, name: &str) -> Result<()> {
    let mut inner = self
      .inner
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    inner.generations.remove(name);
    Ok(())
  }

  fn put_entry(
    &self,
    generation: &str,
    identity: &RequestIdentity,
    snapshot: &ResponseSnapshot,
  ) -> Result<()> {
    let mut inner = self
      .inner
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    inner
      .generations
      .entry(generation.to_string())
      .or_default()
      .insert(
        identity.hash().to_string(),
        StoredEntry {
          snapshot: snapshot.clone(),
          stored_at: Utc::now(),
        },
      );
    Ok(())
  }

  fn put_entries(
    &self,
    generation: &str,
    entries: &[(RequestIdentity, ResponseSnapshot)],
  ) -> Result<()> {
    let mut inner = self
      .inner
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    let slot = inner.generations.entry(generation.to_string()).or_default();
    for (identity, snapshot) in entries {
      slot.insert(
        identity.hash().to_string(),
        StoredEntry {
          snapshot: snapshot.clone(),
          stored_at: Utc::now(),
        },
      );
    }
    Ok(())
  }

  fn get_entry(
    &self,
    generation: &str,
    identity: &RequestIdentity,
  ) -> Result<Option<StoredEntry>> {
    let inner = self
      .inner
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(
      inner
        .generations
        .get(generation)
        .and_then(|entries| entries.get(identity.hash()))
        .cloned(),
    )
  }

  fn reminder_logged_on(&self, task_id: i64) -> Result<Option<NaiveDate>> {
    let inner = self
      .inner
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(inner.reminders.get(&task_id).copied())
  }

  fn log_reminder(&self, task_id: i64, day: NaiveDate) -> Result<()> {
    let mut inner = self
      .inner
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    inner.reminders.insert(task_id, day);
    Ok(())
  }
}
