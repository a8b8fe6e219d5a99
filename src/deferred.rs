//! Deferred work: reconciliation on connectivity-restored signals,
//! reminder checks on periodic signals, push-driven notifications.
//!
//! All passes run outside the request path. A failing pass is logged and
//! abandoned for that invocation; the next platform trigger retries
//! naturally.

use chrono::{DateTime, Utc};
use color_eyre::Result;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::channel::{task_snapshot_identity, ClientRegistry, OutboundMessage};
use crate::config::Config;
use crate::notify::{NotificationAction, NotificationDispatcher, NotificationRequest};
use crate::store::CacheStore;
use crate::tasks::{days_until, decode_groups, DueStatus, Task};

/// Payload accepted on a push trigger.
#[derive(Debug, Default, Deserialize)]
struct PushPayload {
  title: Option<String>,
  body: Option<String>,
}

/// Reacts to connectivity-restored and periodic-timer signals.
pub struct DeferredWorkEngine<S> {
  store: Arc<S>,
  config: Arc<Config>,
  clients: Arc<ClientRegistry>,
  notifier: Arc<NotificationDispatcher>,
}

impl<S: CacheStore> DeferredWorkEngine<S> {
  pub fn new(
    store: Arc<S>,
    config: Arc<Config>,
    clients: Arc<ClientRegistry>,
    notifier: Arc<NotificationDispatcher>,
  ) -> Self {
    Self {
      store,
      config,
      clients,
      notifier,
    }
  }

  /// Connectivity-restored trigger. Runs a reconciliation pass and, on
  /// success, broadcasts completion to all connected clients.
  pub async fn on_sync(&self, tag: &str) {
    if tag != self.config.sync_tag {
      debug!(tag, "ignoring sync trigger with unknown tag");
      return;
    }

    match self.reconcile().await {
      Ok(status) => {
        let delivered = self
          .clients
          .broadcast(&OutboundMessage::SyncComplete { status });
        debug!(delivered, "sync pass complete");
      }
      Err(err) => warn!(error = %err, "sync pass abandoned"),
    }
  }

  /// Periodic trigger. Reads the pushed task snapshot and raises
  /// due/overdue reminders.
  pub async fn on_periodic(&self, tag: &str, now: DateTime<Utc>) {
    if tag != self.config.periodic_sync_tag {
      debug!(tag, "ignoring periodic trigger with unknown tag");
      return;
    }

    if let Err(err) = self.reminder_pass(now).await {
      warn!(error = %err, "reminder pass abandoned");
    }
  }

  /// Push trigger. Renders an immediate notification from the payload;
  /// malformed payloads fall back to default copy.
  pub async fn on_push(&self, payload: Option<&str>) {
    let parsed = payload
      .map(|raw| match serde_json::from_str::<PushPayload>(raw) {
        Ok(p) => p,
        Err(err) => {
          debug!(error = %err, "unparseable push payload, using defaults");
          PushPayload::default()
        }
      })
      .unwrap_or_default();

    let request = NotificationRequest {
      title: parsed.title.unwrap_or_else(|| "Task Reminder".to_string()),
      body: parsed
        .body
        .unwrap_or_else(|| "You have pending tasks.".to_string()),
      icon: self.config.notifications.icon.clone(),
      badge: self.config.notifications.badge.clone(),
      tag: "push".to_string(),
      require_interaction: false,
      vibrate: vec![200, 100, 200],
      data: serde_json::Value::Null,
      actions: default_actions(),
    };

    if let Err(err) = self.notifier.show(&request) {
      warn!(error = %err, "push pass abandoned");
    }
  }

  /// Placeholder reconciliation: the extension point for two-way backend
  /// sync. Succeeds with a status line, including when there is nothing
  /// to reconcile.
  async fn reconcile(&self) -> Result<String> {
    let record = self.store.read_versions()?;
    let generation = record
      .data_version
      .unwrap_or_else(|| self.config.data_generation());
    let identity = task_snapshot_identity(&self.config)?;

    let pending = match self.store.get_entry(&generation, &identity)? {
      Some(entry) => decode_groups(&entry.snapshot.body)?
        .values()
        .map(|tasks| tasks.iter().filter(|t| !t.completed).count())
        .sum::<usize>(),
      None => 0,
    };

    if pending == 0 {
      Ok("No local changes to synchronize".to_string())
    } else {
      Ok(format!("Synchronized {} pending tasks", pending))
    }
  }

  /// One reminder sweep over the snapshot. Returns how many notifications
  /// were raised.
  async fn reminder_pass(&self, now: DateTime<Utc>) -> Result<usize> {
    let record = self.store.read_versions()?;
    let generation = record
      .data_version
      .unwrap_or_else(|| self.config.data_generation());
    let identity = task_snapshot_identity(&self.config)?;

    // No snapshot pushed yet: nothing to check, not an error.
    let Some(entry) = self.store.get_entry(&generation, &identity)? else {
      return Ok(0);
    };

    let groups = decode_groups(&entry.snapshot.body)?;
    let today = now.date_naive();
    let mut raised = 0;

    for task in groups.values().flatten() {
      if task.completed {
        continue;
      }
      let Some(due) = task.due_date.as_deref() else {
        continue;
      };

      let days = match days_until(due, now) {
        Ok(days) => days,
        Err(err) => {
          // One bad record must not silence the other reminders.
          debug!(task = task.id, error = %err, "skipping task with bad due date");
          continue;
        }
      };
      let Some(status) = DueStatus::classify(days) else {
        continue;
      };

      // Tag replacement at the platform layer is advisory only; the log
      // makes repeated firings against an unchanged snapshot idempotent
      // within a day.
      if self.store.reminder_logged_on(task.id)? == Some(today) {
        continue;
      }

      self
        .notifier
        .show(&self.reminder_notification(task, status))?;
      self.store.log_reminder(task.id, today)?;
      raised += 1;
    }

    Ok(raised)
  }

  fn reminder_notification(&self, task: &Task, status: DueStatus) -> NotificationRequest {
    let body = match status {
      DueStatus::DueToday => format!("\"{}\" is due today!", task.text),
      DueStatus::Overdue => format!("\"{}\" is overdue!", task.text),
    };

    NotificationRequest {
      title: "Task Reminder".to_string(),
      body,
      icon: self.config.notifications.icon.clone(),
      badge: self.config.notifications.badge.clone(),
      tag: format!("task-{}", task.id),
      require_interaction: matches!(status, DueStatus::Overdue),
      vibrate: vec![200, 100, 200],
      data: serde_json::json!({ "taskId": task.id }),
      actions: default_actions(),
    }
  }
}

fn default_actions() -> Vec<NotificationAction> {
  vec![
    NotificationAction {
      action: "view".to_string(),
      title: "View Tasks".to_string(),
      icon: None,
    },
    NotificationAction {
      action: "dismiss".to_string(),
      title: "Dismiss".to_string(),
      icon: None,
    },
  ]
}
