//! Notification rendering and interaction routing.

use color_eyre::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use crate::channel::{ClientId, ClientRegistry};

/// A notification to render. Ephemeral; built per dispatch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NotificationRequest {
  pub title: String,
  pub body: String,
  pub icon: String,
  pub badge: String,
  /// Dedup key: a new notification with the same tag replaces the old one
  pub tag: String,
  pub require_interaction: bool,
  pub vibrate: Vec<u32>,
  /// Opaque data bag handed back on interaction
  pub data: serde_json::Value,
  pub actions: Vec<NotificationAction>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NotificationAction {
  pub action: String,
  pub title: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub icon: Option<String>,
}

/// Platform surface that actually displays notifications.
pub trait NotificationSink: Send + Sync {
  fn show(&self, request: &NotificationRequest) -> Result<()>;
  fn close(&self, tag: &str) -> Result<()>;
}

/// Platform surface for window focus and creation.
pub trait WindowControl: Send + Sync {
  fn focus(&self, client: ClientId) -> Result<()>;
  fn open(&self, url: &str) -> Result<()>;
}

/// Sink that logs notifications instead of displaying them. Used by the
/// CLI driver, where there is no display surface.
pub struct LogSink;

impl NotificationSink for LogSink {
  fn show(&self, request: &NotificationRequest) -> Result<()> {
    info!(tag = %request.tag, title = %request.title, body = %request.body, "notification");
    Ok(())
  }

  fn close(&self, tag: &str) -> Result<()> {
    info!(tag = %tag, "notification closed");
    Ok(())
  }
}

/// Window control that logs focus/open requests. Used by the CLI driver.
pub struct LogWindows;

impl WindowControl for LogWindows {
  fn focus(&self, client: ClientId) -> Result<()> {
    info!(client, "focus requested");
    Ok(())
  }

  fn open(&self, url: &str) -> Result<()> {
    info!(url, "window open requested");
    Ok(())
  }
}

/// Renders notifications and routes user interaction on them back into
/// client focus/open actions.
pub struct NotificationDispatcher {
  sink: Arc<dyn NotificationSink>,
  windows: Arc<dyn WindowControl>,
  clients: Arc<ClientRegistry>,
  root_url: String,
}

impl NotificationDispatcher {
  pub fn new(
    sink: Arc<dyn NotificationSink>,
    windows: Arc<dyn WindowControl>,
    clients: Arc<ClientRegistry>,
    root_url: String,
  ) -> Self {
    Self {
      sink,
      windows,
      clients,
      root_url,
    }
  }

  pub fn show(&self, request: &NotificationRequest) -> Result<()> {
    self.sink.show(request)
  }

  /// Route a user interaction on a displayed notification.
  ///
  /// `dismiss` closes it with no further effect. Any other interaction
  /// (the `view` action or a click on the body) focuses a client already
  /// showing the root view, or opens a new window there.
  pub fn handle_click(&self, tag: &str, action: Option<&str>) -> Result<()> {
    if action == Some("dismiss") {
      return self.sink.close(tag);
    }

    self.sink.close(tag)?;
    match self.clients.find_showing(&self.root_url) {
      Some(client) => self.windows.focus(client),
      None => self.windows.open(&self.root_url),
    }
  }
}

/// Recording doubles shared by this crate's tests.
#[cfg(test)]
pub mod testing {
  use super::*;
  use std::sync::Mutex;

  #[derive(Default)]
  pub struct RecordingSink {
    pub shown: Mutex<Vec<NotificationRequest>>,
    pub closed: Mutex<Vec<String>>,
  }

  impl NotificationSink for RecordingSink {
    fn show(&self, request: &NotificationRequest) -> Result<()> {
      self.shown.lock().unwrap().push(request.clone());
      Ok(())
    }

    fn close(&self, tag: &str) -> Result<()> {
      self.closed.lock().unwrap().push(tag.to_string());
      Ok(())
    }
  }

  #[derive(Default)]
  pub struct RecordingWindows {
    pub focused: Mutex<Vec<ClientId>>,
    pub opened: Mutex<Vec<String>>,
  }

  impl WindowControl for RecordingWindows {
    fn focus(&self, client: ClientId) -> Result<()> {
      self.focused.lock().unwrap().push(client);
      Ok(())
    }

    fn open(&self, url: &str) -> Result<()> {
      self.opened.lock().unwrap().push(url.to_string());
      Ok(())
    }
  }
}

#[cfg(test)]
mod tests {
  use super::testing::{RecordingSink, RecordingWindows};
  use super::*;

  fn dispatcher() -> (
    Arc<RecordingSink>,
    Arc<RecordingWindows>,
    Arc<ClientRegistry>,
    NotificationDispatcher,
  ) {
    let sink = Arc::new(RecordingSink::default());
    let windows = Arc::new(RecordingWindows::default());
    let clients = Arc::new(ClientRegistry::new());
    let dispatcher = NotificationDispatcher::new(
      Arc::clone(&sink) as Arc<dyn NotificationSink>,
      Arc::clone(&windows) as Arc<dyn WindowControl>,
      Arc::clone(&clients),
      "http://app.local/".to_string(),
    );
    (sink, windows, clients, dispatcher)
  }

  #[test]
  fn test_dismiss_closes_without_window_action() {
    let (sink, windows, _clients, dispatcher) = dispatcher();

    dispatcher.handle_click("task-1", Some("dismiss")).unwrap();

    assert_eq!(sink.closed.lock().unwrap().as_slice(), ["task-1"]);
    assert!(windows.focused.lock().unwrap().is_empty());
    assert!(windows.opened.lock().unwrap().is_empty());
  }

  #[test]
  fn test_view_focuses_existing_root_client() {
    let (_sink, windows, clients, dispatcher) = dispatcher();
    let (id, _rx) = clients.connect("http://app.local/");

    dispatcher.handle_click("task-1", Some("view")).unwrap();

    assert_eq!(windows.focused.lock().unwrap().as_slice(), [id]);
    assert!(windows.opened.lock().unwrap().is_empty());
  }

  #[test]
  fn test_body_click_opens_window_when_no_root_client() {
    let (_sink, windows, clients, dispatcher) = dispatcher();
    let (_id, _rx) = clients.connect("http://app.local/settings");

    dispatcher.handle_click("task-1", None).unwrap();

    assert!(windows.focused.lock().unwrap().is_empty());
    assert_eq!(
      windows.opened.lock().unwrap().as_slice(),
      ["http://app.local/"]
    );
  }
}
