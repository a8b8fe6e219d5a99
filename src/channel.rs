//! Control channel: addressed messages from clients, best-effort
//! broadcasts back out, and the registry of connected clients.

use color_eyre::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::config::Config;
use crate::identity::RequestIdentity;
use crate::lifecycle::TakeoverSignal;
use crate::store::{CacheStore, ResponseSnapshot};
use crate::tasks::{encode_groups, TaskGroups};

pub type ClientId = u64;

/// Message addressed to the engine by a client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum ClientMessage {
  /// Force the pending install to take control immediately
  #[serde(rename = "SKIP_WAITING")]
  SkipWaiting,
  /// Replace the pushed task snapshot wholesale
  #[serde(rename = "CACHE_TASK_DATA")]
  CacheTaskData { tasks: TaskGroups },
}

/// Message pushed from the engine to clients.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum OutboundMessage {
  /// A reconciliation pass finished
  #[serde(rename = "SYNC_COMPLETE")]
  SyncComplete { status: String },
}

struct ClientEntry {
  id: ClientId,
  url: String,
  controlled: bool,
  sender: mpsc::UnboundedSender<OutboundMessage>,
}

#[derive(Default)]
struct RegistryInner {
  next_id: ClientId,
  clients: Vec<ClientEntry>,
}

/// Registry of currently connected application clients.
#[derive(Default)]
pub struct ClientRegistry {
  inner: Mutex<RegistryInner>,
}

impl ClientRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  /// Register a client viewing `url`; returns its id and message stream.
  pub fn connect(&self, url: &str) -> (ClientId, mpsc::UnboundedReceiver<OutboundMessage>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
    let id = inner.next_id;
    inner.next_id += 1;
    inner.clients.push(ClientEntry {
      id,
      url: url.to_string(),
      controlled: false,
      sender: tx,
    });
    (id, rx)
  }

  pub fn disconnect(&self, id: ClientId) {
    let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
    inner.clients.retain(|c| c.id != id);
  }

  /// Take control of every connected client. Returns how many.
  pub fn claim_all(&self) -> usize {
    let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
    for client in &mut inner.clients {
      client.controlled = true;
    }
    inner.clients.len()
  }

  /// Best-effort broadcast to all connected clients.
  ///
  /// The send loop runs over a snapshot of handles taken at call time; a
  /// client that disconnects after the snapshot is a dropped message, not
  /// an error. Returns the number of clients the message reached.
  pub fn broadcast(&self, message: &OutboundMessage) -> usize {
    let snapshot: Vec<(ClientId, mpsc::UnboundedSender<OutboundMessage>)> = {
      let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
      inner
        .clients
        .iter()
        .map(|c| (c.id, c.sender.clone()))
        .collect()
    };

    let mut delivered = 0;
    for (id, sender) in snapshot {
      match sender.send(message.clone()) {
        Ok(()) => delivered += 1,
        Err(_) => debug!(client = id, "client went away before delivery, dropping message"),
      }
    }
    delivered
  }

  /// First client currently showing `url`, if any.
  pub fn find_showing(&self, url: &str) -> Option<ClientId> {
    let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
    inner.clients.iter().find(|c| c.url == url).map(|c| c.id)
  }

  /// How many connected clients this engine currently controls.
  pub fn controlled_count(&self) -> usize {
    let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
    inner.clients.iter().filter(|c| c.controlled).count()
  }

  pub fn is_empty(&self) -> bool {
    let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
    inner.clients.is_empty()
  }
}

/// Identity under which the pushed task snapshot lives in the data
/// generation. Offline routing of the same path serves it directly.
pub fn task_snapshot_identity(config: &Config) -> Result<RequestIdentity> {
  RequestIdentity::parse_with_base(&config.task_snapshot_path, &config.origin_url()?)
}

/// Handles inbound control messages.
pub struct ControlChannel<S> {
  store: Arc<S>,
  config: Arc<Config>,
  takeover: TakeoverSignal,
}

impl<S: CacheStore> ControlChannel<S> {
  pub fn new(store: Arc<S>, config: Arc<Config>, takeover: TakeoverSignal) -> Self {
    Self {
      store,
      config,
      takeover,
    }
  }

  pub fn handle(&self, message: ClientMessage) -> Result<()> {
    match message {
      ClientMessage::SkipWaiting => {
        info!("client requested immediate takeover");
        self.takeover.request();
        Ok(())
      }
      ClientMessage::CacheTaskData { tasks } => self.store_snapshot(&tasks),
    }
  }

  /// Wholesale single-key overwrite of the pushed snapshot.
  fn store_snapshot(&self, groups: &TaskGroups) -> Result<()> {
    let record = self.store.read_versions()?;
    let generation = record
      .data_version
      .unwrap_or_else(|| self.config.data_generation());
    let identity = task_snapshot_identity(&self.config)?;
    let body = encode_groups(groups)?;

    self
      .store
      .put_entry(&generation, &identity, &ResponseSnapshot::json(body))?;

    debug!(generation = %generation, "task snapshot replaced");
    Ok(())
  }
}
