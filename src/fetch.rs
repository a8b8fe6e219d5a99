//! Network fetching behind a trait so routing and lifecycle logic can be
//! exercised without a live server.

use color_eyre::{eyre::eyre, Result};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::store::ResponseSnapshot;

/// Trait for the outbound network channel.
///
/// An `Err` means the network itself failed (timeout, DNS, connection
/// refused). A reachable server answering with a non-success status is a
/// successful fetch carrying that status.
pub trait Fetcher: Send + Sync + 'static {
  fn fetch(&self, url: &str) -> impl Future<Output = Result<ResponseSnapshot>> + Send;
}

/// HTTP fetcher backed by reqwest.
#[derive(Clone)]
pub struct HttpFetcher {
  client: reqwest::Client,
}

impl HttpFetcher {
  pub fn new() -> Result<Self> {
    let client = reqwest::Client::builder()
      .timeout(Duration::from_secs(30))
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self { client })
  }
}

impl Fetcher for HttpFetcher {
  async fn fetch(&self, url: &str) -> Result<ResponseSnapshot> {
    let response = self
      .client
      .get(url)
      .send()
      .await
      .map_err(|e| eyre!("Network fetch failed for {}: {}", url, e))?;

    let status = response.status().as_u16();
    let headers = response
      .headers()
      .iter()
      .map(|(name, value)| {
        (
          name.as_str().to_string(),
          String::from_utf8_lossy(value.as_bytes()).into_owned(),
        )
      })
      .collect();

    let body = response
      .bytes()
      .await
      .map_err(|e| eyre!("Failed to read response body from {}: {}", url, e))?
      .to_vec();

    Ok(ResponseSnapshot {
      status,
      headers,
      body,
    })
  }
}

/// Fetcher serving canned responses from a fixed table.
///
/// Used for hermetic runs and tests. A URL with no entry behaves as a
/// network failure; the call counter records every attempt either way.
#[derive(Default)]
pub struct StaticFetcher {
  responses: HashMap<String, ResponseSnapshot>,
  calls: AtomicUsize,
}

impl StaticFetcher {
  pub fn new() -> Self {
    Self::default()
  }

  /// Register a canned response for a URL.
  pub fn with(mut self, url: &str, snapshot: ResponseSnapshot) -> Self {
    self.responses.insert(url.to_string(), snapshot);
    self
  }

  /// Number of fetch attempts made so far.
  pub fn calls(&self) -> usize {
    self.calls.load(Ordering::SeqCst)
  }
}

impl Fetcher for StaticFetcher {
  async fn fetch(&self, url: &str) -> Result<ResponseSnapshot> {
    self.calls.fetch_add(1, Ordering::SeqCst);
    match self.responses.get(url) {
      Some(snapshot) => Ok(snapshot.clone()),
      None => Err(eyre!("Network unreachable for {}", url)),
    }
  }
}
