//! Request interception and cache-vs-network resolution.

use color_eyre::Result;
use std::sync::Arc;
use tracing::debug;

use crate::config::Config;
use crate::fetch::Fetcher;
use crate::identity::{InterceptedRequest, RequestClass, RequestIdentity};
use crate::store::{CacheStore, ResponseSnapshot};

/// Where a routed response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServedFrom {
  /// Live network response
  Network,
  /// Cached snapshot
  Cache,
  /// Cached root document substituted for a failed navigation
  NavigationFallback,
}

/// Outcome of routing one intercepted request.
#[derive(Debug, Clone)]
pub struct RoutedResponse {
  pub snapshot: ResponseSnapshot,
  pub served_from: ServedFrom,
}

/// Applies the per-category resolution strategy to intercepted requests.
///
/// Data requests go network-first with cache fallback; shell requests go
/// cache-first with network fallback and, for navigations, the cached
/// root document as a last resort. Absence (`Ok(None)`) is the caller's
/// failed-request signal.
pub struct RequestRouter<S, F> {
  store: Arc<S>,
  fetcher: Arc<F>,
  config: Arc<Config>,
}

impl<S: CacheStore, F: Fetcher> RequestRouter<S, F> {
  pub fn new(store: Arc<S>, fetcher: Arc<F>, config: Arc<Config>) -> Self {
    Self {
      store,
      fetcher,
      config,
    }
  }

  pub async fn route(&self, request: &InterceptedRequest) -> Result<Option<RoutedResponse>> {
    let identity = RequestIdentity::parse(&request.url)?;

    // Classification comes before any cache or network decision; a data
    // identity never routes as shell even if a shell entry exists for it.
    match RequestClass::of(&identity, &self.config.data_path_prefix) {
      RequestClass::Data => self.route_data(&identity).await,
      RequestClass::Shell => self.route_shell(request, &identity).await,
    }
  }

  /// Network first; successful responses are copied into the data
  /// generation before being returned live.
  async fn route_data(&self, identity: &RequestIdentity) -> Result<Option<RoutedResponse>> {
    let record = self.store.read_versions()?;
    let generation = record
      .data_version
      .unwrap_or_else(|| self.config.data_generation());

    match self.fetcher.fetch(identity.as_str()).await {
      Ok(snapshot) => {
        if snapshot.is_success() {
          self.store.put_entry(&generation, identity, &snapshot)?;
        }
        Ok(Some(RoutedResponse {
          snapshot,
          served_from: ServedFrom::Network,
        }))
      }
      Err(err) => {
        // Expected while offline, not an error condition.
        debug!(url = identity.as_str(), error = %err, "data fetch failed, trying cache");
        match self.store.get_entry(&generation, identity)? {
          Some(entry) => Ok(Some(RoutedResponse {
            snapshot: entry.snapshot,
            served_from: ServedFrom::Cache,
          })),
          None => Ok(None),
        }
      }
    }
  }

  /// Cache strictly wins; freshness is generation versioning, so there is
  /// no staleness check and a hit never touches the network.
  async fn route_shell(
    &self,
    request: &InterceptedRequest,
    identity: &RequestIdentity,
  ) -> Result<Option<RoutedResponse>> {
    let record = self.store.read_versions()?;
    let generation = record
      .shell_version
      .unwrap_or_else(|| self.config.shell_generation());

    if let Some(entry) = self.store.get_entry(&generation, identity)? {
      return Ok(Some(RoutedResponse {
        snapshot: entry.snapshot,
        served_from: ServedFrom::Cache,
      }));
    }

    match self.fetcher.fetch(identity.as_str()).await {
      // Not written back: shell content enters the store only at install.
      Ok(snapshot) => Ok(Some(RoutedResponse {
        snapshot,
        served_from: ServedFrom::Network,
      })),
      Err(err) => {
        debug!(url = identity.as_str(), error = %err, "shell fetch failed");
        if request.navigation {
          let root = RequestIdentity::parse(self.config.root_url()?.as_str())?;
          if let Some(entry) = self.store.get_entry(&generation, &root)? {
            return Ok(Some(RoutedResponse {
              snapshot: entry.snapshot,
              served_from: ServedFrom::NavigationFallback,
            }));
          }
        }
        Ok(None)
      }
    }
  }
}
