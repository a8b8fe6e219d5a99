//! Generation lifecycle: install populates and promotes, activate sweeps.

use color_eyre::{eyre::eyre, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::channel::ClientRegistry;
use crate::config::Config;
use crate::fetch::Fetcher;
use crate::identity::RequestIdentity;
use crate::store::{CacheStore, VersionRecord};

/// Shared flag set when a freshly installed version should take control
/// without waiting for existing clients to release the previous one.
///
/// Install raises it on success; a SKIP_WAITING control message raises it
/// as well. Activate consumes it.
#[derive(Clone, Default)]
pub struct TakeoverSignal(Arc<AtomicBool>);

impl TakeoverSignal {
  pub fn request(&self) {
    self.0.store(true, Ordering::SeqCst);
  }

  pub fn is_requested(&self) -> bool {
    self.0.load(Ordering::SeqCst)
  }

  /// Read and clear.
  pub fn take(&self) -> bool {
    self.0.swap(false, Ordering::SeqCst)
  }
}

/// Drives generation creation on install and garbage collection on
/// activate. At most one generation per role is current at any time; the
/// persisted version record is the only handle that makes a generation
/// reachable.
pub struct LifecycleManager<S, F> {
  store: Arc<S>,
  fetcher: Arc<F>,
  config: Arc<Config>,
  takeover: TakeoverSignal,
}

/// What an activate sweep did.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
  pub retained: Vec<String>,
  pub deleted: Vec<String>,
}

impl<S: CacheStore, F: Fetcher> LifecycleManager<S, F> {
  pub fn new(
    store: Arc<S>,
    fetcher: Arc<F>,
    config: Arc<Config>,
    takeover: TakeoverSignal,
  ) -> Self {
    Self {
      store,
      fetcher,
      config,
      takeover,
    }
  }

  /// Install the shell generation for the configured version.
  ///
  /// Fetches every shell asset, then stores them in one all-or-nothing
  /// batch and promotes the version record. Any asset failure aborts the
  /// whole install: nothing is promoted and the previous current
  /// generation keeps serving.
  pub async fn install(&self) -> Result<()> {
    let shell_generation = self.config.shell_generation();
    let origin = self.config.origin_url()?;

    info!(generation = %shell_generation, "installing shell generation");

    let fetches = self.config.shell_assets.iter().map(|path| {
      let url = origin
        .join(path)
        .map_err(|e| eyre!("Invalid shell asset path '{}': {}", path, e));
      async move {
        let url = url?;
        let snapshot = self.fetcher.fetch(url.as_str()).await?;
        if !snapshot.is_success() {
          return Err(eyre!(
            "Shell asset {} returned status {}",
            url,
            snapshot.status
          ));
        }
        Ok((RequestIdentity::parse(url.as_str())?, snapshot))
      }
    });

    let entries = futures::future::try_join_all(fetches).await?;
    self.store.put_entries(&shell_generation, &entries)?;

    // Promotion: one atomic record write advances both roles. From here
    // on, older generation names are unreachable and sweep-eligible.
    self.store.write_versions(&VersionRecord {
      shell_version: Some(shell_generation.clone()),
      data_version: Some(self.config.data_generation()),
    })?;

    // Ready to supersede the running version without waiting for its
    // clients to release it.
    self.takeover.request();

    info!(
      generation = %shell_generation,
      assets = self.config.shell_assets.len(),
      "install complete"
    );
    Ok(())
  }

  /// Sweep superseded generations and claim connected clients.
  ///
  /// Deletes every generation whose name is not current for either role.
  /// A generation being actively served is never a target: the record was
  /// updated before its old name became sweep-eligible. Individual delete
  /// failures are logged and skipped.
  pub async fn activate(&self, clients: &ClientRegistry) -> Result<SweepReport> {
    let record = self.store.read_versions()?;
    let mut report = SweepReport::default();

    for name in self.store.list_generations()? {
      if record.is_current(&name) {
        report.retained.push(name);
        continue;
      }
      match self.store.delete_generation(&name) {
        Ok(()) => {
          debug!(generation = %name, "swept superseded generation");
          report.deleted.push(name);
        }
        Err(err) => {
          warn!(generation = %name, error = %err, "failed to sweep generation, skipping");
        }
      }
    }

    if self.takeover.take() {
      debug!("takeover was requested, claiming without waiting");
    }
    let claimed = clients.claim_all();

    info!(
      deleted = report.deleted.len(),
      retained = report.retained.len(),
      claimed, "activation complete"
    );
    Ok(report)
  }

  /// Force the pending install to finish taking control immediately.
  pub fn skip_waiting(&self) {
    self.takeover.request();
  }
}
