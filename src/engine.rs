//! Event dispatch: one task per platform event, keep-alive by handle.

use chrono::Utc;
use color_eyre::Result;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::channel::{ClientMessage, ClientRegistry, ControlChannel};
use crate::config::Config;
use crate::deferred::DeferredWorkEngine;
use crate::fetch::Fetcher;
use crate::identity::InterceptedRequest;
use crate::lifecycle::{LifecycleManager, TakeoverSignal};
use crate::notify::{NotificationDispatcher, NotificationSink, WindowControl};
use crate::router::{RequestRouter, RoutedResponse};
use crate::store::CacheStore;

/// An event delivered by the platform.
#[derive(Debug, Clone)]
pub enum PlatformEvent {
  Install,
  Activate,
  Fetch { url: String, navigation: bool },
  Sync { tag: String },
  PeriodicSync { tag: String },
  Push { payload: Option<String> },
  Message { message: ClientMessage },
  NotificationClick { tag: String, action: Option<String> },
}

/// What a dispatched event produced.
#[derive(Debug)]
pub enum EventOutcome {
  Completed,
  /// Install aborted; the previous generation keeps serving
  InstallFailed,
  /// Routing result for a fetch event; `None` is the absence signal
  Response(Option<RoutedResponse>),
}

/// The wired engine: every component sharing one store, one fetcher, one
/// client registry.
pub struct Engine<S, F> {
  lifecycle: LifecycleManager<S, F>,
  router: RequestRouter<S, F>,
  deferred: DeferredWorkEngine<S>,
  channel: ControlChannel<S>,
  clients: Arc<ClientRegistry>,
  notifier: Arc<NotificationDispatcher>,
}

impl<S: CacheStore + 'static, F: Fetcher> Engine<S, F> {
  pub fn new(
    store: Arc<S>,
    fetcher: Arc<F>,
    config: Arc<Config>,
    sink: Arc<dyn NotificationSink>,
    windows: Arc<dyn WindowControl>,
  ) -> Result<Self> {
    let takeover = TakeoverSignal::default();
    let clients = Arc::new(ClientRegistry::new());
    let notifier = Arc::new(NotificationDispatcher::new(
      sink,
      windows,
      Arc::clone(&clients),
      config.root_url()?.to_string(),
    ));

    Ok(Self {
      lifecycle: LifecycleManager::new(
        Arc::clone(&store),
        Arc::clone(&fetcher),
        Arc::clone(&config),
        takeover.clone(),
      ),
      router: RequestRouter::new(Arc::clone(&store), fetcher, Arc::clone(&config)),
      deferred: DeferredWorkEngine::new(
        Arc::clone(&store),
        Arc::clone(&config),
        Arc::clone(&clients),
        Arc::clone(&notifier),
      ),
      channel: ControlChannel::new(store, config, takeover),
      clients,
      notifier,
    })
  }

  /// Connected application clients.
  pub fn clients(&self) -> &Arc<ClientRegistry> {
    &self.clients
  }

  /// Dispatch one platform event as its own task.
  ///
  /// The returned handle is the keep-alive: the platform (or a test)
  /// awaits it to guarantee the event's asynchronous work runs to
  /// completion instead of being torn down mid-operation.
  pub fn dispatch(self: &Arc<Self>, event: PlatformEvent) -> JoinHandle<EventOutcome> {
    let engine = Arc::clone(self);
    tokio::spawn(async move { engine.handle(event).await })
  }

  /// Handle one event to completion.
  ///
  /// Failures stay inside the engine: they are logged and surface to the
  /// application only as absent content or a failed install, never as an
  /// error value crossing this boundary.
  pub async fn handle(&self, event: PlatformEvent) -> EventOutcome {
    match event {
      PlatformEvent::Install => match self.lifecycle.install().await {
        Ok(()) => EventOutcome::Completed,
        Err(err) => {
          warn!(error = %err, "install failed, previous generation keeps serving");
          EventOutcome::InstallFailed
        }
      },
      PlatformEvent::Activate => {
        if let Err(err) = self.lifecycle.activate(&self.clients).await {
          warn!(error = %err, "activation failed");
        }
        EventOutcome::Completed
      }
      PlatformEvent::Fetch { url, navigation } => {
        let request = InterceptedRequest { url, navigation };
        match self.router.route(&request).await {
          Ok(routed) => EventOutcome::Response(routed),
          Err(err) => {
            warn!(url = %request.url, error = %err, "routing fault, reporting absence");
            EventOutcome::Response(None)
          }
        }
      }
      PlatformEvent::Sync { tag } => {
        self.deferred.on_sync(&tag).await;
        EventOutcome::Completed
      }
      PlatformEvent::PeriodicSync { tag } => {
        self.deferred.on_periodic(&tag, Utc::now()).await;
        EventOutcome::Completed
      }
      PlatformEvent::Push { payload } => {
        self.deferred.on_push(payload.as_deref()).await;
        EventOutcome::Completed
      }
      PlatformEvent::Message { message } => {
        if let Err(err) = self.channel.handle(message) {
          warn!(error = %err, "control message failed");
        }
        EventOutcome::Completed
      }
      PlatformEvent::NotificationClick { tag, action } => {
        if let Err(err) = self.notifier.handle_click(&tag, action.as_deref()) {
          warn!(error = %err, "notification click handling failed");
        }
        EventOutcome::Completed
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::fetch::StaticFetcher;
  use crate::notify::testing::{RecordingSink, RecordingWindows};
  use crate::router::ServedFrom;
  use crate::store::{MemoryStore, ResponseSnapshot};

  fn engine(fetcher: StaticFetcher) -> Arc<Engine<MemoryStore, StaticFetcher>> {
    let config = Arc::new(Config {
      origin: "http://app.local".to_string(),
      shell_assets: vec!["/".to_string(), "/app.js".to_string()],
      ..Config::default()
    });
    Arc::new(
      Engine::new(
        Arc::new(MemoryStore::new()),
        Arc::new(fetcher),
        config,
        Arc::new(RecordingSink::default()),
        Arc::new(RecordingWindows::default()),
      )
      .unwrap(),
    )
  }

  fn html(body: &[u8]) -> ResponseSnapshot {
    ResponseSnapshot {
      status: 200,
      headers: vec![("content-type".to_string(), "text/html".to_string())],
      body: body.to_vec(),
    }
  }

  #[tokio::test]
  async fn test_install_then_offline_shell_serving() {
    let fetcher = StaticFetcher::new()
      .with("http://app.local/", html(b"root"))
      .with("http://app.local/app.js", html(b"js"));
    let engine = engine(fetcher);

    // Keep-alive: each event is awaited through its dispatch handle.
    let outcome = engine.dispatch(PlatformEvent::Install).await.unwrap();
    assert!(matches!(outcome, EventOutcome::Completed));
    let outcome = engine.dispatch(PlatformEvent::Activate).await.unwrap();
    assert!(matches!(outcome, EventOutcome::Completed));

    // The canned fetcher has no entry for this URL: network is down for
    // it, so the shell must come from cache.
    let outcome = engine
      .dispatch(PlatformEvent::Fetch {
        url: "http://app.local/app.js".to_string(),
        navigation: false,
      })
      .await
      .unwrap();

    match outcome {
      EventOutcome::Response(Some(routed)) => {
        assert_eq!(routed.served_from, ServedFrom::Cache);
        assert_eq!(routed.snapshot.body, b"js");
      }
      other => panic!("unexpected outcome: {:?}", other),
    }
  }

  #[tokio::test]
  async fn test_install_failure_reports_and_survives() {
    // Only one of the two shell assets resolves.
    let fetcher = StaticFetcher::new().with("http://app.local/", html(b"root"));
    let engine = engine(fetcher);

    let outcome = engine.dispatch(PlatformEvent::Install).await.unwrap();
    assert!(matches!(outcome, EventOutcome::InstallFailed));

    // The engine keeps handling events afterwards.
    let outcome = engine.dispatch(PlatformEvent::Activate).await.unwrap();
    assert!(matches!(outcome, EventOutcome::Completed));
  }

  #[tokio::test]
  async fn test_routing_fault_surfaces_as_absence() {
    let engine = engine(StaticFetcher::new());

    let outcome = engine
      .dispatch(PlatformEvent::Fetch {
        url: "not a url".to_string(),
        navigation: false,
      })
      .await
      .unwrap();

    assert!(matches!(outcome, EventOutcome::Response(None)));
  }
}
