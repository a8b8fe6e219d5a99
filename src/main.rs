use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use tideover::channel::ClientMessage;
use tideover::config::Config;
use tideover::engine::{Engine, EventOutcome, PlatformEvent};
use tideover::fetch::HttpFetcher;
use tideover::notify::{LogSink, LogWindows};
use tideover::store::{CacheStore, SqliteStore};

#[derive(Parser, Debug)]
#[command(name = "tideover")]
#[command(about = "Offline cache and deferred-sync engine for task reminders")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/tideover/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

/// Each subcommand delivers exactly one platform event into the engine.
/// The OS scheduler owns sync and periodic-sync cadence.
#[derive(Subcommand, Debug)]
enum Command {
  /// Fetch and store the shell generation for the configured version
  Install,
  /// Sweep superseded generations and claim clients
  Activate,
  /// Route one intercepted request through the cache policy
  Fetch {
    url: String,
    /// Treat the request as a top-level navigation
    #[arg(long)]
    navigate: bool,
  },
  /// Deliver a connectivity-restored signal
  Sync {
    /// Pending-sync tag (default: the configured sync tag)
    tag: Option<String>,
  },
  /// Deliver a periodic reminder-check signal
  PeriodicSync {
    /// Periodic tag (default: the configured periodic tag)
    tag: Option<String>,
  },
  /// Deliver a push payload
  Push {
    /// JSON payload with optional title and body
    payload: Option<String>,
  },
  /// Deliver a control message (JSON, e.g. {"type":"SKIP_WAITING"})
  Message { json: String },
  /// Show the current version record and stored generations
  Status,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let config = Arc::new(Config::load(args.config.as_deref())?);

  let _log_guard = init_tracing(&config)?;

  let store = Arc::new(SqliteStore::open(&config.database_path()?)?);

  if let Command::Status = args.command {
    return print_status(&store);
  }

  let engine = Arc::new(Engine::new(
    Arc::clone(&store),
    Arc::new(HttpFetcher::new()?),
    Arc::clone(&config),
    Arc::new(LogSink),
    Arc::new(LogWindows),
  )?);

  let event = match args.command {
    Command::Install => PlatformEvent::Install,
    Command::Activate => PlatformEvent::Activate,
    Command::Fetch { url, navigate } => PlatformEvent::Fetch {
      url,
      navigation: navigate,
    },
    Command::Sync { tag } => PlatformEvent::Sync {
      tag: tag.unwrap_or_else(|| config.sync_tag.clone()),
    },
    Command::PeriodicSync { tag } => PlatformEvent::PeriodicSync {
      tag: tag.unwrap_or_else(|| config.periodic_sync_tag.clone()),
    },
    Command::Push { payload } => PlatformEvent::Push { payload },
    Command::Message { json } => PlatformEvent::Message {
      message: serde_json::from_str::<ClientMessage>(&json)
        .map_err(|e| eyre!("Invalid control message: {}", e))?,
    },
    Command::Status => unreachable!("handled above"),
  };

  // Awaiting the dispatch handle is the keep-alive: the process stays up
  // until the event's asynchronous work has fully completed.
  let outcome = engine
    .dispatch(event)
    .await
    .map_err(|e| eyre!("Event task failed: {}", e))?;

  match outcome {
    EventOutcome::Completed => Ok(()),
    EventOutcome::InstallFailed => Err(eyre!(
      "Install failed; the previous generation keeps serving"
    )),
    EventOutcome::Response(Some(routed)) => {
      println!("{} ({:?})", routed.snapshot.status, routed.served_from);
      println!("{}", String::from_utf8_lossy(&routed.snapshot.body));
      Ok(())
    }
    EventOutcome::Response(None) => Err(eyre!("No response: network failed and nothing cached")),
  }
}

fn print_status(store: &SqliteStore) -> Result<()> {
  let record = store.read_versions()?;
  println!(
    "shell: {}",
    record.shell_version.as_deref().unwrap_or("(none)")
  );
  println!(
    "data:  {}",
    record.data_version.as_deref().unwrap_or("(none)")
  );
  for name in store.list_generations()? {
    let marker = if record.is_current(&name) { "*" } else { " " };
    println!("{} {}", marker, name);
  }
  Ok(())
}

fn init_tracing(config: &Config) -> Result<tracing_appender::non_blocking::WorkerGuard> {
  let log_dir = config
    .database_path()?
    .parent()
    .map(PathBuf::from)
    .ok_or_else(|| eyre!("Could not determine log directory"))?;

  let appender = tracing_appender::rolling::daily(log_dir, "tideover.log");
  let (writer, guard) = tracing_appender::non_blocking(appender);

  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .with_writer(writer)
    .with_ansi(false)
    .init();

  Ok(guard)
}
