use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use url::Url;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
  /// Origin of the application server; relative asset paths resolve against it
  pub origin: String,
  /// Build version encoded into generation names (shell-<v>, data-<v>)
  pub cache_version: String,
  /// Reserved path prefix that marks a request as a data request
  pub data_path_prefix: String,
  /// Fixed shell-asset paths fetched and stored during install
  pub shell_assets: Vec<String>,
  /// Data path under which the pushed task snapshot is stored
  pub task_snapshot_path: String,
  /// Background-sync tag this engine answers to
  pub sync_tag: String,
  /// Periodic-sync tag this engine answers to
  pub periodic_sync_tag: String,
  #[serde(rename = "notification")]
  pub notifications: NotificationConfig,
  /// Cache database location (default: platform data dir)
  pub db_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
  pub icon: String,
  pub badge: String,
}

impl Default for NotificationConfig {
  fn default() -> Self {
    Self {
      icon: "/icons/icon-192.png".to_string(),
      badge: "/icons/badge-72.png".to_string(),
    }
  }
}

impl Default for Config {
  fn default() -> Self {
    Self {
      origin: "http://localhost:8080".to_string(),
      cache_version: "v1".to_string(),
      data_path_prefix: "/api/".to_string(),
      shell_assets: vec![
        "/".to_string(),
        "/index.html".to_string(),
        "/styles.css".to_string(),
        "/app.js".to_string(),
        "/manifest.json".to_string(),
        "/icons/icon-192.png".to_string(),
      ],
      task_snapshot_path: "/api/tasks".to_string(),
      sync_tag: "sync-tasks".to_string(),
      periodic_sync_tag: "check-reminders".to_string(),
      notifications: NotificationConfig::default(),
      db_path: None,
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./tideover.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/tideover/config.yaml
  ///
  /// If no file is found, built-in defaults are used (an empty file is
  /// also valid: every field has a default).
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Ok(Self::default()),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("tideover.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("tideover").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    let config: Config = serde_yaml::from_str(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))?;

    Ok(config)
  }

  /// The application origin as a parsed URL.
  pub fn origin_url(&self) -> Result<Url> {
    Url::parse(&self.origin).map_err(|e| eyre!("Invalid origin '{}': {}", self.origin, e))
  }

  /// Absolute URL of the root document (the navigation-fallback target).
  pub fn root_url(&self) -> Result<Url> {
    let origin = self.origin_url()?;
    origin
      .join("/")
      .map_err(|e| eyre!("Failed to build root URL: {}", e))
  }

  /// Generation name for the shell role at the configured version.
  pub fn shell_generation(&self) -> String {
    format!("shell-{}", self.cache_version)
  }

  /// Generation name for the data role at the configured version.
  pub fn data_generation(&self) -> String {
    format!("data-{}", self.cache_version)
  }

  /// Default database path under the platform data directory.
  pub fn database_path(&self) -> Result<PathBuf> {
    if let Some(p) = &self.db_path {
      return Ok(p.clone());
    }

    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("tideover").join("cache.db"))
  }
}
