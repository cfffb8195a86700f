use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable holding the API bearer token.
pub const TOKEN_ENV: &str = "SHIPSYNC_API_TOKEN";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub api: ApiConfig,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub sync: SyncConfig,
  #[serde(default)]
  pub reachability: ReachabilityConfig,
  #[serde(default)]
  pub storage: StorageConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
  /// Base URL including the version prefix, e.g. https://api.example.com/api/v1
  pub base_url: String,
  #[serde(default = "default_request_timeout")]
  pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
  #[serde(default = "default_ttl")]
  pub ttl_secs: u64,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      ttl_secs: default_ttl(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
  /// Send attempts before a queued write is dropped
  #[serde(default = "default_max_retry")]
  pub max_retry: u32,
}

impl Default for SyncConfig {
  fn default() -> Self {
    Self {
      max_retry: default_max_retry(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReachabilityConfig {
  /// URL probed with HEAD; defaults to the API base URL
  pub probe_url: Option<String>,
  #[serde(default = "default_probe_interval")]
  pub probe_interval_secs: u64,
}

impl Default for ReachabilityConfig {
  fn default() -> Self {
    Self {
      probe_url: None,
      probe_interval_secs: default_probe_interval(),
    }
  }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StorageConfig {
  /// SQLite file (defaults to the platform data directory)
  pub path: Option<PathBuf>,
}

fn default_request_timeout() -> u64 {
  30
}

fn default_ttl() -> u64 {
  24 * 60 * 60
}

fn default_max_retry() -> u32 {
  shipsync::queue::DEFAULT_MAX_RETRY
}

fn default_probe_interval() -> u64 {
  15
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./shipsync.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/shipsync/config.yaml
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
      None => Err(eyre!(
        "No configuration file found. Create one at ~/.config/shipsync/config.yaml"
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("shipsync.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("shipsync").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;
    Self::parse(&contents).map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  fn parse(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents)?;
    if config.sync.max_retry == 0 {
      return Err(eyre!("sync.max_retry must be at least 1"));
    }
    config.cache_ttl()?;
    Ok(config)
  }

  pub fn request_timeout(&self) -> Duration {
    Duration::from_secs(self.api.request_timeout_secs)
  }

  pub fn cache_ttl(&self) -> Result<chrono::Duration> {
    i64::try_from(self.cache.ttl_secs)
      .ok()
      .and_then(chrono::Duration::try_seconds)
      .ok_or_else(|| eyre!("cache.ttl_secs is out of range: {}", self.cache.ttl_secs))
  }

  pub fn probe_interval(&self) -> Duration {
    Duration::from_secs(self.reachability.probe_interval_secs)
  }

  pub fn probe_url(&self) -> &str {
    self
      .reachability
      .probe_url
      .as_deref()
      .unwrap_or(&self.api.base_url)
  }
}
