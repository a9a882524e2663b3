use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cache::{CachePolicy, Category, PolicyTable};
use crate::polling::Profile;

/// Environment variable that overrides `api.url`.
pub const API_URL_ENV: &str = "BOTDECK_API_URL";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
  pub api: ApiConfig,
  pub cache: CacheConfig,
  pub realtime: RealtimeConfig,
  pub polling: PollingConfig,
  /// Extra polling profiles, or replacements for the built-in ones
  pub profiles: HashMap<String, Profile>,
  /// Custom title for the header (defaults to the API host)
  pub title: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
  pub url: String,
  pub timeout_secs: u64,
}

impl Default for ApiConfig {
  fn default() -> Self {
    Self {
      url: "http://localhost:8095".to_string(),
      timeout_secs: 10,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  /// Disable to send every read to the server
  pub enabled: bool,
  /// Total size limit of cached values in bytes
  pub max_bytes: Option<usize>,
  /// Per-category overrides of the default policy table
  pub policies: HashMap<Category, CachePolicy>,
  /// Prefetch instances, metrics and versions on startup
  pub warmup: bool,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      enabled: true,
      max_bytes: None,
      policies: HashMap::new(),
      warmup: true,
    }
  }
}

impl CacheConfig {
  pub fn policy_table(&self) -> PolicyTable {
    PolicyTable::with_overrides(&self.policies)
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RealtimeConfig {
  pub reconnect_attempts: u32,
  pub reconnect_delay_ms: u64,
}

impl Default for RealtimeConfig {
  fn default() -> Self {
    Self {
      reconnect_attempts: 3,
      reconnect_delay_ms: 2000,
    }
  }
}

impl RealtimeConfig {
  pub fn reconnect_delay(&self) -> Duration {
    Duration::from_millis(self.reconnect_delay_ms)
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
  /// Adapt the instance list interval to how often it changes
  pub smart_instances: bool,
}

impl Default for PollingConfig {
  fn default() -> Self {
    Self {
      smart_instances: true,
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./botdeck.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/botdeck/config.yaml
  ///
  /// With no file at all the defaults are used. `BOTDECK_API_URL` overrides
  /// the API URL either way.
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

    let mut config = match path {
      Some(p) => Self::load_from_path(&p)?,
      None => Config::default(),
    };

    if let Ok(url) = std::env::var(API_URL_ENV) {
      config.api.url = url;
    }

    Ok(config)
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("botdeck.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("botdeck").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  pub fn parse(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents)?;
    Ok(config)
  }

  /// Directory for the log file.
  pub fn data_dir() -> PathBuf {
    dirs::data_local_dir()
      .map(|d| d.join("botdeck"))
      .unwrap_or_else(|| PathBuf::from("."))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_empty_config_uses_defaults() {
    let config = Config::parse("{}").unwrap();
    assert_eq!(config.api.url, "http://localhost:8095");
    assert!(config.cache.enabled);
    assert_eq!(config.realtime.reconnect_attempts, 3);
    assert_eq!(config.realtime.reconnect_delay(), Duration::from_secs(2));
    assert!(config.profiles.is_empty());
  }

  #[test]
  fn test_full_config() {
    let config = Config::parse(
      r#"
api:
  url: https://bots.example.com
title: Production
cache:
  enabled: false
  policies:
    instances: { ttl_ms: 5000, max_size: 3 }
realtime:
  reconnect_attempts: 5
profiles:
  quiet:
    instances: { interval_ms: 120000 }
    systemStats: { enabled: false }
"#,
    )
    .unwrap();

    assert_eq!(config.api.url, "https://bots.example.com");
    assert_eq!(config.api.timeout_secs, 10);
    assert_eq!(config.title.as_deref(), Some("Production"));
    assert!(!config.cache.enabled);
    assert_eq!(config.realtime.reconnect_attempts, 5);
    assert_eq!(config.realtime.reconnect_delay_ms, 2000);

    let table = config.cache.policy_table();
    assert_eq!(
      table.get(Category::Instances),
      CachePolicy::new(Duration::from_secs(5), Some(3))
    );
    // Untouched categories keep their defaults
    assert_eq!(
      table.get(Category::Versions),
      PolicyTable::default().get(Category::Versions)
    );

    let quiet = &config.profiles["quiet"];
    assert_eq!(
      quiet.tasks["instances"].interval(),
      Some(Duration::from_secs(120))
    );
    assert_eq!(quiet.tasks["systemStats"].enabled, Some(false));
  }

  #[test]
  fn test_missing_explicit_path() {
    let result = Config::load(Some(Path::new("/definitely/not/here.yaml")));
    assert!(result.is_err());
  }
}
