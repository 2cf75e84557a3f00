use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  /// Backend origin, e.g. "https://pos.example.com"
  pub origin: String,
  /// Per-request timeout for backend calls
  #[serde(default = "default_request_timeout_secs")]
  pub request_timeout_secs: u64,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub queue: QueueConfig,
  #[serde(default)]
  pub realtime: RealtimeConfig,
  #[serde(default)]
  pub connectivity: ConnectivityConfig,
  #[serde(default)]
  pub notifications: NotificationsConfig,
  #[serde(default)]
  pub logging: LoggingConfig,
}

const MAX_RECONNECT_INTERVAL_SECS: u64 = 3600;

fn default_request_timeout_secs() -> u64 {
  15
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  /// Namespace prefix shared by every cache this client owns
  pub name: String,
  /// Namespaces carrying any other version are deleted on activation
  pub version: String,
  /// Routes and files pinned at install
  pub static_assets: Vec<String>,
  /// API reads warmed at install; failures are tolerated
  pub prewarm: Vec<String>,
  /// Skip the persistent store entirely and behave as a purely online client
  pub disabled: bool,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      name: "till".to_string(),
      version: "v1".to_string(),
      static_assets: vec![
        "/".to_string(),
        "/index.html".to_string(),
        "/manifest.json".to_string(),
        "/static/js/main.js".to_string(),
        "/static/css/main.css".to_string(),
      ],
      prewarm: vec![
        "/api/products".to_string(),
        "/api/categories".to_string(),
        "/api/inventory".to_string(),
      ],
      disabled: false,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
  /// Entity types with an offline queue, drained in this order
  pub entity_types: Vec<String>,
  /// Replay endpoint overrides keyed by entity type
  pub endpoints: HashMap<String, EndpointConfig>,
}

impl Default for QueueConfig {
  fn default() -> Self {
    Self {
      entity_types: vec!["sales".to_string(), "inventory".to_string()],
      endpoints: HashMap::new(),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EndpointConfig {
  #[serde(default = "default_method")]
  pub method: String,
  /// Path on the origin; `{id}` is replaced with the payload's `"id"`,
  /// or the mutation id when it has none
  pub path: String,
}

fn default_method() -> String {
  "POST".to_string()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RealtimeConfig {
  pub enabled: bool,
  /// Channel endpoint as "host:port" (a "tcp://" prefix is accepted)
  pub url: Option<String>,
  pub heartbeat_secs: u64,
  pub reconnect_interval_secs: u64,
  pub max_reconnect_attempts: u32,
  pub auto_reconnect: bool,
}

impl Default for RealtimeConfig {
  fn default() -> Self {
    Self {
      enabled: true,
      url: None,
      heartbeat_secs: 30,
      reconnect_interval_secs: 3,
      max_reconnect_attempts: 5,
      auto_reconnect: true,
    }
  }
}

impl RealtimeConfig {
  pub fn heartbeat(&self) -> Duration {
    Duration::from_secs(self.heartbeat_secs)
  }

  pub fn reconnect_interval(&self) -> Duration {
    Duration::from_secs(self.reconnect_interval_secs)
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConnectivityConfig {
  pub probe_path: String,
  pub probe_interval_secs: u64,
}

impl Default for ConnectivityConfig {
  fn default() -> Self {
    Self {
      probe_path: "/api/health".to_string(),
      probe_interval_secs: 15,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NotificationsConfig {
  /// How many recent events to keep for activity listings
  pub capacity: usize,
}

impl Default for NotificationsConfig {
  fn default() -> Self {
    Self { capacity: 20 }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
  /// Default filter when RUST_LOG is unset
  pub level: String,
  /// Log directory (default: $XDG_DATA_HOME/till/logs)
  pub directory: Option<PathBuf>,
}

impl Default for LoggingConfig {
  fn default() -> Self {
    Self {
      level: "info".to_string(),
      directory: None,
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./till.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/till/config.yaml
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
        "No configuration file found. Create one at ~/.config/till/config.yaml\n\
                 It needs at least an `origin:` entry."
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("till.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("till").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::from_yaml(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  pub fn from_yaml(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents).map_err(|e| eyre!("{}", e))?;
    url::Url::parse(&config.origin)
      .map_err(|e| eyre!("Invalid origin '{}': {}", config.origin, e))?;
    if config.realtime.heartbeat_secs == 0 {
      return Err(eyre!("realtime.heartbeat_secs must be greater than zero"));
    }
    if config.realtime.reconnect_interval_secs > MAX_RECONNECT_INTERVAL_SECS {
      return Err(eyre!(
        "realtime.reconnect_interval_secs must be at most {}",
        MAX_RECONNECT_INTERVAL_SECS
      ));
    }
    Ok(config)
  }

  pub fn request_timeout(&self) -> Duration {
    Duration::from_secs(self.request_timeout_secs)
  }

  /// Get the backend API token from environment variables.
  ///
  /// Checks TILL_API_TOKEN first, then POS_API_TOKEN as fallback. Requests go
  /// out unauthenticated when neither is set.
  pub fn api_token() -> Option<String> {
    std::env::var("TILL_API_TOKEN")
      .or_else(|_| std::env::var("POS_API_TOKEN"))
      .ok()
      .filter(|t| !t.is_empty())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_minimal_config_uses_defaults() {
    let config = Config::from_yaml("origin: https://pos.example.com\n").unwrap();
    assert_eq!(config.cache.name, "till");
    assert_eq!(config.queue.entity_types, vec!["sales", "inventory"]);
    assert_eq!(config.realtime.heartbeat(), Duration::from_secs(30));
    assert_eq!(config.notifications.capacity, 20);
    assert!(config.realtime.url.is_none());
  }

  #[test]
  fn test_endpoint_overrides() {
    let yaml = r#"
origin: https://pos.example.com
queue:
  entity_types: [sales]
  endpoints:
    inventory:
      method: PUT
      path: /api/inventory/{id}
realtime:
  url: pos.example.com:9000
  max_reconnect_attempts: 3
"#;
    let config = Config::from_yaml(yaml).unwrap();
    assert_eq!(config.queue.entity_types, vec!["sales"]);
    let endpoint = &config.queue.endpoints["inventory"];
    assert_eq!(endpoint.method, "PUT");
    assert_eq!(endpoint.path, "/api/inventory/{id}");
    assert_eq!(config.realtime.max_reconnect_attempts, 3);
    assert_eq!(config.realtime.heartbeat_secs, 30);
  }

  #[test]
  fn test_invalid_origin_is_rejected() {
    assert!(Config::from_yaml("origin: not a url\n").is_err());
  }

  #[test]
  fn test_unusable_realtime_timings_are_rejected() {
    let zero_heartbeat = "origin: https://pos.example.com\nrealtime:\n  heartbeat_secs: 0\n";
    assert!(Config::from_yaml(zero_heartbeat).is_err());

    let huge_interval =
      "origin: https://pos.example.com\nrealtime:\n  reconnect_interval_secs: 18446744073709551615\n";
    assert!(Config::from_yaml(huge_interval).is_err());

    let zero_interval = "origin: https://pos.example.com\nrealtime:\n  reconnect_interval_secs: 0\n";
    assert!(Config::from_yaml(zero_interval).is_ok());
  }
}
