use color_eyre::{eyre::eyre, Result};
use indexmap::IndexMap;
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  #[serde(default)]
  pub origin: OriginConfig,
  /// Cache namespaces; an absent table means the built-in set
  #[serde(default = "default_namespaces")]
  pub namespaces: IndexMap<String, NamespaceConfig>,
  #[serde(default)]
  pub worker: WorkerConfig,
  #[serde(default)]
  pub queue: QueueConfig,
  #[serde(default)]
  pub notifications: NotificationConfig,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      origin: OriginConfig::default(),
      namespaces: default_namespaces(),
      worker: WorkerConfig::default(),
      queue: QueueConfig::default(),
      notifications: NotificationConfig::default(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct OriginConfig {
  /// Base URL of the marketplace backend
  #[serde(default = "default_origin_url")]
  pub url: String,
  #[serde(default = "default_locale")]
  pub locale: String,
  #[serde(default = "default_region")]
  pub region: String,
}

impl Default for OriginConfig {
  fn default() -> Self {
    Self {
      url: default_origin_url(),
      locale: default_locale(),
      region: default_region(),
    }
  }
}

/// TTL and size policy for one cache namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct NamespaceConfig {
  pub max_age_ms: u64,
  pub max_items: usize,
}

impl NamespaceConfig {
  pub const fn new(max_age_ms: u64, max_items: usize) -> Self {
    Self {
      max_age_ms,
      max_items,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WorkerConfig {
  /// Generation version; bumping it is the only migration mechanism
  #[serde(default = "default_worker_version")]
  pub version: u32,
  #[serde(default = "default_precache")]
  pub precache: Vec<String>,
  /// Regexes matched against the request path to select network-first routing
  #[serde(default = "default_api_patterns")]
  pub api_patterns: Vec<String>,
  #[serde(default = "default_offline_page")]
  pub offline_page: String,
  #[serde(default = "default_true")]
  pub skip_waiting: bool,
  #[serde(default = "default_sync_tag")]
  pub sync_tag: String,
  #[serde(default = "default_periodic_tag")]
  pub periodic_tag: String,
  #[serde(default = "default_periodic_urls")]
  pub periodic_urls: Vec<String>,
}

impl Default for WorkerConfig {
  fn default() -> Self {
    Self {
      version: default_worker_version(),
      precache: default_precache(),
      api_patterns: default_api_patterns(),
      offline_page: default_offline_page(),
      skip_waiting: true,
      sync_tag: default_sync_tag(),
      periodic_tag: default_periodic_tag(),
      periodic_urls: default_periodic_urls(),
    }
  }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct QueueConfig {
  #[serde(default)]
  pub retry: RetryPolicy,
}

/// What to do with an action whose replay keeps failing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct RetryPolicy {
  /// `None` keeps the action at the head of the queue forever
  #[serde(default)]
  pub max_attempts: Option<u32>,
}

impl RetryPolicy {
  pub const fn forever() -> Self {
    Self { max_attempts: None }
  }

  pub const fn dead_letter_after(attempts: u32) -> Self {
    Self {
      max_attempts: Some(attempts),
    }
  }

  /// Whether an action that has now failed `attempts` times should be dropped.
  pub fn exhausted(&self, attempts: u32) -> bool {
    self.max_attempts.is_some_and(|max| attempts >= max)
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NotificationConfig {
  #[serde(default = "default_notification_title")]
  pub default_title: String,
  #[serde(default = "default_icon")]
  pub icon: String,
  /// Destination opened by the "view" action
  #[serde(default = "default_view_url")]
  pub view_url: String,
}

impl Default for NotificationConfig {
  fn default() -> Self {
    Self {
      default_title: default_notification_title(),
      icon: default_icon(),
      view_url: default_view_url(),
    }
  }
}

pub fn default_namespaces() -> IndexMap<String, NamespaceConfig> {
  IndexMap::from([
    ("opportunities".to_string(), NamespaceConfig::new(5 * 60 * 1000, 100)),
    ("skills".to_string(), NamespaceConfig::new(30 * 60 * 1000, 50)),
    ("profiles".to_string(), NamespaceConfig::new(10 * 60 * 1000, 50)),
    ("projects".to_string(), NamespaceConfig::new(5 * 60 * 1000, 100)),
  ])
}

fn default_origin_url() -> String {
  "http://localhost:3000".to_string()
}

fn default_locale() -> String {
  "en".to_string()
}

fn default_region() -> String {
  "global".to_string()
}

fn default_worker_version() -> u32 {
  1
}

fn default_precache() -> Vec<String> {
  ["/", "/index.html", "/manifest.json", "/offline.html", "/favicon.ico"]
    .into_iter()
    .map(String::from)
    .collect()
}

fn default_api_patterns() -> Vec<String> {
  vec!["^/api/".to_string(), "^/rest/v1/".to_string()]
}

fn default_offline_page() -> String {
  "/offline.html".to_string()
}

fn default_true() -> bool {
  true
}

fn default_sync_tag() -> String {
  "sync-actions".to_string()
}

fn default_periodic_tag() -> String {
  "refresh-content".to_string()
}

fn default_periodic_urls() -> Vec<String> {
  vec!["/api/opportunities".to_string(), "/api/skills".to_string()]
}

fn default_notification_title() -> String {
  "Freelance Marketplace".to_string()
}

fn default_icon() -> String {
  "/icon-192.png".to_string()
}

fn default_view_url() -> String {
  "/dashboard".to_string()
}

impl Config {
  /// Load configuration from file, falling back to defaults.
  ///
  /// Search order:
  /// 1. Explicit path if provided (must exist)
  /// 2. ./gigsync.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/gigsync/config.yaml
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

    let config = match path {
      Some(p) => Self::load_from_path(&p)?,
      None => Self::default(),
    };
    config.validate()?;
    Ok(config)
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("gigsync.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("gigsync").join("config.yaml");
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
    let config: Config = serde_yaml::from_str(contents)?;
    Ok(config)
  }

  /// Reject policies the cache cannot honor.
  pub fn validate(&self) -> Result<()> {
    for (name, ns) in &self.namespaces {
      if ns.max_items == 0 {
        return Err(eyre!("Namespace '{}' must allow at least one item", name));
      }
      // `cache_{a}_` must never be a prefix of `cache_{b}_`
      let prefix = format!("{}_", name);
      if let Some(other) = self.namespaces.keys().find(|other| other.starts_with(&prefix)) {
        return Err(eyre!(
          "Namespace '{}' overlaps namespace '{}' in durable storage",
          other,
          name
        ));
      }
    }
    for pattern in &self.worker.api_patterns {
      regex::Regex::new(pattern)
        .map_err(|e| eyre!("Invalid API pattern '{}': {}", pattern, e))?;
    }
    url::Url::parse(&self.origin.url)
      .map_err(|e| eyre!("Invalid origin url '{}': {}", self.origin.url, e))?;
    Ok(())
  }

  /// Directory for the durable cache, queue and logs.
  pub fn data_dir() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("gigsync"))
  }
}
