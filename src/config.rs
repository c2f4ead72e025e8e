use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use url::Url;

use crate::surface::ContextKind;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
  #[serde(default)]
  pub app: AppConfig,
  #[serde(default)]
  pub notifications: NotificationConfig,
  #[serde(default)]
  pub network: NetworkConfig,
  #[serde(default)]
  pub storage: StorageConfig,
  #[serde(default)]
  pub logging: LoggingConfig,
  /// Application contexts the local host registers at startup
  #[serde(default)]
  pub contexts: Vec<ContextConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
  /// Application root; its origin decides same- vs cross-origin requests
  #[serde(default = "default_scope")]
  pub scope: String,
  /// Version string naming the current cache generation
  #[serde(default = "default_cache_name")]
  pub cache_name: String,
  /// Same-origin resources that must all be cached before install succeeds
  #[serde(default = "default_seed_resources")]
  pub seed_resources: Vec<String>,
  /// Cross-origin resources cached on a best-effort basis
  #[serde(default = "default_opportunistic_resources")]
  pub opportunistic_resources: Vec<String>,
}

impl Default for AppConfig {
  fn default() -> Self {
    Self {
      scope: default_scope(),
      cache_name: default_cache_name(),
      seed_resources: default_seed_resources(),
      opportunistic_resources: default_opportunistic_resources(),
    }
  }
}

fn default_scope() -> String {
  "http://localhost:8080/".to_string()
}

fn default_cache_name() -> String {
  "code-manager-v1.0.0".to_string()
}

fn default_seed_resources() -> Vec<String> {
  vec![
    "./".to_string(),
    "./index.html".to_string(),
    "./manifest.json".to_string(),
  ]
}

fn default_opportunistic_resources() -> Vec<String> {
  [96, 144, 192, 512]
    .iter()
    .map(|size| format!("https://img.icons8.com/color/{}/000000/wifi-logo.png", size))
    .collect()
}

impl AppConfig {
  pub fn scope_url(&self) -> Result<Url> {
    Url::parse(&self.scope).map_err(|e| eyre!("Invalid app scope {}: {}", self.scope, e))
  }

  /// Seed resources resolved against the scope. Seeds must share the
  /// scope's origin; cross-origin assets belong in `opportunistic_resources`.
  pub fn seed_urls(&self) -> Result<Vec<Url>> {
    let scope = self.scope_url()?;
    self
      .seed_resources
      .iter()
      .map(|r| {
        let url = scope
          .join(r)
          .map_err(|e| eyre!("Invalid seed resource {}: {}", r, e))?;
        if url.origin() != scope.origin() {
          return Err(eyre!(
            "Seed resource {} is not on the application origin {}",
            url,
            scope.origin().ascii_serialization()
          ));
        }
        Ok(url)
      })
      .collect()
  }

  /// Opportunistic resources resolved against the scope.
  pub fn opportunistic_urls(&self) -> Result<Vec<Url>> {
    let scope = self.scope_url()?;
    self
      .opportunistic_resources
      .iter()
      .map(|r| {
        scope
          .join(r)
          .map_err(|e| eyre!("Invalid opportunistic resource {}: {}", r, e))
      })
      .collect()
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NotificationConfig {
  #[serde(default = "default_title")]
  pub title: String,
  #[serde(default = "default_body")]
  pub body: String,
  #[serde(default = "default_icon")]
  pub icon: String,
  #[serde(default = "default_badge")]
  pub badge: String,
  #[serde(default = "default_vibrate")]
  pub vibrate: Vec<u32>,
  /// Target URL used when a push payload carries none
  #[serde(default = "default_url")]
  pub default_url: String,
}

impl Default for NotificationConfig {
  fn default() -> Self {
    Self {
      title: default_title(),
      body: default_body(),
      icon: default_icon(),
      badge: default_badge(),
      vibrate: default_vibrate(),
      default_url: default_url(),
    }
  }
}

fn default_title() -> String {
  "Code Manager".to_string()
}

fn default_body() -> String {
  "Notification from Code Manager".to_string()
}

fn default_icon() -> String {
  "https://img.icons8.com/color/192/000000/wifi-logo.png".to_string()
}

fn default_badge() -> String {
  "https://img.icons8.com/color/96/000000/wifi-logo.png".to_string()
}

fn default_vibrate() -> Vec<u32> {
  vec![100, 50, 100]
}

fn default_url() -> String {
  "./".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct NetworkConfig {
  #[serde(default = "default_timeout_secs")]
  pub timeout_secs: u64,
  #[serde(default = "default_user_agent")]
  pub user_agent: String,
}

impl Default for NetworkConfig {
  fn default() -> Self {
    Self {
      timeout_secs: default_timeout_secs(),
      user_agent: default_user_agent(),
    }
  }
}

fn default_timeout_secs() -> u64 {
  30
}

fn default_user_agent() -> String {
  concat!("shellcache/", env!("CARGO_PKG_VERSION")).to_string()
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StorageConfig {
  /// Cache database path (default: $XDG_DATA_HOME/shellcache/cache.db)
  pub path: Option<PathBuf>,
}

impl StorageConfig {
  pub fn resolve_path(&self) -> Result<PathBuf> {
    if let Some(path) = &self.path {
      return Ok(path.clone());
    }

    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("shellcache").join("cache.db"))
  }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoggingConfig {
  /// Directory for the daily-rolling log file; stderr only when unset
  pub dir: Option<PathBuf>,
  /// Filter directive used when RUST_LOG is not set
  pub filter: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContextConfig {
  pub url: String,
  #[serde(default)]
  pub kind: ContextKind,
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./shellcache.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/shellcache/config.yaml
  ///
  /// Falls back to the built-in defaults when no file is found.
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
    let local = PathBuf::from("shellcache.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("shellcache").join("config.yaml");
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
    config.app.seed_urls()?;
    Ok(config)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_defaults_match_code_manager() {
    let config = Config::default();
    assert_eq!(config.app.cache_name, "code-manager-v1.0.0");
    assert_eq!(config.notifications.title, "Code Manager");
    assert_eq!(config.notifications.vibrate, vec![100, 50, 100]);
    assert_eq!(config.app.opportunistic_resources.len(), 4);
  }

  #[test]
  fn test_seed_urls_resolve_against_scope() {
    let app = AppConfig {
      scope: "https://example.com/codes/".to_string(),
      ..AppConfig::default()
    };
    let seeds: Vec<String> = app
      .seed_urls()
      .unwrap()
      .into_iter()
      .map(String::from)
      .collect();
    assert_eq!(
      seeds,
      vec![
        "https://example.com/codes/",
        "https://example.com/codes/index.html",
        "https://example.com/codes/manifest.json",
      ]
    );
  }

  #[test]
  fn test_cross_origin_seed_is_rejected() {
    let app = AppConfig {
      scope: "https://example.com/codes/".to_string(),
      seed_resources: vec![
        "./index.html".to_string(),
        "https://cdn.example.net/app.js".to_string(),
      ],
      ..AppConfig::default()
    };
    assert!(app.seed_urls().is_err());

    let result = Config::from_yaml(
      r#"
app:
  scope: "https://example.com/"
  seed_resources:
    - "http://example.com/index.html"
"#,
    );
    assert!(result.is_err());
  }

  #[test]
  fn test_partial_yaml_keeps_defaults() {
    let config = Config::from_yaml(
      r#"
app:
  scope: "https://codes.example.org/"
  cache_name: "code-manager-v2"
notifications:
  title: "Codes"
contexts:
  - url: "https://codes.example.org/"
    kind: window
"#,
    )
    .unwrap();

    assert_eq!(config.app.cache_name, "code-manager-v2");
    assert_eq!(config.app.seed_resources.len(), 3);
    assert_eq!(config.notifications.title, "Codes");
    assert_eq!(config.notifications.body, "Notification from Code Manager");
    assert_eq!(config.network.timeout_secs, 30);
    assert_eq!(config.contexts.len(), 1);
    assert_eq!(config.contexts[0].kind, ContextKind::Window);
  }

  #[test]
  fn test_invalid_scope_is_rejected() {
    assert!(Config::from_yaml("app:\n  scope: \"not a url\"\n").is_err());
  }

  #[test]
  fn test_missing_explicit_path_is_an_error() {
    assert!(Config::load(Some(Path::new("/nonexistent/shellcache.yaml"))).is_err());
  }
}
