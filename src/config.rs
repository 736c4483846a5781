use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cache::CacheConfig;

/// Environment variable naming a config file when no path is given.
const CONFIG_ENV: &str = "TAGCACHE_CONFIG";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub api: ApiConfig,
  #[serde(default)]
  pub cache: CacheSettings,
  #[serde(default)]
  pub log: LogConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
  /// Base URL that request descriptor paths are joined onto
  pub base_url: String,
  /// Path of the token refresh endpoint; 401s are final when unset
  pub refresh_path: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheSettings {
  /// Grace period before an unused entry is evicted
  #[serde(default = "default_keep_unused_for_secs")]
  pub keep_unused_for_secs: u64,
  pub stale_time_secs: Option<u64>,
}

fn default_keep_unused_for_secs() -> u64 {
  60
}

impl Default for CacheSettings {
  fn default() -> Self {
    Self {
      keep_unused_for_secs: default_keep_unused_for_secs(),
      stale_time_secs: None,
    }
  }
}

impl From<&CacheSettings> for CacheConfig {
  fn from(settings: &CacheSettings) -> Self {
    CacheConfig {
      keep_unused_for: Duration::from_secs(settings.keep_unused_for_secs),
      stale_time: settings.stale_time_secs.map(Duration::from_secs),
    }
  }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LogConfig {
  /// Write logs to this file instead of stderr
  pub file: Option<PathBuf>,
  /// Filter directives, overridden by RUST_LOG
  pub filter: Option<String>,
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided, else $TAGCACHE_CONFIG
  /// 2. ./tagcache.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/tagcache/config.yaml
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let requested = explicit_path
      .map(Path::to_path_buf)
      .or_else(|| std::env::var_os(CONFIG_ENV).map(PathBuf::from));

    let path = match requested {
      Some(p) if p.exists() => p,
      Some(p) => return Err(eyre!("Config file not found: {}", p.display())),
      None => Self::find_config_file().ok_or_else(|| {
        eyre!(
          "No configuration file found. Create one at ~/.config/tagcache/config.yaml\n\
           See config.example.yaml for the format."
        )
      })?,
    };

    Self::load_from_path(&path)
  }

  fn find_config_file() -> Option<PathBuf> {
    // Project-local file wins over the user config
    let local = PathBuf::from("tagcache.yaml");
    if local.exists() {
      return Some(local);
    }

    // XDG config directory
    dirs::config_dir()
      .map(|dir| dir.join("tagcache").join("config.yaml"))
      .filter(|path| path.exists())
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents).map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  fn parse(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents)?;
    url::Url::parse(&config.api.base_url)
      .map_err(|e| eyre!("Invalid api.base_url {}: {}", config.api.base_url, e))?;
    Ok(config)
  }

  pub fn cache_config(&self) -> CacheConfig {
    CacheConfig::from(&self.cache)
  }

  /// Get the API access token from environment variables.
  ///
  /// Checks TAGCACHE_API_TOKEN first, then API_TOKEN as fallback.
  pub fn get_api_token() -> Result<String> {
    std::env::var("TAGCACHE_API_TOKEN")
      .or_else(|_| std::env::var("API_TOKEN"))
      .map_err(|_| {
        eyre!("API token not found. Set TAGCACHE_API_TOKEN or API_TOKEN environment variable.")
      })
  }

  /// Refresh token used when the access token expires, from TAGCACHE_REFRESH_TOKEN.
  pub fn get_refresh_token() -> Option<String> {
    std::env::var("TAGCACHE_REFRESH_TOKEN")
      .ok()
      .filter(|t| !t.is_empty())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_parse_minimal() {
    let config = Config::parse("api:\n  base_url: https://pm.example.test/api/\n").unwrap();
    assert_eq!(config.api.base_url, "https://pm.example.test/api/");
    assert!(config.api.refresh_path.is_none());
    assert_eq!(config.cache_config(), CacheConfig::default());
    assert!(config.log.file.is_none());
  }

  #[test]
  fn test_parse_full() {
    let yaml = r#"
api:
  base_url: https://pm.example.test/api/
  refresh_path: /auth/refresh
cache:
  keep_unused_for_secs: 5
  stale_time_secs: 30
log:
  file: /tmp/tagcache.log
  filter: tagcache=debug
"#;
    let config = Config::parse(yaml).unwrap();
    assert_eq!(config.api.refresh_path.as_deref(), Some("/auth/refresh"));
    assert_eq!(
      config.cache_config(),
      CacheConfig::new(Duration::from_secs(5)).with_stale_time(Duration::from_secs(30))
    );
    assert_eq!(config.log.filter.as_deref(), Some("tagcache=debug"));
  }

  #[test]
  fn test_parse_rejects_bad_base_url() {
    assert!(Config::parse("api:\n  base_url: not a url\n").is_err());
  }

  #[test]
  fn test_missing_explicit_path() {
    let err = Config::load(Some(Path::new("/nonexistent/tagcache.yaml"))).unwrap_err();
    assert!(err.to_string().contains("Config file not found"));
  }

  #[test]
  fn test_env_path_is_used_without_explicit_path() {
    std::env::set_var(CONFIG_ENV, "/nonexistent/from-env.yaml");
    let err = Config::load(None).unwrap_err();
    std::env::remove_var(CONFIG_ENV);
    assert!(err.to_string().contains("/nonexistent/from-env.yaml"));
  }
}
