use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::cache::DEFAULT_TTL_SECS;

/// Largest TTL chrono can represent
const MAX_TTL_SECS: i64 = i64::MAX / 1000;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
  #[serde(default)]
  pub freshservice: FreshserviceConfig,
  #[serde(default)]
  pub cache: CacheConfig,
  /// Write logs to this file instead of stderr
  pub log_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FreshserviceConfig {
  /// Account domain, e.g. "acme.freshservice.com"
  pub domain: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
  /// Root directory for persisted entries
  pub dir: Option<PathBuf>,
  /// Freshness window in seconds
  #[serde(default = "default_ttl_secs")]
  pub ttl_secs: u64,
  /// Keep entries on disk across runs (false = memory only)
  #[serde(default = "default_persist")]
  pub persist: bool,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      dir: None,
      ttl_secs: default_ttl_secs(),
      persist: default_persist(),
    }
  }
}

fn default_ttl_secs() -> u64 {
  DEFAULT_TTL_SECS as u64
}

fn default_persist() -> bool {
  true
}

/// First variable in `names` that is set to a non-empty value.
fn first_set(lookup: &impl Fn(&str) -> Option<String>, names: &[&str]) -> Option<String> {
  names
    .iter()
    .filter_map(|name| lookup(*name))
    .map(|v| v.trim().to_string())
    .find(|v| !v.is_empty())
}

impl Config {
  /// Load configuration from file, then apply environment overrides.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./fsmeta.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/fsmeta/config.yaml
  ///
  /// A missing config file is fine; everything can come from the environment.
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
      None => Config::default(),
    };

    config.with_env(|name| std::env::var(name).ok())
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("fsmeta.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("fsmeta").join("config.yaml");
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

  fn from_yaml(contents: &str) -> Result<Self> {
    // An empty file deserializes to unit, not to a mapping
    if contents.trim().is_empty() {
      return Ok(Config::default());
    }
    Ok(serde_yaml::from_str(contents)?)
  }

  /// Override file settings from environment variables.
  ///
  /// - `FRESHSERVICE_DOMAIN`
  /// - `CACHE_DIR`, then `FRESHSERVICE_CACHE_DIR`
  /// - `CACHE_TTL`, then `FRESHSERVICE_CACHE_TTL` (seconds)
  pub fn with_env(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
    if let Some(domain) = first_set(&lookup, &["FRESHSERVICE_DOMAIN"]) {
      self.freshservice.domain = Some(domain);
    }

    if let Some(dir) = first_set(&lookup, &["CACHE_DIR", "FRESHSERVICE_CACHE_DIR"]) {
      self.cache.dir = Some(PathBuf::from(dir));
    }

    if let Some(ttl) = first_set(&lookup, &["CACHE_TTL", "FRESHSERVICE_CACHE_TTL"]) {
      self.cache.ttl_secs = ttl
        .parse()
        .map_err(|_| eyre!("CACHE_TTL must be a whole number of seconds, got {:?}", ttl))?;
    }

    Ok(self)
  }

  /// Cache root: configured dir, else the per-user cache directory.
  pub fn cache_dir(&self) -> Result<PathBuf> {
    if let Some(dir) = &self.cache.dir {
      return Ok(dir.clone());
    }

    let cache_dir = dirs::cache_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".cache")))
      .ok_or_else(|| eyre!("Could not determine cache directory; set CACHE_DIR"))?;

    Ok(cache_dir.join("fsmeta"))
  }

  pub fn ttl(&self) -> chrono::Duration {
    let secs = i64::try_from(self.cache.ttl_secs).unwrap_or(i64::MAX);
    chrono::Duration::seconds(secs.min(MAX_TTL_SECS))
  }

  pub fn domain(&self) -> Result<&str> {
    self
      .freshservice
      .domain
      .as_deref()
      .ok_or_else(|| eyre!("Freshservice domain not set. Set FRESHSERVICE_DOMAIN or freshservice.domain in the config file."))
  }

  /// Get the Freshservice API key from the environment.
  pub fn get_api_key() -> Result<String> {
    std::env::var("FRESHSERVICE_APIKEY")
      .map_err(|_| eyre!("Freshservice API key not found. Set FRESHSERVICE_APIKEY environment variable."))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::collections::HashMap;

  fn env(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let vars: HashMap<String, String> = vars
      .iter()
      .map(|(k, v)| (k.to_string(), v.to_string()))
      .collect();
    move |name| vars.get(name).cloned()
  }

  #[test]
  fn test_defaults() {
    let config = Config::default().with_env(env(&[])).unwrap();

    assert_eq!(config.cache.ttl_secs, 3600);
    assert!(config.cache.persist);
    assert!(config.freshservice.domain.is_none());
    assert_eq!(config.ttl(), chrono::Duration::hours(1));
  }

  #[test]
  fn test_parse_yaml() {
    let config = Config::from_yaml(
      r#"
freshservice:
  domain: acme.freshservice.com
cache:
  dir: /var/cache/fsmeta
  ttl_secs: 600
log_file: /tmp/fsmeta.log
"#,
    )
    .unwrap();

    assert_eq!(config.domain().unwrap(), "acme.freshservice.com");
    assert_eq!(config.cache_dir().unwrap(), PathBuf::from("/var/cache/fsmeta"));
    assert_eq!(config.cache.ttl_secs, 600);
    assert!(config.cache.persist);
    assert_eq!(config.log_file, Some(PathBuf::from("/tmp/fsmeta.log")));
  }

  #[test]
  fn test_empty_yaml_is_default() {
    let config = Config::from_yaml("\n").unwrap();
    assert_eq!(config.cache.ttl_secs, 3600);
  }

  #[test]
  fn test_env_overrides_file() {
    let config = Config::from_yaml("cache:\n  ttl_secs: 600\n  persist: false\n")
      .unwrap()
      .with_env(env(&[
        ("CACHE_DIR", "/tmp/fs-cache"),
        ("CACHE_TTL", "90"),
        ("FRESHSERVICE_DOMAIN", "acme.freshservice.com"),
      ]))
      .unwrap();

    assert_eq!(config.cache_dir().unwrap(), PathBuf::from("/tmp/fs-cache"));
    assert_eq!(config.cache.ttl_secs, 90);
    assert!(!config.cache.persist);
    assert_eq!(config.domain().unwrap(), "acme.freshservice.com");
  }

  #[test]
  fn test_prefixed_env_names_are_fallbacks() {
    let config = Config::default()
      .with_env(env(&[
        ("FRESHSERVICE_CACHE_DIR", "/tmp/prefixed"),
        ("FRESHSERVICE_CACHE_TTL", "120"),
        ("CACHE_TTL", ""),
      ]))
      .unwrap();

    assert_eq!(config.cache.dir, Some(PathBuf::from("/tmp/prefixed")));
    assert_eq!(config.cache.ttl_secs, 120);

    let config = Config::default()
      .with_env(env(&[
        ("CACHE_DIR", "/tmp/plain"),
        ("FRESHSERVICE_CACHE_DIR", "/tmp/prefixed"),
      ]))
      .unwrap();
    assert_eq!(config.cache.dir, Some(PathBuf::from("/tmp/plain")));
  }

  #[test]
  fn test_invalid_ttl_is_rejected() {
    let err = Config::default()
      .with_env(env(&[("CACHE_TTL", "an hour")]))
      .unwrap_err();
    assert!(err.to_string().contains("CACHE_TTL"));
  }

  #[test]
  fn test_missing_domain_is_an_error() {
    assert!(Config::default().domain().is_err());
  }

  #[test]
  fn test_missing_explicit_config_file() {
    let err = Config::load(Some(Path::new("/definitely/not/here.yaml"))).unwrap_err();
    assert!(err.to_string().contains("Config file not found"));
  }
}
