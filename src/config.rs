use std::fs;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::error::Error;

/// Top-level configuration for the caching query layer.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub clickhouse: ClickHouseSettings,
    #[serde(default)]
    pub cache: CacheSettings,
}

/// Connection settings for the analytical database. Fixed for the pool's
/// lifetime; there is no hot-reload.
#[derive(Debug, Deserialize, Clone)]
pub struct ClickHouseSettings {
    #[serde(default = "default_host")]
    pub host: String,
    /// Defaults to 8443 when `secure` is set, 8123 otherwise.
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default = "default_database")]
    pub database: String,
    #[serde(default = "default_user")]
    pub user: String,
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_true")]
    pub secure: bool,
    #[serde(default = "default_true")]
    pub verify: bool,
    /// Path to a PEM CA bundle for TLS verification.
    #[serde(default)]
    pub ca_bundle: Option<String>,
    /// Server-enforced maximum row count per query result.
    #[serde(default = "default_max_result_rows")]
    pub max_result_rows: u64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
}

impl Default for ClickHouseSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: None,
            database: default_database(),
            user: default_user(),
            password: String::new(),
            secure: true,
            verify: true,
            ca_bundle: None,
            max_result_rows: default_max_result_rows(),
            timeout_secs: default_timeout_secs(),
            pool_size: default_pool_size(),
        }
    }
}

/// Settings for the shared result cache.
#[derive(Debug, Deserialize, Clone)]
pub struct CacheSettings {
    #[serde(default = "default_cache_url")]
    pub url: String,
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
    /// When true, cache write failures fail the call instead of being
    /// logged and swallowed.
    #[serde(default)]
    pub strict_writes: bool,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            url: default_cache_url(),
            key_prefix: default_key_prefix(),
            ttl_secs: default_ttl_secs(),
            strict_writes: false,
        }
    }
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_database() -> String {
    "default".to_string()
}

fn default_user() -> String {
    "default".to_string()
}

fn default_true() -> bool {
    true
}

fn default_max_result_rows() -> u64 {
    2000
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_pool_size() -> usize {
    10
}

fn default_cache_url() -> String {
    "redis://localhost:6379".to_string()
}

fn default_key_prefix() -> String {
    "reservoir".to_string()
}

fn default_ttl_secs() -> u64 {
    300
}

impl Config {
    pub fn from_file(path: &str) -> Result<Self> {
        let content =
            fs::read_to_string(path).context(format!("Failed to read config file at {}", path))?;
        let mut config: Config = serde_yaml::from_str(&content)
            .context(format!("Failed to parse config file at {}", path))?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Build a configuration entirely from environment variables and
    /// defaults.
    pub fn from_env() -> Self {
        let mut config = Config::default();
        config.apply_env_overrides();
        config
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(host) = std::env::var("CLICKHOUSE_HOST") {
            self.clickhouse.host = host;
        }
        if let Ok(database) = std::env::var("CLICKHOUSE_DATABASE") {
            self.clickhouse.database = database;
        }
        if let Ok(user) = std::env::var("CLICKHOUSE_USER") {
            self.clickhouse.user = user;
        }
        if let Ok(password) = std::env::var("CLICKHOUSE_PASSWORD") {
            self.clickhouse.password = password;
        }
        if let Ok(secure) = std::env::var("CLICKHOUSE_SECURE") {
            self.clickhouse.secure = str_to_bool(&secure);
        }
        if let Ok(verify) = std::env::var("CLICKHOUSE_VERIFY") {
            self.clickhouse.verify = str_to_bool(&verify);
        }
        if let Ok(ca) = std::env::var("CLICKHOUSE_CA") {
            if !ca.is_empty() {
                self.clickhouse.ca_bundle = Some(ca);
            }
        }
        if let Ok(url) = std::env::var("REDIS_URL") {
            self.cache.url = url;
        }
    }

    /// Reject configurations that cannot possibly connect. Called once at
    /// startup; failures here are not recoverable.
    pub fn validate(&self) -> std::result::Result<(), Error> {
        if self.clickhouse.host.is_empty() {
            return Err(Error::Config("clickhouse.host must not be empty".into()));
        }
        if self.clickhouse.database.is_empty() {
            return Err(Error::Config(
                "clickhouse.database must not be empty".into(),
            ));
        }
        if self.cache.url.is_empty() {
            return Err(Error::Config("cache.url must not be empty".into()));
        }
        Ok(())
    }
}

fn str_to_bool(value: &str) -> bool {
    matches!(value.to_lowercase().as_str(), "true" | "1" | "yes")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_parsing() {
        let yaml = r#"
clickhouse:
  host: "ch.internal"
  database: "analytics"
  secure: false
  max_result_rows: 5000
cache:
  ttl_secs: 600
  strict_writes: true
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.clickhouse.host, "ch.internal");
        assert_eq!(config.clickhouse.database, "analytics");
        assert!(!config.clickhouse.secure);
        assert_eq!(config.clickhouse.max_result_rows, 5000);
        assert_eq!(config.clickhouse.user, "default");
        assert_eq!(config.clickhouse.pool_size, 10);
        assert_eq!(config.cache.ttl_secs, 600);
        assert!(config.cache.strict_writes);
        assert_eq!(config.cache.key_prefix, "reservoir");
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.clickhouse.host, "localhost");
        assert_eq!(config.clickhouse.timeout_secs, 30);
        assert_eq!(config.clickhouse.max_result_rows, 2000);
        assert_eq!(config.cache.ttl_secs, 300);
        assert!(!config.cache.strict_writes);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_empty_host() {
        let mut config = Config::default();
        config.clickhouse.host = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_str_to_bool() {
        assert!(str_to_bool("True"));
        assert!(str_to_bool("1"));
        assert!(!str_to_bool("false"));
        assert!(!str_to_bool(""));
    }
}
