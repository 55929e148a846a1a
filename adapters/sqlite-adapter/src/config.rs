//! Configuration for the SQLite offer store.
//!
//! Environment variables are loaded and validated up front so a bad value
//! fails at startup rather than on the first storage call.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Configuration error.
#[derive(Debug, thiserror::Error)]
#[error("configuration error for {field}: {message}")]
pub struct ConfigError {
    pub field: &'static str,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqliteConfig {
    /// Database file, or `:memory:` (default: ./data/offers.db)
    pub path: PathBuf,
    /// Number of pooled connections (default: 4)
    pub pool_size: usize,
    /// How long a statement waits on a locked database (default: 5s)
    pub busy_timeout: Duration,
    /// Longest wait for a free pooled connection (default: 30s)
    pub acquire_timeout: Duration,
    /// Skip `CREATE TABLE IF NOT EXISTS` for tables this process already
    /// provisioned (default: false, every call re-checks)
    pub remember_tables: bool,
}

pub const MAX_POOL_SIZE: usize = 64;

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./data/offers.db"),
            pool_size: 4,
            busy_timeout: Duration::from_millis(5_000),
            acquire_timeout: Duration::from_millis(30_000),
            remember_tables: false,
        }
    }
}

impl SqliteConfig {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    pub fn in_memory() -> Self {
        Self {
            path: PathBuf::from(":memory:"),
            pool_size: 1,
            ..Self::default()
        }
    }

    pub fn is_in_memory(&self) -> bool {
        self.path.as_os_str() == ":memory:"
    }

    /// Load and validate configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Same as [`SqliteConfig::from_env`], reading values through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let path = lookup("OFFER_DB_PATH")
            .filter(|s| !s.is_empty())
            .map(PathBuf::from)
            .unwrap_or(defaults.path);

        let pool_size = match lookup("OFFER_DB_POOL_SIZE") {
            Some(raw) => parse_number("OFFER_DB_POOL_SIZE", &raw)?,
            None => defaults.pool_size,
        };

        let busy_timeout = match lookup("OFFER_DB_BUSY_TIMEOUT_MS") {
            Some(raw) => Duration::from_millis(parse_number("OFFER_DB_BUSY_TIMEOUT_MS", &raw)?),
            None => defaults.busy_timeout,
        };

        let acquire_timeout = match lookup("OFFER_DB_ACQUIRE_TIMEOUT_MS") {
            Some(raw) => {
                Duration::from_millis(parse_number("OFFER_DB_ACQUIRE_TIMEOUT_MS", &raw)?)
            }
            None => defaults.acquire_timeout,
        };

        let remember_tables = lookup("OFFER_DB_REMEMBER_TABLES")
            .map(|s| matches!(s.to_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(defaults.remember_tables);

        let config = Self {
            path,
            pool_size,
            busy_timeout,
            acquire_timeout,
            remember_tables,
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject values the store cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pool_size == 0 || self.pool_size > MAX_POOL_SIZE {
            return Err(ConfigError {
                field: "OFFER_DB_POOL_SIZE",
                message: format!(
                    "must be between 1 and {MAX_POOL_SIZE}, got {}",
                    self.pool_size
                ),
            });
        }
        Ok(())
    }
}

fn parse_number<T: std::str::FromStr>(field: &'static str, raw: &str) -> Result<T, ConfigError> {
    raw.trim().parse().map_err(|_| ConfigError {
        field,
        message: format!("expected a non-negative integer, got {raw:?}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(pairs: &[(&str, &str)]) -> Result<SqliteConfig, ConfigError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        SqliteConfig::from_lookup(|k| vars.get(k).cloned())
    }

    #[test]
    fn defaults_when_unset() {
        assert_eq!(load(&[]).unwrap(), SqliteConfig::default());
    }

    #[test]
    fn reads_all_fields() {
        let cfg = load(&[
            ("OFFER_DB_PATH", "/tmp/o.db"),
            ("OFFER_DB_POOL_SIZE", "8"),
            ("OFFER_DB_BUSY_TIMEOUT_MS", "250"),
            ("OFFER_DB_ACQUIRE_TIMEOUT_MS", "1000"),
            ("OFFER_DB_REMEMBER_TABLES", "YES"),
        ])
        .unwrap();
        assert_eq!(cfg.path, PathBuf::from("/tmp/o.db"));
        assert_eq!(cfg.pool_size, 8);
        assert_eq!(cfg.busy_timeout, Duration::from_millis(250));
        assert_eq!(cfg.acquire_timeout, Duration::from_secs(1));
        assert!(cfg.remember_tables);
    }

    #[test]
    fn rejects_bad_pool_size() {
        let err = load(&[("OFFER_DB_POOL_SIZE", "0")]).unwrap_err();
        assert_eq!(err.field, "OFFER_DB_POOL_SIZE");
        assert!(load(&[("OFFER_DB_POOL_SIZE", "65")]).is_err());
        assert!(load(&[("OFFER_DB_POOL_SIZE", "many")]).is_err());
    }

    #[test]
    fn hand_built_config_is_validated() {
        let config = SqliteConfig {
            pool_size: 0,
            ..SqliteConfig::default()
        };
        assert_eq!(config.validate().unwrap_err().field, "OFFER_DB_POOL_SIZE");
        assert!(SqliteConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_bad_timeouts() {
        let err = load(&[("OFFER_DB_BUSY_TIMEOUT_MS", "-5")]).unwrap_err();
        assert_eq!(err.field, "OFFER_DB_BUSY_TIMEOUT_MS");
        assert!(err.to_string().starts_with("configuration error for OFFER_DB_BUSY_TIMEOUT_MS"));
    }

    #[test]
    fn in_memory_detection() {
        assert!(SqliteConfig::in_memory().is_in_memory());
        assert!(load(&[("OFFER_DB_PATH", ":memory:")]).unwrap().is_in_memory());
        assert!(!SqliteConfig::new("offers.db").is_in_memory());
    }
}
