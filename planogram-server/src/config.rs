//! Server configuration

use std::time::Duration;

use crate::shelf::lock::LockKeyScheme;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Clone)]
pub struct Config {
    /// PostgreSQL connection URL
    pub database_url: String,
    pub http_port: u16,
    /// Environment: development | staging | production
    pub environment: String,
    pub db_max_connections: u32,
    /// Maximum wait for a single shelf lock
    pub shelf_lock_timeout: Duration,
    /// Whole-action attempts after a lock timeout (0 = no retry)
    pub shelf_lock_retries: u32,
    /// Base backoff between attempts, doubled each time
    pub shelf_lock_backoff: Duration,
    pub lock_key_scheme: LockKeyScheme,
    pub log_level: String,
    pub log_json: bool,
    /// Daily-rotated log files are written here when set
    pub log_dir: Option<String>,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, BoxError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build configuration from any key lookup (env, test maps).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, BoxError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let parsed = |name: &str, default: u64| -> Result<u64, BoxError> {
            match var(name) {
                Some(v) => v
                    .trim()
                    .parse()
                    .map_err(|_| format!("{name} must be a non-negative integer, got {v:?}").into()),
                None => Ok(default),
            }
        };

        let lock_key_scheme = match var("LOCK_KEY_SCHEME") {
            Some(v) => v.parse().map_err(|e: String| -> BoxError { e.into() })?,
            None => LockKeyScheme::default(),
        };

        Ok(Self {
            database_url: var("DATABASE_URL").ok_or("DATABASE_URL must be set")?,
            http_port: u16::try_from(parsed("HTTP_PORT", 8080)?)
                .map_err(|_| "HTTP_PORT out of range")?,
            environment: var("ENVIRONMENT").unwrap_or_else(|| "development".into()),
            db_max_connections: u32::try_from(parsed("DB_MAX_CONNECTIONS", 10)?)
                .map_err(|_| "DB_MAX_CONNECTIONS out of range")?,
            shelf_lock_timeout: Duration::from_millis(parsed("SHELF_LOCK_TIMEOUT_MS", 5_000)?),
            shelf_lock_retries: u32::try_from(parsed("SHELF_LOCK_RETRIES", 3)?)
                .map_err(|_| "SHELF_LOCK_RETRIES out of range")?,
            shelf_lock_backoff: Duration::from_millis(parsed("SHELF_LOCK_BACKOFF_MS", 200)?),
            lock_key_scheme,
            log_level: var("LOG_LEVEL").unwrap_or_else(|| "info".into()),
            log_json: var("LOG_JSON")
                .map(|v| matches!(v.trim(), "1" | "true" | "yes"))
                .unwrap_or(false),
            log_dir: var("LOG_DIR"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(pairs: &[(&str, &str)]) -> Result<Config, BoxError> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|k| map.get(k).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = load(&[("DATABASE_URL", "postgres://localhost/pog")]).unwrap();
        assert_eq!(config.http_port, 8080);
        assert_eq!(config.environment, "development");
        assert_eq!(config.shelf_lock_timeout, Duration::from_secs(5));
        assert_eq!(config.shelf_lock_retries, 3);
        assert_eq!(config.lock_key_scheme, LockKeyScheme::Hashed);
        assert!(!config.log_json);
        assert!(config.log_dir.is_none());
    }

    #[test]
    fn test_database_url_required() {
        let err = load(&[("HTTP_PORT", "9000")]).unwrap_err();
        assert!(err.to_string().contains("DATABASE_URL"));
    }

    #[test]
    fn test_overrides() {
        let config = load(&[
            ("DATABASE_URL", "postgres://db/pog"),
            ("HTTP_PORT", "9100"),
            ("SHELF_LOCK_TIMEOUT_MS", "250"),
            ("SHELF_LOCK_RETRIES", "0"),
            ("LOCK_KEY_SCHEME", "legacy"),
            ("LOG_JSON", "true"),
        ])
        .unwrap();
        assert_eq!(config.http_port, 9100);
        assert_eq!(config.shelf_lock_timeout, Duration::from_millis(250));
        assert_eq!(config.shelf_lock_retries, 0);
        assert_eq!(config.lock_key_scheme, LockKeyScheme::Legacy);
        assert!(config.log_json);
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(load(&[("DATABASE_URL", "x"), ("HTTP_PORT", "eighty")]).is_err());
        assert!(load(&[("DATABASE_URL", "x"), ("HTTP_PORT", "70000")]).is_err());
        assert!(load(&[("DATABASE_URL", "x"), ("LOCK_KEY_SCHEME", "crc32")]).is_err());
    }
}
