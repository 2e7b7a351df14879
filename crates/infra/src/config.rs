//! Runtime configuration loaded from the environment.

use std::time::Duration;

use thiserror::Error;

pub const ENV_BIND_ADDR: &str = "BIND_ADDR";
pub const ENV_USE_PERSISTENT_STORES: &str = "USE_PERSISTENT_STORES";
pub const ENV_DATABASE_URL: &str = "DATABASE_URL";
pub const ENV_REDIS_URL: &str = "REDIS_URL";
pub const ENV_ML_BASE_URL: &str = "ML_BASE_URL";
pub const ENV_CACHE_TTL_SECS: &str = "CACHE_TTL_SECS";
pub const ENV_UPSTREAM_TIMEOUT_MS: &str = "UPSTREAM_TIMEOUT_MS";
pub const ENV_ESTIMATOR_TIMEOUT_MS: &str = "ESTIMATOR_TIMEOUT_MS";
pub const ENV_OUTBOX_POLL_INTERVAL_MS: &str = "OUTBOX_POLL_INTERVAL_MS";
pub const ENV_OUTBOX_BATCH_SIZE: &str = "OUTBOX_BATCH_SIZE";
pub const ENV_OUTBOX_MAX_ATTEMPTS: &str = "OUTBOX_MAX_ATTEMPTS";
pub const ENV_OUTBOX_DEAD_LETTER: &str = "OUTBOX_DEAD_LETTER";

const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";
const DEFAULT_REDIS_URL: &str = "redis://localhost:6379";

/// Upper bound for `CACHE_TTL_SECS` (30 days).
pub const MAX_CACHE_TTL_SECS: u64 = 30 * 24 * 60 * 60;
/// Upper bound for every `*_MS` setting (one day).
pub const MAX_DURATION_MS: u64 = 24 * 60 * 60 * 1000;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{key} must be a positive integer, got {value:?}")]
    InvalidNumber { key: &'static str, value: String },

    #[error("{key} must be at most {max}, got {value}")]
    OutOfRange { key: &'static str, value: u64, max: u64 },

    #[error("{key} must be a boolean, got {value:?}")]
    InvalidBool { key: &'static str, value: String },

    #[error("{0} must be set when USE_PERSISTENT_STORES=true")]
    Missing(&'static str),
}

/// Settings for the status read path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    pub cache_ttl: Duration,
    pub upstream_timeout: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            cache_ttl: Duration::from_secs(60),
            upstream_timeout: Duration::from_millis(3000),
        }
    }
}

/// Settings for the outbox worker and its handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboxConfig {
    pub poll_interval: Duration,
    pub batch_size: usize,
    /// Entries with this many attempts are no longer selected.
    pub max_attempts: u32,
    /// Park entries that hit `max_attempts` instead of leaving them pending forever.
    pub dead_letter: bool,
    pub estimator_timeout: Duration,
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(5000),
            batch_size: 50,
            max_attempts: 20,
            dead_letter: true,
            estimator_timeout: Duration::from_millis(5000),
        }
    }
}

/// Backing services for persistent mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistenceConfig {
    pub database_url: String,
    pub redis_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub bind_addr: String,
    /// `None` runs on in-memory stores and caches.
    pub persistence: Option<PersistenceConfig>,
    /// `None` selects the in-process rule-based estimator.
    pub ml_base_url: Option<String>,
    pub sync: SyncConfig,
    pub outbox: OutboxConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            persistence: None,
            ml_base_url: None,
            sync: SyncConfig::default(),
            outbox: OutboxConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load from the process environment, after reading `.env` if present.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_env_with(|key| std::env::var(key).ok())
    }

    /// Load with a custom key lookup (test-friendly).
    pub fn from_env_with<F>(get_env: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let get = |key: &str| get_env(key).filter(|v| !v.trim().is_empty());

        let persistent = parse_bool(&get, ENV_USE_PERSISTENT_STORES, false)?;
        let persistence = if persistent {
            Some(PersistenceConfig {
                database_url: get(ENV_DATABASE_URL).ok_or(ConfigError::Missing(ENV_DATABASE_URL))?,
                redis_url: get(ENV_REDIS_URL).unwrap_or_else(|| DEFAULT_REDIS_URL.to_string()),
            })
        } else {
            None
        };

        let sync = SyncConfig {
            cache_ttl: Duration::from_secs(parse_bounded(&get, ENV_CACHE_TTL_SECS, defaults.sync.cache_ttl.as_secs(), MAX_CACHE_TTL_SECS)?),
            upstream_timeout: Duration::from_millis(parse_bounded(&get, ENV_UPSTREAM_TIMEOUT_MS, defaults.sync.upstream_timeout.as_millis() as u64, MAX_DURATION_MS)?),
        };

        let batch_size = parse_positive(&get, ENV_OUTBOX_BATCH_SIZE, defaults.outbox.batch_size as u64)?;
        let max_attempts = parse_positive(&get, ENV_OUTBOX_MAX_ATTEMPTS, defaults.outbox.max_attempts as u64)?;
        let outbox = OutboxConfig {
            poll_interval: Duration::from_millis(parse_bounded(&get, ENV_OUTBOX_POLL_INTERVAL_MS, defaults.outbox.poll_interval.as_millis() as u64, MAX_DURATION_MS)?),
            batch_size: usize::try_from(batch_size).map_err(|_| ConfigError::InvalidNumber {
                key: ENV_OUTBOX_BATCH_SIZE,
                value: batch_size.to_string(),
            })?,
            max_attempts: u32::try_from(max_attempts).map_err(|_| ConfigError::InvalidNumber {
                key: ENV_OUTBOX_MAX_ATTEMPTS,
                value: max_attempts.to_string(),
            })?,
            dead_letter: parse_bool(&get, ENV_OUTBOX_DEAD_LETTER, defaults.outbox.dead_letter)?,
            estimator_timeout: Duration::from_millis(parse_bounded(&get, ENV_ESTIMATOR_TIMEOUT_MS, defaults.outbox.estimator_timeout.as_millis() as u64, MAX_DURATION_MS)?),
        };

        Ok(Self {
            bind_addr: get(ENV_BIND_ADDR).unwrap_or(defaults.bind_addr),
            persistence,
            ml_base_url: get(ENV_ML_BASE_URL),
            sync,
            outbox,
        })
    }
}

fn parse_positive<F>(get: &F, key: &'static str, default: u64) -> Result<u64, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = get(key) else {
        return Ok(default);
    };
    match raw.trim().parse::<u64>() {
        Ok(v) if v > 0 => Ok(v),
        _ => Err(ConfigError::InvalidNumber { key, value: raw }),
    }
}

fn parse_bounded<F>(get: &F, key: &'static str, default: u64, max: u64) -> Result<u64, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let value = parse_positive(get, key, default)?;
    if value > max {
        return Err(ConfigError::OutOfRange { key, value, max });
    }
    Ok(value)
}

fn parse_bool<F>(get: &F, key: &'static str, default: bool) -> Result<bool, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = get(key) else {
        return Ok(default);
    };
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidBool { key, value: raw }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<AppConfig, ConfigError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_env_with(|key| map.get(key).cloned())
    }

    #[test]
    fn empty_environment_yields_defaults() {
        assert_eq!(load(&[]).unwrap(), AppConfig::default());
    }

    #[test]
    fn overrides_are_applied() {
        let cfg = load(&[
            (ENV_CACHE_TTL_SECS, "30"),
            (ENV_OUTBOX_BATCH_SIZE, "10"),
            (ENV_OUTBOX_MAX_ATTEMPTS, "3"),
            (ENV_OUTBOX_DEAD_LETTER, "false"),
            (ENV_ML_BASE_URL, "http://ml:8000"),
        ])
        .unwrap();

        assert_eq!(cfg.sync.cache_ttl, Duration::from_secs(30));
        assert_eq!(cfg.outbox.batch_size, 10);
        assert_eq!(cfg.outbox.max_attempts, 3);
        assert!(!cfg.outbox.dead_letter);
        assert_eq!(cfg.ml_base_url.as_deref(), Some("http://ml:8000"));
    }

    #[test]
    fn invalid_numbers_are_rejected() {
        let err = load(&[(ENV_OUTBOX_BATCH_SIZE, "zero")]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidNumber { key: ENV_OUTBOX_BATCH_SIZE, .. }));

        let err = load(&[(ENV_CACHE_TTL_SECS, "0")]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidNumber { key: ENV_CACHE_TTL_SECS, .. }));
    }

    #[test]
    fn oversized_durations_are_rejected() {
        let err = load(&[(ENV_CACHE_TTL_SECS, "18446744073709551615")]).unwrap_err();
        assert_eq!(
            err,
            ConfigError::OutOfRange {
                key: ENV_CACHE_TTL_SECS,
                value: u64::MAX,
                max: MAX_CACHE_TTL_SECS,
            }
        );

        let err = load(&[(ENV_OUTBOX_POLL_INTERVAL_MS, "86400001")]).unwrap_err();
        assert!(matches!(err, ConfigError::OutOfRange { key: ENV_OUTBOX_POLL_INTERVAL_MS, .. }));

        let cfg = load(&[(ENV_CACHE_TTL_SECS, &MAX_CACHE_TTL_SECS.to_string())]).unwrap();
        assert_eq!(cfg.sync.cache_ttl, Duration::from_secs(MAX_CACHE_TTL_SECS));
    }

    #[test]
    fn persistent_mode_requires_database_url() {
        let err = load(&[(ENV_USE_PERSISTENT_STORES, "true")]).unwrap_err();
        assert_eq!(err, ConfigError::Missing(ENV_DATABASE_URL));

        let cfg = load(&[
            (ENV_USE_PERSISTENT_STORES, "true"),
            (ENV_DATABASE_URL, "postgres://localhost/refunds"),
        ])
        .unwrap();
        let p = cfg.persistence.unwrap();
        assert_eq!(p.redis_url, DEFAULT_REDIS_URL);
    }
}
