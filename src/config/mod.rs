use std::env;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("{key} has invalid value {value:?}")]
    Invalid { key: &'static str, value: String },
}

// Главная структура конфигурации
#[derive(Debug, Clone)]
pub struct Config {
    pub app: AppConfig,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub booking: BookingConfig,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub environment: String,
    pub rust_log: String,
    pub log_format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Plain,
    Json,
}

impl FromStr for LogFormat {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "plain" | "text" => Ok(Self::Plain),
            "json" => Ok(Self::Json),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub pool_size: u32,
    /// Row-lock wait limit per transaction; exceeding it aborts the transaction.
    pub lock_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct RedisConfig {
    pub url: String,
}

/// Timing of holds and finalization locks.
#[derive(Debug, Clone)]
pub struct BookingConfig {
    /// How long a hold lasts without being finalized.
    pub hold_ttl: Duration,
    /// Expiry of the lock re-claimed while an order is being finalized.
    pub finalize_lock_ttl: Duration,
    /// Period of the background sweep of expired holds. `None` disables it.
    pub sweep_interval: Option<Duration>,
}

impl Default for BookingConfig {
    fn default() -> Self {
        Self {
            hold_ttl: Duration::from_secs(180),
            finalize_lock_ttl: Duration::from_secs(300),
            sweep_interval: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &'static str| lookup(key).filter(|v| !v.trim().is_empty());
        let required = |key: &'static str| get(key).ok_or(ConfigError::Missing(key));

        let sweep_secs: u64 = parse_or(&get, "HOLD_SWEEP_INTERVAL_SECS", 0)?;

        Ok(Config {
            app: AppConfig {
                host: get("HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
                port: parse_or(&get, "PORT", 8000)?,
                environment: get("ENVIRONMENT").unwrap_or_else(|| "development".to_string()),
                rust_log: get("RUST_LOG")
                    .unwrap_or_else(|| "seat_booking=debug,tower_http=debug".to_string()),
                log_format: parse_or(&get, "LOG_FORMAT", LogFormat::Plain)?,
            },
            database: DatabaseConfig {
                url: required("DATABASE_URL")?,
                pool_size: parse_or(&get, "DB_POOL_SIZE", 20)?,
                lock_timeout: Duration::from_millis(parse_or(&get, "DB_LOCK_TIMEOUT_MS", 5000)?),
            },
            redis: RedisConfig {
                url: required("REDIS_URL")?,
            },
            booking: BookingConfig {
                hold_ttl: Duration::from_secs(parse_or(&get, "SEAT_HOLD_TTL_SECS", 180)?),
                finalize_lock_ttl: Duration::from_secs(parse_or(
                    &get,
                    "FINALIZE_LOCK_TTL_SECS",
                    300,
                )?),
                sweep_interval: (sweep_secs > 0).then(|| Duration::from_secs(sweep_secs)),
            },
        })
    }
}

fn parse_or<T: FromStr>(
    get: &impl Fn(&'static str) -> Option<String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match get(key) {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value }),
        None => Ok(default),
    }
}
