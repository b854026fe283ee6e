//! Configuration management for task-rotation.
//!
//! Configuration can be set via environment variables:
//! - `HOST` - Optional. Server host. Defaults to `127.0.0.1`.
//! - `PORT` - Optional. Server port. Defaults to `3000`.
//! - `MAX_TASKS_PER_USER` - Optional. Concurrent tasks a user may hold. Defaults to `3`.
//! - `REASSIGN_INTERVAL_SECS` - Optional. Seconds between scheduled cycles. Defaults to `120`.
//! - `REASSIGN_SCHEDULER_ENABLED` - Optional. Run the periodic trigger. Defaults to `true`.
//! - `STORE_BACKEND` - Optional. `sqlite` or `memory`. Defaults to `sqlite`.
//! - `DATA_DIR` - Optional. Directory holding `rotation.db`. Defaults to `./data`.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

use crate::rotation::DEFAULT_MAX_TASKS_PER_USER;
use crate::util::env_var_bool;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

/// Which storage backend holds users, tasks and history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Sqlite,
    Memory,
}

impl FromStr for StoreBackend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "sqlite" => Ok(StoreBackend::Sqlite),
            "memory" => Ok(StoreBackend::Memory),
            other => Err(ConfigError::InvalidValue(
                "STORE_BACKEND".to_string(),
                format!("expected 'sqlite' or 'memory', got '{}'", other),
            )),
        }
    }
}

/// Reassignment scheduling configuration.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Whether the periodic trigger runs at all
    pub enabled: bool,

    /// Time between scheduled cycles
    pub interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_secs(120),
        }
    }
}

/// Service configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server host
    pub host: String,

    /// Server port
    pub port: u16,

    /// Maximum in-progress tasks per user
    pub max_tasks_per_user: usize,

    /// Periodic trigger settings
    pub scheduler: SchedulerConfig,

    /// Storage backend
    pub store_backend: StoreBackend,

    /// Directory for the SQLite database
    pub data_dir: PathBuf,
}

fn parse_env<T>(name: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e: T::Err| ConfigError::InvalidValue(name.to_string(), e.to_string())),
        Err(_) => Ok(default),
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if a variable is set but cannot be
    /// parsed, or if a count or interval is zero.
    pub fn from_env() -> Result<Self, ConfigError> {
        let host = std::env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = parse_env("PORT", 3000u16)?;

        let max_tasks_per_user = parse_env("MAX_TASKS_PER_USER", DEFAULT_MAX_TASKS_PER_USER)?;
        if max_tasks_per_user == 0 {
            return Err(ConfigError::InvalidValue(
                "MAX_TASKS_PER_USER".to_string(),
                "must be at least 1".to_string(),
            ));
        }

        let interval_secs = parse_env("REASSIGN_INTERVAL_SECS", 120u64)?;
        if interval_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "REASSIGN_INTERVAL_SECS".to_string(),
                "must be at least 1".to_string(),
            ));
        }
        let scheduler = SchedulerConfig {
            enabled: env_var_bool("REASSIGN_SCHEDULER_ENABLED", true),
            interval: Duration::from_secs(interval_secs),
        };

        let store_backend = match std::env::var("STORE_BACKEND") {
            Ok(raw) => raw.parse()?,
            Err(_) => StoreBackend::Sqlite,
        };

        let data_dir = std::env::var("DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./data"));

        Ok(Self {
            host,
            port,
            max_tasks_per_user,
            scheduler,
            store_backend,
            data_dir,
        })
    }

    /// Create a config with in-memory storage and defaults (useful for testing).
    pub fn new(max_tasks_per_user: usize) -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
            max_tasks_per_user,
            scheduler: SchedulerConfig::default(),
            store_backend: StoreBackend::Memory,
            data_dir: PathBuf::from("./data"),
        }
    }
}
