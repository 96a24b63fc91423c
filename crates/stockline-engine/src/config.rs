//! # Engine Configuration
//!
//! Configuration management for the stock engine.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     STOCKLINE_DB_PATH=/var/lib/stockline/stock.db                      │
//! │     STOCKLINE_RESERVATION_TTL_MINUTES=20                               │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/stockline/stockline.toml (Linux)                         │
//! │     ~/Library/Application Support/com.stockline.stockline/... (macOS)  │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! │     15 minute TTL, 60 second reaper, 5 retry attempts                  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! [database]
//! path = "stock.db"
//! max_connections = 5
//! busy_timeout_ms = 5000
//!
//! [reservations]
//! default_ttl_minutes = 15
//! max_ttl_minutes = 1440
//!
//! [reaper]
//! enabled = true
//! interval_secs = 60
//! batch_size = 100
//!
//! [retry]
//! max_attempts = 5
//! initial_backoff_ms = 20
//! max_backoff_ms = 1000
//!
//! [notifier]
//! channel_capacity = 1024
//! low_stock_threshold = 3
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info, warn};

use stockline_core::{DEFAULT_RESERVATION_TTL_MINUTES, MAX_RESERVATION_TTL_MINUTES};
use stockline_db::DbConfig;

use crate::error::{EngineError, EngineResult};
use crate::retry::RetryPolicy;

// =============================================================================
// Database Settings
// =============================================================================

/// Where and how to open the SQLite database.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSettings {
    /// Database file. `:memory:` for a throwaway database.
    #[serde(default = "default_db_path")]
    pub path: PathBuf,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// How long a writer waits on SQLite's lock before reporting BUSY.
    #[serde(default = "default_busy_timeout")]
    pub busy_timeout_ms: u64,
}

fn default_db_path() -> PathBuf {
    directories::ProjectDirs::from("com", "stockline", "stockline")
        .map(|dirs| dirs.data_dir().join("stock.db"))
        .unwrap_or_else(|| PathBuf::from("stock.db"))
}

fn default_max_connections() -> u32 {
    5
}

fn default_busy_timeout() -> u64 {
    5_000
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        DatabaseSettings {
            path: default_db_path(),
            max_connections: default_max_connections(),
            busy_timeout_ms: default_busy_timeout(),
        }
    }
}

impl DatabaseSettings {
    /// Builds the pool configuration for stockline-db.
    pub fn to_db_config(&self) -> DbConfig {
        if self.path.as_os_str() == ":memory:" {
            return DbConfig::in_memory().busy_timeout(Duration::from_millis(self.busy_timeout_ms));
        }
        DbConfig::new(&self.path)
            .max_connections(self.max_connections)
            .busy_timeout(Duration::from_millis(self.busy_timeout_ms))
    }
}

// =============================================================================
// Reservation Settings
// =============================================================================

/// TTL bounds for held reservations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReservationSettings {
    /// TTL used when a caller doesn't pass one.
    #[serde(default = "default_ttl")]
    pub default_ttl_minutes: i64,

    /// Longest TTL a caller may ask for.
    #[serde(default = "default_max_ttl")]
    pub max_ttl_minutes: i64,
}

fn default_ttl() -> i64 {
    DEFAULT_RESERVATION_TTL_MINUTES
}

fn default_max_ttl() -> i64 {
    MAX_RESERVATION_TTL_MINUTES
}

impl Default for ReservationSettings {
    fn default() -> Self {
        ReservationSettings {
            default_ttl_minutes: default_ttl(),
            max_ttl_minutes: default_max_ttl(),
        }
    }
}

// =============================================================================
// Reaper Settings
// =============================================================================

/// Background expiry sweep.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReaperSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Seconds between sweeps.
    #[serde(default = "default_reaper_interval")]
    pub interval_secs: u64,

    /// Most reservations expired per sweep.
    #[serde(default = "default_reaper_batch")]
    pub batch_size: i64,
}

fn default_true() -> bool {
    true
}

fn default_reaper_interval() -> u64 {
    60
}

fn default_reaper_batch() -> i64 {
    100
}

impl Default for ReaperSettings {
    fn default() -> Self {
        ReaperSettings {
            enabled: true,
            interval_secs: default_reaper_interval(),
            batch_size: default_reaper_batch(),
        }
    }
}

// =============================================================================
// Retry Settings
// =============================================================================

/// Bounded retry on SQLite write contention.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,
}

fn default_max_attempts() -> u32 {
    5
}
fn default_initial_backoff() -> u64 {
    20
}
fn default_max_backoff() -> u64 {
    1_000
}

impl Default for RetrySettings {
    fn default() -> Self {
        RetrySettings {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
        }
    }
}

impl RetrySettings {
    pub fn to_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            initial_backoff: Duration::from_millis(self.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.max_backoff_ms),
        }
    }
}

// =============================================================================
// Notifier Settings
// =============================================================================

/// Stock change fan-out.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifierSettings {
    /// Events buffered per subscriber before it starts lagging.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,

    /// Available quantity at or below which a change is logged as low stock.
    #[serde(default = "default_low_stock_threshold")]
    pub low_stock_threshold: i64,
}

fn default_channel_capacity() -> usize {
    1024
}

fn default_low_stock_threshold() -> i64 {
    3
}

impl Default for NotifierSettings {
    fn default() -> Self {
        NotifierSettings {
            channel_capacity: default_channel_capacity(),
            low_stock_threshold: default_low_stock_threshold(),
        }
    }
}

// =============================================================================
// Main Engine Configuration
// =============================================================================

/// Complete engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub database: DatabaseSettings,

    #[serde(default)]
    pub reservations: ReservationSettings,

    #[serde(default)]
    pub reaper: ReaperSettings,

    #[serde(default)]
    pub retry: RetrySettings,

    #[serde(default)]
    pub notifier: NotifierSettings,
}

impl EngineConfig {
    /// Creates a config with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults pointed at an in-memory database. For tests and demos.
    pub fn in_memory() -> Self {
        let mut config = Self::default();
        config.database.path = PathBuf::from(":memory:");
        config
    }

    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (stockline.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> EngineResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading engine config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_env_overrides();

        config.validate()?;

        Ok(config)
    }

    /// Loads config or returns default if load fails.
    pub fn load_or_default(config_path: Option<PathBuf>) -> Self {
        Self::load(config_path).unwrap_or_else(|e| {
            warn!("Failed to load engine config: {}. Using defaults.", e);
            Self::default()
        })
    }

    /// Saves configuration to file.
    pub fn save(&self, config_path: Option<PathBuf>) -> EngineResult<()> {
        let path = config_path
            .or_else(Self::default_config_path)
            .ok_or_else(|| EngineError::ConfigSaveFailed("No config path available".into()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents)?;

        info!(?path, "Engine config saved");
        Ok(())
    }

    /// Validates the configuration.
    pub fn validate(&self) -> EngineResult<()> {
        if self.database.path.as_os_str().is_empty() {
            return Err(EngineError::InvalidConfig("database.path must not be empty".into()));
        }

        if self.database.max_connections == 0 {
            return Err(EngineError::InvalidConfig(
                "database.max_connections must be greater than 0".into(),
            ));
        }

        let r = &self.reservations;
        if r.max_ttl_minutes < 1 || r.max_ttl_minutes > MAX_RESERVATION_TTL_MINUTES {
            return Err(EngineError::InvalidConfig(format!(
                "reservations.max_ttl_minutes must be between 1 and {}",
                MAX_RESERVATION_TTL_MINUTES
            )));
        }
        if r.default_ttl_minutes < 1 || r.default_ttl_minutes > r.max_ttl_minutes {
            return Err(EngineError::InvalidConfig(format!(
                "reservations.default_ttl_minutes must be between 1 and {}",
                r.max_ttl_minutes
            )));
        }

        if self.reaper.interval_secs == 0 {
            return Err(EngineError::InvalidConfig(
                "reaper.interval_secs must be greater than 0".into(),
            ));
        }
        if self.reaper.batch_size <= 0 {
            return Err(EngineError::InvalidConfig(
                "reaper.batch_size must be greater than 0".into(),
            ));
        }

        if self.retry.max_attempts == 0 {
            return Err(EngineError::InvalidConfig(
                "retry.max_attempts must be at least 1".into(),
            ));
        }
        if self.retry.initial_backoff_ms > self.retry.max_backoff_ms {
            return Err(EngineError::InvalidConfig(
                "retry.initial_backoff_ms must not exceed retry.max_backoff_ms".into(),
            ));
        }

        if self.notifier.channel_capacity == 0 {
            return Err(EngineError::InvalidConfig(
                "notifier.channel_capacity must be greater than 0".into(),
            ));
        }

        Ok(())
    }

    /// Applies environment variable overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(path) = std::env::var("STOCKLINE_DB_PATH") {
            debug!(path = %path, "Overriding database path from environment");
            self.database.path = PathBuf::from(path);
        }

        override_parsed("STOCKLINE_DB_MAX_CONNECTIONS", &mut self.database.max_connections);
        override_parsed("STOCKLINE_DB_BUSY_TIMEOUT_MS", &mut self.database.busy_timeout_ms);
        override_parsed(
            "STOCKLINE_RESERVATION_TTL_MINUTES",
            &mut self.reservations.default_ttl_minutes,
        );
        override_parsed(
            "STOCKLINE_RESERVATION_MAX_TTL_MINUTES",
            &mut self.reservations.max_ttl_minutes,
        );
        override_parsed("STOCKLINE_REAPER_ENABLED", &mut self.reaper.enabled);
        override_parsed("STOCKLINE_REAPER_INTERVAL_SECS", &mut self.reaper.interval_secs);
        override_parsed("STOCKLINE_REAPER_BATCH_SIZE", &mut self.reaper.batch_size);
        override_parsed("STOCKLINE_RETRY_MAX_ATTEMPTS", &mut self.retry.max_attempts);
        override_parsed(
            "STOCKLINE_LOW_STOCK_THRESHOLD",
            &mut self.notifier.low_stock_threshold,
        );
    }

    /// Returns the default config file path.
    fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "stockline", "stockline")
            .map(|dirs| dirs.config_dir().join("stockline.toml"))
    }

    // =========================================================================
    // Convenience Methods
    // =========================================================================

    pub fn reaper_interval(&self) -> Duration {
        Duration::from_secs(self.reaper.interval_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry.to_policy()
    }
}

/// Overwrites `target` when `var` is set and parses; warns if it doesn't.
fn override_parsed<T: FromStr>(var: &str, target: &mut T) {
    if let Ok(raw) = std::env::var(var) {
        match raw.parse::<T>() {
            Ok(value) => {
                debug!(var, value = %raw, "Overriding config from environment");
                *target = value;
            }
            Err(_) => warn!(var, value = %raw, "Ignoring unparseable environment override"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.reservations.default_ttl_minutes, 15);
        assert_eq!(config.reservations.max_ttl_minutes, 24 * 60);
        assert_eq!(config.reaper.interval_secs, 60);
        assert!(config.reaper.enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = EngineConfig::default();

        config.reservations.default_ttl_minutes = 0;
        assert!(config.validate().is_err());

        config.reservations.default_ttl_minutes = 30;
        config.reservations.max_ttl_minutes = 20;
        assert!(config.validate().is_err());

        config.reservations.max_ttl_minutes = 60;
        assert!(config.validate().is_ok());

        config.retry.max_attempts = 0;
        assert!(matches!(config.validate(), Err(EngineError::InvalidConfig(_))));
    }

    #[test]
    fn test_toml_serialization() {
        let config = EngineConfig::in_memory();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: EngineConfig = toml::from_str(&toml_str).unwrap();

        assert_eq!(parsed.database.path, PathBuf::from(":memory:"));
        assert_eq!(parsed.notifier.channel_capacity, config.notifier.channel_capacity);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let parsed: EngineConfig = toml::from_str(
            r#"
            [reaper]
            interval_secs = 5
            "#,
        )
        .unwrap();

        assert_eq!(parsed.reaper.interval_secs, 5);
        assert_eq!(parsed.reaper.batch_size, 100);
        assert_eq!(parsed.retry.max_attempts, 5);
    }

    #[test]
    fn test_in_memory_db_config() {
        let db = EngineConfig::in_memory().database.to_db_config();
        assert!(db.is_in_memory());
        assert_eq!(db.max_connections, 1);
    }

    #[test]
    fn test_save_and_load_roundtrip_file() {
        let path = std::env::temp_dir().join(format!("stockline-{}.toml", uuid::Uuid::new_v4()));
        let mut config = EngineConfig::in_memory();
        config.reaper.batch_size = 7;
        config.save(Some(path.clone())).unwrap();

        let loaded = EngineConfig::load(Some(path.clone())).unwrap();
        assert_eq!(loaded.reaper.batch_size, 7);

        std::fs::remove_file(path).ok();
    }
}
