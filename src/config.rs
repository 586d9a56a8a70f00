//! Configuration and settings management
//!
//! Loads ledger settings from config files and environment variables.

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Ledger settings loaded from config files and environment variables
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LedgerSettings {
    /// Path to the SQLite database file
    #[serde(default = "default_database_path")]
    pub database_path: String,

    /// Maximum number of pooled SQLite connections
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,

    /// How long a connection waits on a locked database before giving up
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,

    /// Upper bound for a single ledger call, including pool checkout
    #[serde(default = "default_operation_timeout_ms")]
    pub operation_timeout_ms: u64,

    /// Number of scan records kept in the in-process read cache
    #[serde(default = "default_record_cache_capacity")]
    pub record_cache_capacity: u64,
}

fn default_database_path() -> String {
    "token_scans.db".to_string()
}

const fn default_pool_size() -> u32 {
    4
}

const fn default_busy_timeout_ms() -> u64 {
    5_000
}

const fn default_operation_timeout_ms() -> u64 {
    3_000
}

const fn default_record_cache_capacity() -> u64 {
    10_000
}

impl Default for LedgerSettings {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            pool_size: default_pool_size(),
            busy_timeout_ms: default_busy_timeout_ms(),
            operation_timeout_ms: default_operation_timeout_ms(),
            record_cache_capacity: default_record_cache_capacity(),
        }
    }
}

impl LedgerSettings {
    /// Create new settings by loading from environment and files
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use memewatch::config::LedgerSettings;
    ///
    /// let settings = LedgerSettings::new().expect("Failed to load configuration");
    /// ```
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if loading fails.
    pub fn new() -> Result<Self, ConfigError> {
        build_config()?.try_deserialize()
    }

    /// Busy timeout as a [`Duration`]
    #[must_use]
    pub const fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }

    /// Per-call ledger timeout as a [`Duration`]
    #[must_use]
    pub const fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }
}

/// Build the layered configuration source.
///
/// Files under `config/` are optional; environment variables win over files.
///
/// # Errors
///
/// Returns a `ConfigError` if a present source cannot be parsed.
pub fn build_config() -> Result<Config, ConfigError> {
    let run_mode = std::env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

    Config::builder()
        .add_source(File::with_name("config/default").required(false))
        .add_source(File::with_name(&format!("config/{run_mode}")).required(false))
        // Local overrides, not checked into git
        .add_source(File::with_name("config/local").required(false))
        // Eg.. `APP__POOL_SIZE=8 ./target/memewatch` would set `pool_size`
        .add_source(Environment::with_prefix("APP").separator("__"))
        // Bare variables such as `DATABASE_PATH`; empty values count as unset
        .add_source(Environment::default().ignore_empty(true))
        .build()
}

/// Attempts made to open the ledger at start-up
pub const STARTUP_MAX_RETRIES: usize = 5;
/// Initial backoff between start-up attempts
pub const STARTUP_INITIAL_BACKOFF_MS: u64 = 100;
/// Backoff ceiling between start-up attempts
pub const STARTUP_MAX_BACKOFF_MS: u64 = 2_000;
