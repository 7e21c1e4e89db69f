//! Configuration module
//!
//! This module defines the provider configuration surface: backend choice,
//! connection string and options, pool sizing, log level and the slow-query
//! threshold. Loading from TOML files and the environment lives in
//! [`storage`].

pub mod storage;

use crate::database::connection::DatabaseBackend;
use crate::error::{DatabaseError, Result};
use crate::security::sanitize::sanitize;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Default slow-query threshold in milliseconds
pub const DEFAULT_SLOW_THRESHOLD_MS: u64 = 200;

/// Provider log level
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// No provider output
    Silent,
    /// Errors only
    Error,
    /// Errors and warnings (slow queries, degraded operations)
    #[default]
    Warn,
    /// Everything, including lifecycle events
    Info,
}

impl LogLevel {
    /// Whether a message at `level` passes this threshold
    pub fn allows(&self, level: LogLevel) -> bool {
        level != LogLevel::Silent && *self >= level
    }

    /// Directive understood by `tracing_subscriber::EnvFilter`
    pub fn as_filter(&self) -> &'static str {
        match self {
            LogLevel::Silent => "off",
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
        }
    }
}

impl FromStr for LogLevel {
    type Err = DatabaseError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "silent" | "off" => Ok(LogLevel::Silent),
            "error" => Ok(LogLevel::Error),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            other => Err(DatabaseError::config(format!("unknown log level: {}", other))),
        }
    }
}

/// Pool sizing. Zero means "use the backend default".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Maximum open connections
    #[serde(default)]
    pub max_open: u32,
    /// Connections kept open while idle
    #[serde(default)]
    pub max_idle: u32,
    /// Maximum connection lifetime in seconds
    #[serde(default)]
    pub max_lifetime_secs: u64,
    /// Maximum idle time in seconds
    #[serde(default)]
    pub max_idle_time_secs: u64,
}

/// Database provider configuration
#[derive(Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Backend identifier (`sqlite`, `postgres`, `mysql`)
    pub backend: String,
    /// Base connection string
    pub dsn: String,
    /// Provider log level
    #[serde(default)]
    pub log_level: LogLevel,
    /// Operations slower than this are counted and logged as slow
    #[serde(default = "default_slow_threshold_ms")]
    pub slow_threshold_ms: u64,
    /// Directory scanned by `list_backups`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup_dir: Option<PathBuf>,
    /// Reject connection strings with characters outside the allow-list
    #[serde(default)]
    pub strict_dsn: bool,
    /// Extra connection parameters
    #[serde(default)]
    pub options: BTreeMap<String, String>,
    /// Pool sizing
    #[serde(default)]
    pub pool: PoolConfig,
}

fn default_slow_threshold_ms() -> u64 {
    DEFAULT_SLOW_THRESHOLD_MS
}

impl DatabaseConfig {
    /// Create a configuration with defaults for everything but backend and DSN
    pub fn new(backend: impl Into<String>, dsn: impl Into<String>) -> Self {
        Self {
            backend: backend.into(),
            dsn: dsn.into(),
            options: BTreeMap::new(),
            pool: PoolConfig::default(),
            log_level: LogLevel::default(),
            slow_threshold_ms: DEFAULT_SLOW_THRESHOLD_MS,
            backup_dir: None,
            strict_dsn: false,
        }
    }

    /// Add a connection option
    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    /// Set pool sizing
    pub fn with_pool(mut self, pool: PoolConfig) -> Self {
        self.pool = pool;
        self
    }

    /// Set log level
    pub fn with_log_level(mut self, level: LogLevel) -> Self {
        self.log_level = level;
        self
    }

    /// Set the backup directory
    pub fn with_backup_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.backup_dir = Some(dir.into());
        self
    }

    /// Slow-query threshold as a duration
    pub fn slow_threshold(&self) -> Duration {
        Duration::from_millis(self.slow_threshold_ms)
    }

    /// Parsed backend identifier
    pub fn backend_kind(&self) -> Result<DatabaseBackend> {
        self.backend.parse()
    }

    /// Check the invariants that must hold before any I/O
    pub fn validate(&self) -> Result<DatabaseBackend> {
        if self.dsn.trim().is_empty() {
            return Err(DatabaseError::config("connection string must not be empty"));
        }
        self.backend_kind()
    }
}

impl fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("backend", &self.backend)
            .field("dsn", &sanitize(&self.dsn))
            .field("options", &self.options.keys().collect::<Vec<_>>())
            .field("pool", &self.pool)
            .field("log_level", &self.log_level)
            .field("slow_threshold_ms", &self.slow_threshold_ms)
            .field("backup_dir", &self.backup_dir)
            .field("strict_dsn", &self.strict_dsn)
            .finish()
    }
}
