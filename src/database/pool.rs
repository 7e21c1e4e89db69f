//! Pool sizing
//!
//! Backend-specific defaults for zero-valued pool settings, and their
//! translation into sqlx pool options.

use crate::config::PoolConfig;
use crate::database::connection::DatabaseBackend;
use sqlx::pool::PoolOptions;
use std::time::Duration;

/// Default bound on waiting for a pooled connection
pub const DEFAULT_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(10);

/// Fully resolved pool settings, never zero
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolSettings {
    /// Maximum open connections
    pub max_open: u32,
    /// Connections retained while idle (never above `max_open`)
    pub max_idle: u32,
    /// Connections older than this are rotated
    pub max_lifetime: Duration,
    /// Idle connections older than this are closed
    pub max_idle_time: Duration,
    /// Bound on waiting for a connection
    pub acquire_timeout: Duration,
}

impl PoolSettings {
    /// Defaults for a backend
    ///
    /// SQLite is single-writer, so one connection. Networked backends rotate
    /// connections before server-side idle timeouts kill them.
    pub fn defaults_for(backend: DatabaseBackend) -> Self {
        match backend {
            DatabaseBackend::SQLite => Self {
                max_open: 1,
                max_idle: 1,
                max_lifetime: Duration::from_secs(60 * 60),
                max_idle_time: Duration::from_secs(30 * 60),
                acquire_timeout: DEFAULT_ACQUIRE_TIMEOUT,
            },
            DatabaseBackend::PostgreSQL => Self {
                max_open: 25,
                max_idle: 5,
                max_lifetime: Duration::from_secs(30 * 60),
                max_idle_time: Duration::from_secs(5 * 60),
                acquire_timeout: DEFAULT_ACQUIRE_TIMEOUT,
            },
            DatabaseBackend::MySQL => Self {
                max_open: 25,
                max_idle: 5,
                max_lifetime: Duration::from_secs(5 * 60),
                max_idle_time: Duration::from_secs(60),
                acquire_timeout: DEFAULT_ACQUIRE_TIMEOUT,
            },
        }
    }

    /// Fill zero-valued fields of `config` with the backend defaults
    pub fn resolve(backend: DatabaseBackend, config: &PoolConfig) -> Self {
        let defaults = Self::defaults_for(backend);
        let max_open = non_zero(config.max_open, defaults.max_open);
        let max_idle = non_zero(config.max_idle, defaults.max_idle).min(max_open);

        Self {
            max_open,
            max_idle,
            max_lifetime: non_zero_secs(config.max_lifetime_secs, defaults.max_lifetime),
            max_idle_time: non_zero_secs(config.max_idle_time_secs, defaults.max_idle_time),
            acquire_timeout: defaults.acquire_timeout,
        }
    }

    /// Override the acquire timeout (from a connect-timeout parameter)
    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        if !timeout.is_zero() {
            self.acquire_timeout = timeout;
        }
        self
    }

    /// sqlx pool options carrying these settings
    pub fn pool_options<DB: sqlx::Database>(&self) -> PoolOptions<DB> {
        PoolOptions::<DB>::new()
            .max_connections(self.max_open)
            .min_connections(self.max_idle)
            .max_lifetime(Some(self.max_lifetime))
            .idle_timeout(Some(self.max_idle_time))
            .acquire_timeout(self.acquire_timeout)
    }
}

fn non_zero(value: u32, default: u32) -> u32 {
    if value == 0 {
        default
    } else {
        value
    }
}

fn non_zero_secs(value: u64, default: Duration) -> Duration {
    if value == 0 {
        default
    } else {
        Duration::from_secs(value)
    }
}

/// Parse timeout values such as `10s`, `500ms`, `2m` or a bare number of seconds.
pub fn parse_timeout(value: &str) -> Option<Duration> {
    let value = value.trim();
    let (number, unit) = match value.find(|c: char| !c.is_ascii_digit()) {
        Some(idx) => value.split_at(idx),
        None => (value, "s"),
    };
    let number: u64 = number.parse().ok()?;
    match unit {
        "ms" => Some(Duration::from_millis(number)),
        "s" => Some(Duration::from_secs(number)),
        "m" => Some(Duration::from_secs(number * 60)),
        _ => None,
    }
}
