//! Database provider trait
//!
//! This module defines the uniform contract every backend implements:
//! connection lifecycle, schema migration, transactions and monitoring.

use crate::backup::BackupProvider;
use crate::config::DatabaseConfig;
use crate::database::connection::DatabasePool;
use crate::database::schema::Model;
use crate::database::stats::{DatabaseStats, HealthStatus};
use crate::database::transaction::Transaction;
use crate::error::Result;
use crate::logging::Logger;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Connection lifecycle phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// No pool; the initial and terminal state
    #[default]
    Disconnected,
    /// `connect` is in progress
    Connecting,
    /// Pool open and verified
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
        };
        write!(f, "{}", name)
    }
}

/// Uniform database provider contract
///
/// Lifecycle calls (`connect`, `close`, `reconnect`) are serialized.
/// Everything else samples the connection under a shared lock and then
/// works against the pool, which is safe for concurrent use. `stats`,
/// `health_check`, `name`, `version` and `set_logger` are callable in any
/// state and never change it.
#[async_trait]
pub trait DatabaseProvider: Send + Sync {
    /// Open the pool. Fails with `AlreadyConnected` while connected; any
    /// other failure leaves the provider disconnected.
    async fn connect(&self, config: &DatabaseConfig) -> Result<()>;

    /// Close the pool. Closing a disconnected provider is a no-op.
    async fn close(&self) -> Result<()>;

    /// Bounded liveness check
    async fn ping(&self) -> Result<()>;

    /// Close if needed, then connect with the last successful configuration
    async fn reconnect(&self) -> Result<()>;

    /// Create the tables for `models` if they do not exist
    async fn migrate(&self, models: &[&dyn Model]) -> Result<()>;

    /// Drop the tables for `models` if they exist
    async fn drop_tables(&self, models: &[&dyn Model]) -> Result<()>;

    /// Check out one pooled connection and begin a transaction on it
    async fn begin_transaction(&self) -> Result<Transaction>;

    /// Run one statement and return the affected row count
    async fn execute(&self, sql: &str) -> Result<u64>;

    /// Relational access handle
    async fn handle(&self) -> Result<DatabasePool>;

    /// Point-in-time statistics
    async fn stats(&self) -> DatabaseStats;

    /// Fresh health check, bounded by a fixed timeout
    async fn health_check(&self) -> HealthStatus;

    /// Backend identifier
    fn name(&self) -> &str;

    /// Backend version detected at connect time, `unknown` before that
    fn version(&self) -> String;

    /// Replace the logger
    fn set_logger(&self, logger: Logger);

    /// Current lifecycle phase
    fn connection_state(&self) -> ConnectionState;

    /// Whether the provider is connected
    fn is_connected(&self) -> bool {
        self.connection_state() == ConnectionState::Connected
    }

    /// Backup capability, if this provider has one
    fn as_backup(&self) -> Option<&dyn BackupProvider> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_display() {
        assert_eq!(ConnectionState::default(), ConnectionState::Disconnected);
        assert_eq!(ConnectionState::Connecting.to_string(), "connecting");
        assert_eq!(
            serde_json::to_string(&ConnectionState::Connected).unwrap(),
            "\"connected\""
        );
    }
}
