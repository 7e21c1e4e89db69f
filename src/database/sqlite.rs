//! SQLite backend
//!
//! Connection strings are file paths with optional `_pragma=value` query
//! parameters. Pragmas are applied on every new pooled connection.

use crate::backup::BackupProvider;
use crate::database::connection::{DatabaseBackend, DatabasePool};
use crate::database::base::{Driver, Provider};
use crate::database::pool::PoolSettings;
use crate::error::{DatabaseError, Result};
use crate::logging::{log_info, Logger};
use crate::security::dsn::split_query;
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, Sqlite};
use std::path::PathBuf;
use std::str::FromStr;

/// SQLite provider
pub type SqliteProvider = Provider<SqliteDriver>;

/// SQLite driver
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteDriver;

impl Provider<SqliteDriver> {
    /// Disconnected SQLite provider
    pub fn new(logger: Logger) -> Self {
        Self::with_driver(SqliteDriver, logger)
    }
}

fn strip_prefix(head: &str) -> &str {
    ["sqlite://", "sqlite:", "file:"]
        .iter()
        .find_map(|prefix| head.strip_prefix(prefix))
        .unwrap_or(head)
}

fn is_memory(path: &str) -> bool {
    path.is_empty() || path == ":memory:"
}

/// Backing file of a SQLite connection string, `None` for in-memory databases
pub fn database_path(dsn: &str) -> Option<PathBuf> {
    let path = strip_prefix(split_query(dsn.trim()).0);
    if is_memory(path) {
        None
    } else {
        Some(PathBuf::from(path))
    }
}

/// Connect options for a built connection string
pub fn connect_options(dsn: &str, logger: &Logger) -> Result<SqliteConnectOptions> {
    let (head, params) = split_query(dsn.trim());
    let path = strip_prefix(head);

    let mut options = if is_memory(path) {
        SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| DatabaseError::connection("invalid sqlite options", e))?
    } else {
        SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
    };

    for (key, value) in params {
        if let Some(pragma) = key.strip_prefix('_') {
            log_info!(logger, pragma = %pragma, value = %value, "applying sqlite pragma");
            options = options.pragma(pragma.to_string(), value);
        }
    }
    Ok(options)
}

#[async_trait]
impl Driver for SqliteDriver {
    fn backend(&self) -> DatabaseBackend {
        DatabaseBackend::SQLite
    }

    async fn open(
        &self,
        dsn: &str,
        settings: PoolSettings,
        logger: &Logger,
    ) -> Result<DatabasePool> {
        let options = connect_options(dsn, logger)?;
        let pool = settings
            .pool_options::<Sqlite>()
            .connect_with(options)
            .await
            .map_err(|e| DatabaseError::connection("failed to open sqlite database", e))?;
        Ok(DatabasePool::Sqlite(pool))
    }

    fn version_query(&self) -> &'static str {
        "SELECT sqlite_version()"
    }

    fn size_query(&self) -> &'static str {
        "SELECT page_count * page_size FROM pragma_page_count(), pragma_page_size()"
    }

    fn backup_capability(provider: &Provider<Self>) -> Option<&dyn BackupProvider> {
        Some(provider)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn test_database_path() {
        assert_eq!(
            database_path("sqlite:///var/lib/app.db?_journal_mode=WAL"),
            Some(PathBuf::from("/var/lib/app.db"))
        );
        assert_eq!(
            database_path("file:data/app.db"),
            Some(PathBuf::from("data/app.db"))
        );
        assert_eq!(database_path("app.db").as_deref(), Some(Path::new("app.db")));
        assert_eq!(database_path(":memory:"), None);
        assert_eq!(database_path("sqlite::memory:"), None);
    }

    #[test]
    fn test_connect_options_accept_pragmas() {
        let options = connect_options(
            "/tmp/app.db?_journal_mode=WAL&_busy_timeout=5000&cache=shared",
            &Logger::silent(),
        )
        .unwrap();
        assert_eq!(options.get_filename(), Path::new("/tmp/app.db"));
    }

    #[tokio::test]
    async fn test_open_in_memory() {
        let settings = PoolSettings::defaults_for(DatabaseBackend::SQLite);
        let pool = SqliteDriver
            .open(":memory:?_foreign_keys=on", settings, &Logger::silent())
            .await
            .unwrap();
        assert!(pool.ping().await.is_ok());
        let version = pool.fetch_string(SqliteDriver.version_query()).await.unwrap();
        assert!(version.starts_with('3'));
        assert!(pool.fetch_i64(SqliteDriver.size_query()).await.unwrap() >= 0);
    }
}
