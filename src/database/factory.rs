//! Provider factory
//!
//! Maps a backend identifier to a constructed, disconnected provider.

use crate::config::DatabaseConfig;
use crate::database::connection::DatabaseBackend;
use crate::database::mysql::MySqlProvider;
use crate::database::postgres::PostgresProvider;
use crate::database::provider::DatabaseProvider;
use crate::database::sqlite::SqliteProvider;
use crate::error::{DatabaseError, Result};
use crate::logging::Logger;
use crate::security::build_dsn;
use std::sync::Arc;

/// Provider factory
pub struct ProviderFactory;

impl ProviderFactory {
    /// Create a disconnected provider
    ///
    /// # Arguments
    /// * `backend` - Backend identifier (`sqlite`, `postgres`, `mysql` or an alias)
    /// * `logger` - Logger stored by the provider; it is re-tagged with the
    ///   backend name
    ///
    /// # Example
    /// ```
    /// use dbvault::database::{DatabaseProvider, ProviderFactory};
    /// use dbvault::logging::Logger;
    ///
    /// let provider = ProviderFactory::create("sqlite", Logger::silent()).unwrap();
    /// assert_eq!(provider.name(), "sqlite");
    /// assert_eq!(provider.version(), "unknown");
    /// ```
    pub fn create(backend: &str, logger: Logger) -> Result<Arc<dyn DatabaseProvider>> {
        let backend: DatabaseBackend = backend.parse()?;
        Ok(Self::create_for(backend, logger))
    }

    /// Create a disconnected provider for a parsed backend
    pub fn create_for(backend: DatabaseBackend, logger: Logger) -> Arc<dyn DatabaseProvider> {
        let logger = if logger.enabled(crate::config::LogLevel::Error) {
            Logger::new(backend.name(), logger.level())
        } else {
            logger
        };

        match backend {
            DatabaseBackend::SQLite => Arc::new(SqliteProvider::new(logger)),
            DatabaseBackend::PostgreSQL => Arc::new(PostgresProvider::new(logger)),
            DatabaseBackend::MySQL => Arc::new(MySqlProvider::new(logger)),
        }
    }

    /// Create a provider for a configuration and connect it
    pub async fn connect(config: &DatabaseConfig) -> Result<Arc<dyn DatabaseProvider>> {
        let backend = config.validate()?;
        let provider = Self::create_for(backend, Logger::new(backend.name(), config.log_level));
        provider.connect(config).await?;
        Ok(provider)
    }

    /// Backend identifiers the factory accepts
    pub fn supported_backends() -> Vec<&'static str> {
        DatabaseBackend::ALL.iter().map(|b| b.name()).collect()
    }

    /// Check a configuration without any network I/O
    ///
    /// Runs the same validation and connection-string assembly `connect`
    /// does, so configuration errors surface before a provider is built.
    pub fn validate_config(config: &DatabaseConfig) -> Result<DatabaseBackend> {
        let backend = config.validate()?;
        build_dsn(backend, &config.dsn, &config.options, config.strict_dsn)?;
        if config.pool.max_open > 0 && config.pool.max_idle > config.pool.max_open {
            return Err(DatabaseError::config(format!(
                "pool max_idle ({}) exceeds max_open ({})",
                config.pool.max_idle, config.pool.max_open
            )));
        }
        Ok(backend)
    }
}
