//! Configuration Storage
//!
//! Loading and saving [`DatabaseConfig`] as TOML, and building it from
//! environment variables (with `.env` support).

use crate::config::DatabaseConfig;
use crate::database::connection::DatabaseBackend;
use crate::error::{DatabaseError, Result};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

/// Environment variable holding the backend identifier
pub const ENV_BACKEND: &str = "DBVAULT_BACKEND";
/// Environment variable holding the connection string
pub const ENV_DSN: &str = "DBVAULT_DSN";
/// Environment variable holding the log level
pub const ENV_LOG_LEVEL: &str = "DBVAULT_LOG_LEVEL";
/// Environment variable holding the slow-query threshold in milliseconds
pub const ENV_SLOW_THRESHOLD_MS: &str = "DBVAULT_SLOW_THRESHOLD_MS";
/// Environment variable holding the backup directory
pub const ENV_BACKUP_DIR: &str = "DBVAULT_BACKUP_DIR";

impl DatabaseConfig {
    /// Parse a configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: DatabaseConfig = toml::from_str(content)
            .map_err(|e| DatabaseError::config(format!("failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref()).map_err(|e| {
            DatabaseError::config(format!(
                "failed to read config file {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;
        Self::from_toml_str(&content)
    }

    /// Save configuration to a TOML file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| DatabaseError::config(format!("failed to serialize config: {}", e)))?;
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(path.as_ref(), content)?;
        Ok(())
    }

    /// Build configuration from `DBVAULT_*` environment variables
    ///
    /// A `.env` file in the working directory is honoured. When no backend
    /// is given it is inferred from the connection string.
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();

        let dsn = env::var(ENV_DSN)
            .map_err(|_| DatabaseError::config(format!("{} is not set", ENV_DSN)))?;

        let backend = match env::var(ENV_BACKEND) {
            Ok(backend) => backend,
            Err(_) => DatabaseBackend::from_url(&dsn)?.name().to_string(),
        };

        let mut config = DatabaseConfig::new(backend, dsn);

        if let Ok(level) = env::var(ENV_LOG_LEVEL) {
            config.log_level = level.parse()?;
        }
        if let Ok(threshold) = env::var(ENV_SLOW_THRESHOLD_MS) {
            config.slow_threshold_ms = threshold.trim().parse().map_err(|_| {
                DatabaseError::config(format!("{} must be a number of milliseconds", ENV_SLOW_THRESHOLD_MS))
            })?;
        }
        if let Ok(dir) = env::var(ENV_BACKUP_DIR) {
            config.backup_dir = Some(PathBuf::from(dir));
        }

        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LogLevel;

    #[test]
    fn test_parse_toml() {
        let config = DatabaseConfig::from_toml_str(
            r#"
            backend = "sqlite"
            dsn = "data/app.db"
            log_level = "info"
            backup_dir = "backups"

            [options]
            _busy_timeout = "10000"

            [pool]
            max_open = 2
            "#,
        )
        .unwrap();

        assert_eq!(config.backend, "sqlite");
        assert_eq!(config.log_level, LogLevel::Info);
        assert_eq!(config.slow_threshold_ms, 200);
        assert_eq!(config.pool.max_open, 2);
        assert_eq!(config.pool.max_idle, 0);
        assert_eq!(config.options.get("_busy_timeout").map(String::as_str), Some("10000"));
        assert_eq!(config.backup_dir, Some(PathBuf::from("backups")));
    }

    #[test]
    fn test_parse_rejects_empty_dsn() {
        let err = DatabaseConfig::from_toml_str("backend = \"mysql\"\ndsn = \"\"\n").unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("db.toml");
        let config = DatabaseConfig::new("postgres", "postgres://app@localhost/app")
            .with_option("sslmode", "require");
        config.save(&path).unwrap();

        let loaded = DatabaseConfig::load(&path).unwrap();
        assert_eq!(loaded.backend, "postgres");
        assert_eq!(loaded.options.get("sslmode").map(String::as_str), Some("require"));
    }
}
