//! Database connection abstraction
//!
//! This module provides the backend enum and the pool wrapper used by every
//! provider. The pool wrapper is the opaque relational access handle handed
//! to callers; it is cheap to clone and safe to share across tasks.

use crate::error::{DatabaseError, Result};
use serde::{Deserialize, Serialize};
use sqlx::{mysql::MySqlPool, postgres::PgPool, sqlite::SqlitePool, Connection};
use std::str::FromStr;

/// Supported database backends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseBackend {
    /// Embedded SQLite file
    SQLite,
    /// PostgreSQL server
    PostgreSQL,
    /// MySQL/MariaDB server
    MySQL,
}

impl DatabaseBackend {
    /// Every backend the factory can construct
    pub const ALL: [DatabaseBackend; 3] = [
        DatabaseBackend::SQLite,
        DatabaseBackend::PostgreSQL,
        DatabaseBackend::MySQL,
    ];

    /// Infer the backend from a connection string
    pub fn from_url(url: &str) -> Result<Self> {
        let url_lower = url.trim().to_lowercase();

        if url_lower.starts_with("postgres://") || url_lower.starts_with("postgresql://") {
            Ok(DatabaseBackend::PostgreSQL)
        } else if url_lower.starts_with("mysql://")
            || url_lower.starts_with("mariadb://")
            || url_lower.contains("@tcp(")
            || url_lower.contains("@unix(")
        {
            Ok(DatabaseBackend::MySQL)
        } else if url_lower.starts_with("sqlite:")
            || url_lower.starts_with("file:")
            || url_lower == ":memory:"
            || url_lower.ends_with(".db")
            || url_lower.ends_with(".sqlite")
            || url_lower.ends_with(".sqlite3")
        {
            Ok(DatabaseBackend::SQLite)
        } else if url_lower.contains("dbname=") || url_lower.contains("host=") {
            Ok(DatabaseBackend::PostgreSQL)
        } else {
            Err(DatabaseError::config(
                "unable to determine database type from connection string",
            ))
        }
    }

    /// Backend identifier, as accepted by the factory and reported by `name()`
    pub fn name(&self) -> &'static str {
        match self {
            DatabaseBackend::SQLite => "sqlite",
            DatabaseBackend::PostgreSQL => "postgres",
            DatabaseBackend::MySQL => "mysql",
        }
    }

    /// Human friendly backend name
    pub fn display_name(&self) -> &'static str {
        match self {
            DatabaseBackend::SQLite => "SQLite",
            DatabaseBackend::PostgreSQL => "PostgreSQL",
            DatabaseBackend::MySQL => "MySQL",
        }
    }

    /// Get the default port for this database
    pub fn default_port(&self) -> u16 {
        match self {
            DatabaseBackend::SQLite => 0, // No port for file-based DB
            DatabaseBackend::PostgreSQL => 5432,
            DatabaseBackend::MySQL => 3306,
        }
    }

    /// True for file-backed, single-writer engines
    pub fn is_embedded(&self) -> bool {
        matches!(self, DatabaseBackend::SQLite)
    }

    /// File extension of an uncompressed backup artifact
    pub fn artifact_extension(&self) -> &'static str {
        match self {
            DatabaseBackend::SQLite => "db",
            DatabaseBackend::PostgreSQL | DatabaseBackend::MySQL => "sql",
        }
    }

    /// Quote an identifier that has already passed validation
    pub fn quote_identifier(&self, ident: &str) -> String {
        match self {
            DatabaseBackend::MySQL => format!("`{}`", ident),
            DatabaseBackend::SQLite | DatabaseBackend::PostgreSQL => format!("\"{}\"", ident),
        }
    }
}

impl FromStr for DatabaseBackend {
    type Err = DatabaseError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "sqlite" | "sqlite3" => Ok(DatabaseBackend::SQLite),
            "postgresql" | "postgres" | "pg" => Ok(DatabaseBackend::PostgreSQL),
            "mysql" | "mariadb" => Ok(DatabaseBackend::MySQL),
            _ => Err(DatabaseError::UnsupportedBackend(s.to_string())),
        }
    }
}

impl std::fmt::Display for DatabaseBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

/// Check that a table or column name is a plain identifier.
pub fn validate_identifier(ident: &str) -> Result<()> {
    let mut chars = ident.chars();
    let valid = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        && ident.len() <= 63;
    if valid {
        Ok(())
    } else {
        Err(DatabaseError::Operation(format!(
            "invalid identifier {:?}: expected letters, digits and underscores",
            ident
        )))
    }
}

/// Database connection pool wrapper
///
/// This enum holds the actual database pool for the connected backend.
#[derive(Clone, Debug)]
pub enum DatabasePool {
    /// SQLite pool
    Sqlite(SqlitePool),
    /// PostgreSQL pool
    Postgres(PgPool),
    /// MySQL pool
    MySql(MySqlPool),
}

impl DatabasePool {
    /// Get the database backend for this pool
    pub fn backend(&self) -> DatabaseBackend {
        match self {
            DatabasePool::Sqlite(_) => DatabaseBackend::SQLite,
            DatabasePool::Postgres(_) => DatabaseBackend::PostgreSQL,
            DatabasePool::MySql(_) => DatabaseBackend::MySQL,
        }
    }

    /// Open connections (idle and in use)
    pub fn size(&self) -> u32 {
        match self {
            DatabasePool::Sqlite(pool) => pool.size(),
            DatabasePool::Postgres(pool) => pool.size(),
            DatabasePool::MySql(pool) => pool.size(),
        }
    }

    /// Idle connections
    pub fn num_idle(&self) -> usize {
        match self {
            DatabasePool::Sqlite(pool) => pool.num_idle(),
            DatabasePool::Postgres(pool) => pool.num_idle(),
            DatabasePool::MySql(pool) => pool.num_idle(),
        }
    }

    /// Whether `close` has been called
    pub fn is_closed(&self) -> bool {
        match self {
            DatabasePool::Sqlite(pool) => pool.is_closed(),
            DatabasePool::Postgres(pool) => pool.is_closed(),
            DatabasePool::MySql(pool) => pool.is_closed(),
        }
    }

    /// Close every connection and wait for checked-out ones to return
    pub async fn close(&self) {
        match self {
            DatabasePool::Sqlite(pool) => pool.close().await,
            DatabasePool::Postgres(pool) => pool.close().await,
            DatabasePool::MySql(pool) => pool.close().await,
        }
    }

    /// Check out a connection and ping it
    pub async fn ping(&self) -> std::result::Result<(), sqlx::Error> {
        match self {
            DatabasePool::Sqlite(pool) => {
                let mut conn = pool.acquire().await?;
                conn.ping().await
            }
            DatabasePool::Postgres(pool) => {
                let mut conn = pool.acquire().await?;
                conn.ping().await
            }
            DatabasePool::MySql(pool) => {
                let mut conn = pool.acquire().await?;
                conn.ping().await
            }
        }
    }

    /// Execute one statement and return the affected row count
    pub async fn execute(&self, sql: &str) -> std::result::Result<u64, sqlx::Error> {
        let affected = match self {
            DatabasePool::Sqlite(pool) => sqlx::query(sql).execute(pool).await?.rows_affected(),
            DatabasePool::Postgres(pool) => sqlx::query(sql).execute(pool).await?.rows_affected(),
            DatabasePool::MySql(pool) => sqlx::query(sql).execute(pool).await?.rows_affected(),
        };
        Ok(affected)
    }

    /// Fetch a single text value
    pub async fn fetch_string(&self, sql: &str) -> std::result::Result<String, sqlx::Error> {
        match self {
            DatabasePool::Sqlite(pool) => sqlx::query_scalar(sql).fetch_one(pool).await,
            DatabasePool::Postgres(pool) => sqlx::query_scalar(sql).fetch_one(pool).await,
            DatabasePool::MySql(pool) => sqlx::query_scalar(sql).fetch_one(pool).await,
        }
    }

    /// Fetch a single integer value
    pub async fn fetch_i64(&self, sql: &str) -> std::result::Result<i64, sqlx::Error> {
        match self {
            DatabasePool::Sqlite(pool) => sqlx::query_scalar(sql).fetch_one(pool).await,
            DatabasePool::Postgres(pool) => sqlx::query_scalar(sql).fetch_one(pool).await,
            DatabasePool::MySql(pool) => sqlx::query_scalar(sql).fetch_one(pool).await,
        }
    }

    /// User tables in the current database/schema, sorted by name
    pub async fn list_tables(&self) -> std::result::Result<Vec<String>, sqlx::Error> {
        match self {
            DatabasePool::Sqlite(pool) => {
                sqlx::query_scalar(
                    "SELECT name FROM sqlite_master \
                     WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
                )
                .fetch_all(pool)
                .await
            }
            DatabasePool::Postgres(pool) => {
                sqlx::query_scalar(
                    "SELECT tablename::text FROM pg_catalog.pg_tables \
                     WHERE schemaname = current_schema() ORDER BY tablename",
                )
                .fetch_all(pool)
                .await
            }
            DatabasePool::MySql(pool) => {
                sqlx::query_scalar(
                    "SELECT CAST(table_name AS CHAR) FROM information_schema.tables \
                     WHERE table_schema = DATABASE() AND table_type = 'BASE TABLE' \
                     ORDER BY table_name",
                )
                .fetch_all(pool)
                .await
            }
        }
    }

    /// Row count of one table
    pub async fn count_rows(&self, table: &str) -> Result<i64> {
        validate_identifier(table)?;
        let sql = format!(
            "SELECT COUNT(*) FROM {}",
            self.backend().quote_identifier(table)
        );
        self.fetch_i64(&sql)
            .await
            .map_err(|e| DatabaseError::operation(format!("failed to count rows of {}", table), e))
    }

    /// Table count and total row count, skipping tables that cannot be counted
    pub async fn logical_counts(&self) -> Result<(usize, u64)> {
        let tables = self
            .list_tables()
            .await
            .map_err(|e| DatabaseError::operation("failed to list tables", e))?;

        let mut records = 0u64;
        for table in &tables {
            if let Ok(count) = self.count_rows(table).await {
                records += count.max(0) as u64;
            }
        }
        Ok((tables.len(), records))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_from_url() {
        assert_eq!(
            DatabaseBackend::from_url("postgresql://localhost/test").unwrap(),
            DatabaseBackend::PostgreSQL
        );
        assert_eq!(
            DatabaseBackend::from_url("host=localhost dbname=app").unwrap(),
            DatabaseBackend::PostgreSQL
        );
        assert_eq!(
            DatabaseBackend::from_url("mysql://localhost/test").unwrap(),
            DatabaseBackend::MySQL
        );
        assert_eq!(
            DatabaseBackend::from_url("user:pass@tcp(localhost:3306)/db").unwrap(),
            DatabaseBackend::MySQL
        );
        assert_eq!(
            DatabaseBackend::from_url("sqlite://test.db").unwrap(),
            DatabaseBackend::SQLite
        );
        assert_eq!(
            DatabaseBackend::from_url("test.db").unwrap(),
            DatabaseBackend::SQLite
        );
    }

    #[test]
    fn test_backend_default_port() {
        assert_eq!(DatabaseBackend::PostgreSQL.default_port(), 5432);
        assert_eq!(DatabaseBackend::MySQL.default_port(), 3306);
        assert_eq!(DatabaseBackend::SQLite.default_port(), 0);
    }

    #[test]
    fn test_backend_from_str() {
        assert_eq!(
            "postgres".parse::<DatabaseBackend>().unwrap(),
            DatabaseBackend::PostgreSQL
        );
        assert_eq!(
            "MariaDB".parse::<DatabaseBackend>().unwrap(),
            DatabaseBackend::MySQL
        );
        assert_eq!(
            "sqlite3".parse::<DatabaseBackend>().unwrap(),
            DatabaseBackend::SQLite
        );
        assert!(matches!(
            "mssql".parse::<DatabaseBackend>(),
            Err(DatabaseError::UnsupportedBackend(_))
        ));
    }

    #[test]
    fn test_invalid_url() {
        assert!(DatabaseBackend::from_url("invalid://url").is_err());
    }

    #[test]
    fn test_backend_display() {
        assert_eq!(DatabaseBackend::PostgreSQL.to_string(), "PostgreSQL");
        assert_eq!(DatabaseBackend::MySQL.to_string(), "MySQL");
        assert_eq!(DatabaseBackend::SQLite.to_string(), "SQLite");
        assert_eq!(DatabaseBackend::SQLite.name(), "sqlite");
    }

    #[test]
    fn test_identifier_validation() {
        assert!(validate_identifier("users").is_ok());
        assert!(validate_identifier("_audit_log2").is_ok());
        assert!(validate_identifier("").is_err());
        assert!(validate_identifier("1users").is_err());
        assert!(validate_identifier("users; DROP").is_err());
        assert_eq!(DatabaseBackend::MySQL.quote_identifier("t"), "`t`");
        assert_eq!(DatabaseBackend::PostgreSQL.quote_identifier("t"), "\"t\"");
    }

    #[tokio::test]
    async fn test_sqlite_pool_helpers() {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let pool = DatabasePool::Sqlite(pool);
        pool.execute("CREATE TABLE items (id INTEGER PRIMARY KEY, name TEXT)")
            .await
            .unwrap();
        pool.execute("INSERT INTO items (name) VALUES ('a'), ('b')")
            .await
            .unwrap();

        assert!(pool.ping().await.is_ok());
        assert_eq!(pool.list_tables().await.unwrap(), vec!["items".to_string()]);
        assert_eq!(pool.count_rows("items").await.unwrap(), 2);
        assert_eq!(pool.logical_counts().await.unwrap(), (1, 2));
        assert_eq!(pool.backend(), DatabaseBackend::SQLite);
    }
}
