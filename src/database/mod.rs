//! Database module
//!
//! This module provides the provider contract, one implementation per
//! backend, the factory that picks between them, and the pool, statistics
//! and schema pieces they share.

pub mod base;
pub mod connection;
pub mod factory;
pub mod mysql;
pub mod pool;
pub mod postgres;
pub mod provider;
pub mod schema;
pub mod sqlite;
pub mod stats;
pub mod transaction;

// Re-exports
pub use base::{Driver, Provider};
pub use connection::{DatabaseBackend, DatabasePool};
pub use factory::ProviderFactory;
pub use mysql::MySqlProvider;
pub use pool::PoolSettings;
pub use postgres::PostgresProvider;
pub use provider::{ConnectionState, DatabaseProvider};
pub use schema::{ColumnDef, ColumnType, Model, TableDef};
pub use sqlite::SqliteProvider;
pub use stats::{DatabaseStats, HealthStatus};
pub use transaction::{Transaction, TransactionInner};
