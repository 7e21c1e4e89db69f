//! dbvault library
//!
//! One provider contract over SQLite, PostgreSQL and MySQL, connection
//! string hardening, and a backup/restore subsystem with an orchestrator
//! plugin on top. The admin binary is in src/main.rs.

pub mod backup;
pub mod cli;
pub mod config;
pub mod database;
pub mod error;
pub mod logging;
pub mod plugin;
pub mod security;

pub use config::{DatabaseConfig, LogLevel, PoolConfig};
pub use database::{DatabaseProvider, ProviderFactory};
pub use error::{DatabaseError, Result};
pub use logging::Logger;
