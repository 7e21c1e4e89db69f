//! Error types for dbvault
//!
//! This module defines the error taxonomy shared by the providers, the
//! backup engine and the orchestrator. Every message that could embed a
//! connection string is passed through the credential sanitizer before it
//! is stored in an error value, so `Display` output is safe to log verbatim.

use crate::security::sanitize::sanitize;
use std::fmt::Display;
use thiserror::Error;

/// Result type alias for dbvault
pub type Result<T> = std::result::Result<T, DatabaseError>;

/// Main error type for dbvault
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// Empty or malformed DSN, invalid TLS mode, missing certificate,
    /// forbidden content. Always raised before any I/O.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// `connect` called on a connected provider
    #[error("connection error: already connected")]
    AlreadyConnected,

    /// Operation requires an open connection
    #[error("connection error: not connected")]
    NotConnected,

    /// Dial, ping or pool failures (sanitized)
    #[error("connection error: {0}")]
    Connection(String),

    /// Migration, statement or transaction failures (sanitized)
    #[error("operation failed: {0}")]
    Operation(String),

    /// Backup creation or validation failures
    #[error("backup failed: {0}")]
    Backup(String),

    /// Restore failed; the original data and connection are intact
    #[error("restore failed: {0}")]
    Restore(String),

    /// The data was replaced but the connection could not be re-established
    #[error("restore {restore_id} replaced the data but reconnecting failed: {reason}")]
    RestoredNotReconnected {
        /// Identifier of the restore that completed the replace
        restore_id: String,
        /// Sanitized reconnect failure
        reason: String,
    },

    /// Restore gave up before completing, then reconnecting failed too
    #[error("{cause}; reconnecting afterwards also failed: {reason}")]
    RestoreAbortedNotReconnected {
        /// Sanitized failure that stopped the restore
        cause: String,
        /// Sanitized reconnect failure
        reason: String,
    },

    /// Unknown backend identifier
    #[error("unsupported database backend: {0}")]
    UnsupportedBackend(String),

    /// The active provider has no backup capability
    #[error("provider {0} does not support backup operations")]
    BackupUnsupported(String),

    /// IO-related errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl DatabaseError {
    /// Build a connection error from any driver error, masking credentials.
    pub fn connection(context: impl Display, err: impl Display) -> Self {
        DatabaseError::Connection(sanitize(&format!("{}: {}", context, err)))
    }

    /// Build an operation error from any driver error, masking credentials.
    pub fn operation(context: impl Display, err: impl Display) -> Self {
        DatabaseError::Operation(sanitize(&format!("{}: {}", context, err)))
    }

    /// Build a backup error.
    pub fn backup(context: impl Display, err: impl Display) -> Self {
        DatabaseError::Backup(sanitize(&format!("{}: {}", context, err)))
    }

    /// Build a restore error.
    pub fn restore(context: impl Display, err: impl Display) -> Self {
        DatabaseError::Restore(sanitize(&format!("{}: {}", context, err)))
    }

    /// Build a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        DatabaseError::Configuration(message.into())
    }

    /// True for mistakes in the supplied configuration.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            DatabaseError::Configuration(_) | DatabaseError::UnsupportedBackend(_)
        )
    }

    /// True for transient or state-related connectivity failures.
    pub fn is_connection(&self) -> bool {
        matches!(
            self,
            DatabaseError::AlreadyConnected
                | DatabaseError::NotConnected
                | DatabaseError::Connection(_)
        )
    }

    /// True for failures of backup, restore and their aftermath.
    pub fn is_destructive(&self) -> bool {
        matches!(
            self,
            DatabaseError::Backup(_)
                | DatabaseError::Restore(_)
                | DatabaseError::RestoredNotReconnected { .. }
                | DatabaseError::RestoreAbortedNotReconnected { .. }
        )
    }

    /// True when the provider was left disconnected and needs `reconnect`.
    pub fn needs_reconnect(&self) -> bool {
        matches!(
            self,
            DatabaseError::RestoredNotReconnected { .. }
                | DatabaseError::RestoreAbortedNotReconnected { .. }
        )
    }
}
