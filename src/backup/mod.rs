//! Backup and restore
//!
//! [`BackupProvider`] is the capability a provider may offer. SQLite
//! providers snapshot the database file; networked providers go through
//! the server's dump and import tools.

pub mod archive;
pub mod catalog;
pub mod dump;
pub mod sqlite;
pub mod types;

pub use types::{
    BackupConfig, BackupInfo, BackupResult, BackupType, CompressionFormat, RestoreConfig,
    RestoreResult, ValidationResult,
};

use crate::backup::catalog::Manifest;
use crate::database::base::{Driver, Provider};
use crate::database::provider::DatabaseProvider;
use crate::error::{DatabaseError, Result};
use crate::logging::log_error;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};

/// Backup capability
///
/// At most one backup or restore may run against a provider at a time;
/// callers enforce this.
#[async_trait]
pub trait BackupProvider: Send + Sync {
    /// Snapshot the dataset to `config.path`
    async fn create_backup(&self, config: &BackupConfig) -> Result<BackupResult>;

    /// Replace the dataset with the contents of an artifact
    async fn restore_backup(&self, config: &RestoreConfig) -> Result<RestoreResult>;

    /// File-level checks of an artifact, without touching the database
    async fn validate_backup(&self, path: &Path) -> Result<ValidationResult>;

    /// Backups in the provider's backup directory, newest first
    async fn list_backups(&self) -> Result<Vec<BackupInfo>>;

    /// Remove a backup and its manifest
    async fn delete_backup(&self, id: &str) -> Result<()>;
}

/// Run blocking file work off the async runtime
pub(crate) async fn run_blocking<T, F>(work: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| DatabaseError::backup("file task failed", e))?
}

/// Reconnect a provider that a restore closed and then gave up on.
/// Returns the error to report: `cause`, or both failures when the
/// reconnect fails too.
pub(crate) async fn reconnect_after_abort<D: Driver>(
    provider: &Provider<D>,
    was_connected: bool,
    cause: DatabaseError,
) -> DatabaseError {
    if !was_connected {
        return cause;
    }
    match provider.reconnect().await {
        Ok(()) => cause,
        Err(e) => {
            log_error!(provider.logger(), error = %e, "reconnect after aborted restore failed");
            DatabaseError::RestoreAbortedNotReconnected {
                cause: cause.to_string(),
                reason: e.to_string(),
            }
        }
    }
}

/// Everything known about a freshly written artifact except its hash
pub(crate) struct Snapshot {
    pub provider: String,
    pub backup_id: String,
    pub started_at: DateTime<Utc>,
    pub table_count: usize,
    pub record_count: u64,
    pub warnings: Vec<String>,
}

/// Hash the artifact, write its manifest and build the result
pub(crate) async fn seal(config: &BackupConfig, snapshot: Snapshot) -> Result<BackupResult> {
    let path: PathBuf = config.path.clone();
    let compression = config.compression();
    let artifact_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| DatabaseError::Backup("backup path has no file name".to_string()))?;

    let manifest = run_blocking({
        let path = path.clone();
        let provider = snapshot.provider.clone();
        let id = snapshot.backup_id.clone();
        let (table_count, record_count) = (snapshot.table_count, snapshot.record_count);
        move || {
            let size = std::fs::metadata(&path)?.len();
            let checksum = archive::sha256_file(&path)
                .map_err(|e| DatabaseError::backup("cannot hash backup", e))?;
            let manifest = Manifest {
                id,
                provider,
                backup_type: BackupType::Full,
                created_at: Utc::now(),
                size,
                checksum,
                compression,
                table_count,
                record_count,
                artifact: artifact_name,
            };
            manifest.write(&path)?;
            Ok(manifest)
        }
    })
    .await?;

    Ok(BackupResult {
        success: true,
        backup_id: snapshot.backup_id,
        path,
        backup_type: manifest.backup_type,
        started_at: snapshot.started_at,
        completed_at: manifest.created_at,
        duration_ms: types::elapsed_ms(snapshot.started_at, manifest.created_at),
        size: manifest.size,
        checksum: manifest.checksum,
        compression,
        table_count: snapshot.table_count,
        record_count: snapshot.record_count,
        warnings: snapshot.warnings,
        error: None,
    })
}

/// Warnings for request fields a full snapshot ignores
pub(crate) fn snapshot_warnings(config: &BackupConfig, tables_supported: bool) -> Vec<String> {
    let mut warnings = Vec::new();
    if config.backup_type != BackupType::Full {
        warnings.push(format!(
            "{} backups are not supported; a full backup was produced",
            config.backup_type
        ));
    }
    if !tables_supported && (!config.include_tables.is_empty() || !config.exclude_tables.is_empty())
    {
        warnings.push("table filters are not supported; every table was included".to_string());
    }
    warnings
}

/// Create the parent directory of a backup path
pub(crate) async fn prepare_target(path: &Path) -> Result<()> {
    if path.as_os_str().is_empty() {
        return Err(DatabaseError::Backup("backup path is empty".to_string()));
    }
    tokio::fs::create_dir_all(archive::parent_dir(path))
        .await
        .map_err(|e| DatabaseError::backup("cannot create backup directory", e))
}
