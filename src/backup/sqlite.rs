//! SQLite backups
//!
//! A backup is a copy of the database file taken after a WAL checkpoint.
//! A restore stages the payload beside the live file and renames it over
//! the target; the rename is the only step that changes the target.

use crate::backup::archive::{self, PayloadKind};
use crate::backup::{
    catalog, prepare_target, reconnect_after_abort, run_blocking, seal, snapshot_warnings,
    BackupConfig, BackupInfo, BackupProvider, BackupResult, RestoreConfig, RestoreResult,
    Snapshot, ValidationResult,
};
use crate::database::base::{Provider, PING_TIMEOUT};
use crate::database::connection::DatabasePool;
use crate::database::provider::DatabaseProvider;
use crate::database::sqlite::{database_path, SqliteDriver};
use crate::error::{DatabaseError, Result};
use crate::logging::{log_error, log_info, log_warn};
use crate::security::sanitize;
use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tokio::time::timeout;
use uuid::Uuid;

fn same_file(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}

/// Table and row counts of a database file, opened read-only
async fn count_file(path: &Path) -> Result<(usize, u64)> {
    let options = SqliteConnectOptions::new().filename(path).read_only(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
        .map_err(|e| DatabaseError::operation("cannot open database for counting", e))?;
    let pool = DatabasePool::Sqlite(pool);
    let counts = pool.logical_counts().await;
    pool.close().await;
    counts
}

impl Provider<SqliteDriver> {
    async fn source_path(&self) -> Result<PathBuf> {
        let config = self.last_config().await.ok_or_else(|| {
            DatabaseError::Backup("provider has never connected; no database file is known".to_string())
        })?;
        database_path(&config.dsn).ok_or_else(|| {
            DatabaseError::Backup("in-memory databases have no file to back up".to_string())
        })
    }

    /// Flush the WAL into the main file so a plain copy is complete
    async fn quiesce(&self, pool: &DatabasePool, warnings: &mut Vec<String>) {
        let logger = self.logger();
        match timeout(PING_TIMEOUT, pool.ping()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => log_warn!(logger, error = %sanitize(&e.to_string()), "ping before backup failed"),
            Err(_) => log_warn!(logger, "ping before backup timed out"),
        }
        if let Err(e) = pool.execute("PRAGMA wal_checkpoint(TRUNCATE)").await {
            log_warn!(logger, error = %sanitize(&e.to_string()), "WAL checkpoint failed");
            warnings.push("WAL checkpoint failed; writes still in the WAL are not in the backup".to_string());
        }
    }
}

#[async_trait]
impl BackupProvider for Provider<SqliteDriver> {
    async fn create_backup(&self, config: &BackupConfig) -> Result<BackupResult> {
        let started_at = Utc::now();
        let backup_id = Uuid::new_v4().to_string();
        let logger = self.logger();

        let source = self.source_path().await?;
        if !source.is_file() {
            return Err(DatabaseError::Backup(format!(
                "database file {} does not exist",
                source.display()
            )));
        }
        prepare_target(&config.path).await?;
        if same_file(&source, &config.path) {
            return Err(DatabaseError::Backup(
                "backup path must differ from the database file".to_string(),
            ));
        }

        let mut warnings = snapshot_warnings(config, false);
        let live = self.pool().await.ok();
        match live {
            Some(ref pool) => self.quiesce(pool, &mut warnings).await,
            None => log_info!(logger, "not connected; copying the database file as it is"),
        }

        let compression = config.compression();
        run_blocking({
            let (source, target) = (source.clone(), config.path.clone());
            move || archive::write_artifact(&source, &target, compression)
        })
        .await?;

        let counted = match live {
            Some(ref pool) => pool.logical_counts().await,
            None => count_file(&source).await,
        };
        let (table_count, record_count) = counted.unwrap_or_else(|e| {
            warnings.push(format!("table counts unavailable: {}", e));
            (0, 0)
        });

        let result = seal(
            config,
            Snapshot {
                provider: self.name().to_string(),
                backup_id,
                started_at,
                table_count,
                record_count,
                warnings,
            },
        )
        .await?;

        self.tracker().mark_backup(result.completed_at);
        log_info!(
            logger,
            backup_id = %result.backup_id,
            path = %result.path.display(),
            size = result.size,
            tables = result.table_count,
            "backup created"
        );
        Ok(result)
    }

    async fn restore_backup(&self, config: &RestoreConfig) -> Result<RestoreResult> {
        let clock = Instant::now();
        let restore_id = Uuid::new_v4().to_string();
        let logger = self.logger();
        let mut warnings = Vec::new();

        if !config.tables.is_empty() {
            return Err(DatabaseError::Restore(
                "selective table restore is not supported for sqlite".to_string(),
            ));
        }

        let validation = self.validate_backup(&config.source).await?;
        if !validation.valid {
            return Err(DatabaseError::Restore(format!(
                "backup is not valid: {}",
                validation.errors.join("; ")
            )));
        }

        let live_path = self
            .last_config()
            .await
            .and_then(|c| database_path(&c.dsn));
        let target = match config.target_database {
            Some(ref target) => database_path(target).ok_or_else(|| {
                DatabaseError::Restore("cannot restore into an in-memory database".to_string())
            })?,
            None => live_path.clone().ok_or_else(|| {
                DatabaseError::Restore("provider has never connected; no target database".to_string())
            })?,
        };
        let is_live = live_path
            .as_deref()
            .map(|live| same_file(live, &target))
            .unwrap_or(false);

        if config.dry_run {
            warnings.push(format!(
                "dry run: {} would be replaced; nothing was changed",
                target.display()
            ));
            return Ok(RestoreResult {
                success: true,
                restore_id,
                tables_restored: 0,
                records_restored: validation.record_count.unwrap_or(0),
                warnings,
                error: None,
                preserved_path: None,
                duration_ms: clock.elapsed().as_millis() as u64,
            });
        }

        // Release the file before touching it.
        let was_connected = is_live && self.is_connected();
        if is_live {
            self.close().await?;
        }

        let staged = run_blocking({
            let (source, target) = (config.source.clone(), target.clone());
            move || {
                let staged = archive::extract_beside(&source, &target)?;
                if !archive::has_sqlite_header(staged.path())? {
                    return Err(DatabaseError::Restore(
                        "backup payload is not a SQLite database".to_string(),
                    ));
                }
                Ok(staged)
            }
        })
        .await;
        let staged = match staged {
            Ok(staged) => staged,
            Err(e) => return Err(reconnect_after_abort(self, was_connected, e).await),
        };

        let mut preserved_path = None;
        if config.preserve_data && target.is_file() {
            let copy = archive::with_suffix(
                &target,
                &format!(".pre-restore-{}", Utc::now().format("%Y%m%d_%H%M%S")),
            );
            if let Err(e) = tokio::fs::copy(&target, &copy).await {
                drop(staged);
                let cause = DatabaseError::restore("failed to preserve existing data", e);
                return Err(reconnect_after_abort(self, was_connected, cause).await);
            }
            preserved_path = Some(copy);
        }

        // Commit point. On failure the staged file is dropped and removed,
        // and the target is untouched.
        let replaced = run_blocking({
            let target = target.clone();
            move || {
                staged
                    .persist(&target)
                    .map(|_| ())
                    .map_err(|e| DatabaseError::restore("atomic replace failed", e.error))
            }
        })
        .await;
        if let Err(e) = replaced {
            return Err(reconnect_after_abort(self, was_connected, e).await);
        }
        log_info!(logger, restore_id = %restore_id, target = %target.display(), "database file replaced");

        for suffix in ["-wal", "-shm"] {
            let sidecar = archive::with_suffix(&target, suffix);
            match tokio::fs::remove_file(&sidecar).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warnings.push(format!("could not remove {}: {}", sidecar.display(), e)),
            }
        }

        let counted = if was_connected {
            if let Err(e) = self.reconnect().await {
                log_error!(logger, restore_id = %restore_id, error = %e, "reconnect after restore failed");
                return Err(DatabaseError::RestoredNotReconnected {
                    restore_id,
                    reason: e.to_string(),
                });
            }
            self.pool().await?.logical_counts().await
        } else {
            count_file(&target).await
        };
        let (tables_restored, records_restored) = counted.unwrap_or_else(|e| {
            warnings.push(format!("table counts unavailable: {}", e));
            (0, 0)
        });

        log_info!(
            logger,
            restore_id = %restore_id,
            tables = tables_restored,
            records = records_restored,
            "restore completed"
        );
        Ok(RestoreResult {
            success: true,
            restore_id,
            tables_restored,
            records_restored,
            warnings,
            error: None,
            preserved_path,
            duration_ms: clock.elapsed().as_millis() as u64,
        })
    }

    async fn validate_backup(&self, path: &Path) -> Result<ValidationResult> {
        let path = path.to_path_buf();
        run_blocking(move || Ok(archive::validate(&path, PayloadKind::SqliteFile))).await
    }

    async fn list_backups(&self) -> Result<Vec<BackupInfo>> {
        let dir = catalog::backup_dir(self.last_config().await.as_ref());
        let provider = self.name().to_string();
        run_blocking(move || catalog::list(&dir, &provider)).await
    }

    async fn delete_backup(&self, id: &str) -> Result<()> {
        let dir = catalog::backup_dir(self.last_config().await.as_ref());
        let id = id.to_string();
        run_blocking({
            let id = id.clone();
            move || catalog::delete(&dir, &id)
        })
        .await?;
        log_info!(self.logger(), backup_id = %id, "backup deleted");
        Ok(())
    }
}
