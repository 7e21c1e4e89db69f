//! Backup orchestrator
//!
//! Maps export/import requests onto the active provider's backup
//! capability and repackages the engine's results.

use crate::backup::catalog::default_backup_dir;
use crate::backup::{
    BackupConfig, BackupProvider, BackupResult, BackupType, CompressionFormat, RestoreConfig,
};
use crate::database::connection::DatabaseBackend;
use crate::database::provider::DatabaseProvider;
use crate::error::{DatabaseError, Result};
use crate::plugin::{DataPlugin, ExportRequest, ExportResult, ImportRequest, ImportResult, Options};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use uuid::Uuid;

const NATIVE_FORMAT: &str = "native";

fn flag(options: &Options, key: &str, default: bool) -> Result<bool> {
    match options.get(key).map(|v| v.trim().to_lowercase()) {
        None => Ok(default),
        Some(v) if v.is_empty() => Ok(default),
        Some(v) => match v.as_str() {
            "true" | "1" | "yes" | "on" => Ok(true),
            "false" | "0" | "no" | "off" => Ok(false),
            _ => Err(DatabaseError::config(format!(
                "option {} must be true or false, got {}",
                key, v
            ))),
        },
    }
}

fn list(options: &Options, key: &str) -> Vec<String> {
    options
        .get(key)
        .map(|v| {
            v.split(',')
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(String::from)
                .collect()
        })
        .unwrap_or_default()
}

/// `backup_<YYYYmmdd_HHMMSS>_<8 hex>.<ext>[.gz|.zst]`
pub fn artifact_name(
    backend: DatabaseBackend,
    compression: Option<CompressionFormat>,
    at: DateTime<Utc>,
) -> String {
    let token = Uuid::new_v4().simple().to_string();
    let mut name = format!(
        "backup_{}_{}.{}",
        at.format("%Y%m%d_%H%M%S"),
        &token[..8],
        backend.artifact_extension()
    );
    if let Some(format) = compression {
        name.push('.');
        name.push_str(format.extension());
    }
    name
}

/// Export and import through a provider's backup capability.
///
/// At most one export or import runs at a time; an overlapping call fails
/// immediately instead of queueing.
pub struct BackupOrchestrator {
    provider: Arc<dyn DatabaseProvider>,
    output_dir: PathBuf,
    running: Mutex<()>,
}

impl BackupOrchestrator {
    /// Orchestrator writing to the default backup directory
    pub fn new(provider: Arc<dyn DatabaseProvider>) -> Self {
        Self {
            provider,
            output_dir: default_backup_dir(),
            running: Mutex::new(()),
        }
    }

    /// Directory used when a request names no `output_dir`
    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    fn capability(&self) -> Result<&dyn BackupProvider> {
        self.provider
            .as_backup()
            .ok_or_else(|| DatabaseError::BackupUnsupported(self.provider.name().to_string()))
    }

    fn metadata(&self, backup_id: &str, compression: Option<CompressionFormat>) -> BTreeMap<String, String> {
        let mut metadata = BTreeMap::new();
        metadata.insert("provider".to_string(), self.provider.name().to_string());
        metadata.insert("compressed".to_string(), compression.is_some().to_string());
        metadata.insert(
            "compression".to_string(),
            compression.map(|c| c.to_string()).unwrap_or_else(|| "none".to_string()),
        );
        metadata.insert("backup_id".to_string(), backup_id.to_string());
        metadata
    }

    /// Engine request for an export plus the warnings its options raise
    fn backup_request(&self, options: &Options, started_at: DateTime<Utc>) -> Result<(BackupConfig, Vec<String>)> {
        let backend: DatabaseBackend = self.provider.name().parse()?;
        let mut warnings = Vec::new();

        let compress = flag(options, "compress", true)?;
        let format = match options.get("compression") {
            Some(v) if !v.trim().is_empty() => v.parse::<CompressionFormat>()?,
            _ => CompressionFormat::default(),
        };
        let backup_type = match options.get("backup_type") {
            Some(v) if !v.trim().is_empty() => v.parse::<BackupType>()?,
            _ => BackupType::Full,
        };

        if let Some(requested) = options.get("format") {
            let requested = requested.trim();
            if !requested.is_empty() && !requested.eq_ignore_ascii_case(NATIVE_FORMAT) {
                warnings.push(format!(
                    "requested output format {} is not supported for {}; produced a native snapshot instead",
                    requested,
                    self.provider.name()
                ));
            }
        }
        for set in ["include_history", "include_audit"] {
            if !flag(options, set, true)? {
                warnings.push(format!(
                    "{} cannot be excluded from a native snapshot; it was included",
                    set.trim_start_matches("include_")
                ));
            }
        }

        let dir = options
            .get("output_dir")
            .filter(|d| !d.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| self.output_dir.clone());
        let mut config = BackupConfig::new(dir.join(artifact_name(
            backend,
            compress.then_some(format),
            started_at,
        )));
        if compress {
            config = config.compressed(format);
        }
        config.backup_type = backup_type;
        config.include_tables = list(options, "include_tables");
        config.exclude_tables = list(options, "exclude_tables");
        Ok((config, warnings))
    }

    fn export_result(&self, result: BackupResult, mut warnings: Vec<String>) -> ExportResult {
        warnings.extend(result.warnings);
        let mut metadata = self.metadata(&result.backup_id, result.compression);
        metadata.insert("backup_type".to_string(), result.backup_type.to_string());
        metadata.insert("table_count".to_string(), result.table_count.to_string());
        ExportResult {
            success: result.success,
            output_path: result.path,
            record_count: result.record_count,
            file_size: result.size,
            checksum: result.checksum,
            duration_ms: result.duration_ms,
            warnings,
            metadata,
            error: result.error,
        }
    }

    fn import_failure(&self, error: impl Into<String>, warnings: Vec<String>, clock: Instant) -> ImportResult {
        let mut metadata = BTreeMap::new();
        metadata.insert("provider".to_string(), self.provider.name().to_string());
        ImportResult {
            success: false,
            tables_imported: 0,
            records_imported: 0,
            duration_ms: clock.elapsed().as_millis() as u64,
            warnings,
            metadata,
            error: Some(error.into()),
        }
    }
}

#[async_trait]
impl DataPlugin for BackupOrchestrator {
    fn name(&self) -> &str {
        "backup"
    }

    fn description(&self) -> &str {
        "Snapshot and restore the active database"
    }

    async fn export(&self, request: &ExportRequest) -> Result<ExportResult> {
        let backup = self.capability()?;
        let _running = self.running.try_lock().map_err(|_| {
            DatabaseError::Backup("another backup or restore is already running".to_string())
        })?;

        let started_at = Utc::now();
        let (config, warnings) = self.backup_request(&request.options, started_at)?;
        let result = match backup.create_backup(&config).await {
            Ok(result) => result,
            Err(e) => BackupResult::failure(
                Uuid::new_v4().to_string(),
                config.path.clone(),
                started_at,
                e.to_string(),
            ),
        };
        Ok(self.export_result(result, warnings))
    }

    async fn import(&self, request: &ImportRequest) -> Result<ImportResult> {
        let backup = self.capability()?;
        let _running = self.running.try_lock().map_err(|_| {
            DatabaseError::Backup("another backup or restore is already running".to_string())
        })?;
        let clock = Instant::now();
        let options = &request.options;

        let validation = backup.validate_backup(&request.source).await?;
        if !validation.valid {
            return Ok(self.import_failure(
                format!("backup is not valid: {}", validation.errors.join("; ")),
                validation.warnings,
                clock,
            ));
        }

        let config = RestoreConfig {
            source: request.source.clone(),
            target_database: options
                .get("target_database")
                .filter(|t| !t.trim().is_empty())
                .cloned(),
            preserve_data: flag(options, "preserve_data", false)?,
            tables: list(options, "tables"),
            dry_run: flag(options, "dry_run", false)?,
        };

        let mut warnings = validation.warnings;
        match backup.restore_backup(&config).await {
            Ok(result) => {
                warnings.extend(result.warnings);
                let mut metadata = self.metadata(
                    validation.backup_id.as_deref().unwrap_or(""),
                    validation.compression,
                );
                metadata.insert("restore_id".to_string(), result.restore_id);
                metadata.insert("dry_run".to_string(), config.dry_run.to_string());
                if let Some(path) = result.preserved_path {
                    metadata.insert("preserved_path".to_string(), path.display().to_string());
                }
                Ok(ImportResult {
                    success: result.success,
                    tables_imported: result.tables_restored,
                    records_imported: result.records_restored,
                    duration_ms: clock.elapsed().as_millis() as u64,
                    warnings,
                    metadata,
                    error: result.error,
                })
            }
            Err(e) => {
                let reconnect_required = e.needs_reconnect();
                let mut failed = self.import_failure(e.to_string(), warnings, clock);
                failed
                    .metadata
                    .insert("reconnect_required".to_string(), reconnect_required.to_string());
                Ok(failed)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::sqlite::SqliteProvider;
    use crate::logging::Logger;

    fn orchestrator() -> BackupOrchestrator {
        BackupOrchestrator::new(Arc::new(SqliteProvider::new(Logger::silent())))
            .with_output_dir("/srv/backups")
    }

    fn options(pairs: &[(&str, &str)]) -> Options {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_artifact_name() {
        let at = DateTime::parse_from_rfc3339("2026-03-01T08:09:10Z")
            .unwrap()
            .with_timezone(&Utc);
        let name = artifact_name(DatabaseBackend::SQLite, Some(CompressionFormat::Zstd), at);
        assert!(name.starts_with("backup_20260301_080910_"));
        assert!(name.ends_with(".db.zst"));
        assert_eq!(name.len(), "backup_20260301_080910_".len() + 8 + ".db.zst".len());

        let plain = artifact_name(DatabaseBackend::PostgreSQL, None, at);
        assert!(plain.ends_with(".sql"));
        assert_ne!(plain, artifact_name(DatabaseBackend::PostgreSQL, None, at));
    }

    #[test]
    fn test_backup_request_defaults() {
        let (config, warnings) = orchestrator()
            .backup_request(&Options::new(), Utc::now())
            .unwrap();
        assert!(warnings.is_empty());
        assert_eq!(config.compression(), Some(CompressionFormat::Gzip));
        assert!(config.path.starts_with("/srv/backups"));
        assert!(config.path.to_string_lossy().ends_with(".db.gz"));
    }

    #[test]
    fn test_backup_request_options() {
        let opts = options(&[
            ("output_dir", "/tmp/out"),
            ("compress", "false"),
            ("backup_type", "incremental"),
            ("format", "csv"),
            ("include_audit", "false"),
            ("exclude_tables", "audit, sessions,"),
        ]);
        let (config, warnings) = orchestrator().backup_request(&opts, Utc::now()).unwrap();
        assert_eq!(config.compression(), None);
        assert!(config.path.starts_with("/tmp/out"));
        assert_eq!(config.backup_type, BackupType::Incremental);
        assert_eq!(config.exclude_tables, vec!["audit", "sessions"]);
        assert_eq!(warnings.len(), 2);
        assert!(warnings[0].contains("produced a native snapshot instead"));
    }

    #[test]
    fn test_bad_options_are_configuration_errors() {
        let err = orchestrator()
            .backup_request(&options(&[("compress", "maybe")]), Utc::now())
            .unwrap_err();
        assert!(err.is_configuration());
        assert!(orchestrator()
            .backup_request(&options(&[("compression", "rar")]), Utc::now())
            .is_err());
    }

    #[test]
    fn test_plugin_contract() {
        let plugin = orchestrator();
        assert_eq!(plugin.name(), "backup");
        assert_eq!(plugin.max_concurrency(), 1);
    }

    #[test]
    fn test_export_before_connect_is_a_failed_result() {
        let result = tokio_test::block_on(orchestrator().export(&ExportRequest::default())).unwrap();
        assert!(!result.success);
        assert!(result.error.unwrap().contains("never connected"));
        assert_eq!(result.metadata["provider"], "sqlite");
        assert!(result.output_path.starts_with("/srv/backups"));
    }
}
