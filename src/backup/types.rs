//! Backup value types
//!
//! Requests and results exchanged with a backup-capable provider. All of
//! them are created per call; only the artifact file outlives the call.

use crate::error::DatabaseError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Backup type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackupType {
    /// Complete snapshot
    #[default]
    Full,
    /// Changes since the last backup of any type
    Incremental,
    /// Changes since the last full backup
    Differential,
}

impl fmt::Display for BackupType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BackupType::Full => "full",
            BackupType::Incremental => "incremental",
            BackupType::Differential => "differential",
        };
        write!(f, "{}", name)
    }
}

impl FromStr for BackupType {
    type Err = DatabaseError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "full" => Ok(BackupType::Full),
            "incremental" => Ok(BackupType::Incremental),
            "differential" => Ok(BackupType::Differential),
            other => Err(DatabaseError::config(format!("unknown backup type: {}", other))),
        }
    }
}

/// Single-stream compression container
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionFormat {
    /// gzip (`flate2`)
    #[default]
    Gzip,
    /// Zstandard
    Zstd,
}

impl CompressionFormat {
    /// Extension appended to compressed artifacts
    pub fn extension(&self) -> &'static str {
        match self {
            CompressionFormat::Gzip => "gz",
            CompressionFormat::Zstd => "zst",
        }
    }
}

impl fmt::Display for CompressionFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompressionFormat::Gzip => write!(f, "gzip"),
            CompressionFormat::Zstd => write!(f, "zstd"),
        }
    }
}

impl FromStr for CompressionFormat {
    type Err = DatabaseError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "gzip" | "gz" => Ok(CompressionFormat::Gzip),
            "zstd" | "zst" => Ok(CompressionFormat::Zstd),
            other => Err(DatabaseError::config(format!(
                "unknown compression format: {}",
                other
            ))),
        }
    }
}

/// Backup request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupConfig {
    /// Artifact path; parent directories are created
    pub path: PathBuf,
    /// Requested backup type
    #[serde(default)]
    pub backup_type: BackupType,
    /// Wrap the artifact in a compressed container
    #[serde(default)]
    pub compress: bool,
    /// Container used when `compress` is set
    #[serde(default)]
    pub compression: CompressionFormat,
    /// Only these tables, when non-empty
    #[serde(default)]
    pub include_tables: Vec<String>,
    /// Never these tables
    #[serde(default)]
    pub exclude_tables: Vec<String>,
}

impl BackupConfig {
    /// Uncompressed full backup to `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            backup_type: BackupType::Full,
            compress: false,
            compression: CompressionFormat::Gzip,
            include_tables: Vec::new(),
            exclude_tables: Vec::new(),
        }
    }

    /// Compress with `format`
    pub fn compressed(mut self, format: CompressionFormat) -> Self {
        self.compress = true;
        self.compression = format;
        self
    }

    /// Compression in effect, if any
    pub fn compression(&self) -> Option<CompressionFormat> {
        self.compress.then_some(self.compression)
    }
}

/// Outcome of a backup
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupResult {
    /// Backup completed and the artifact is usable
    pub success: bool,
    /// Generated backup identifier
    pub backup_id: String,
    /// Artifact path
    pub path: PathBuf,
    /// Backup type actually produced
    pub backup_type: BackupType,
    /// Start time
    pub started_at: DateTime<Utc>,
    /// End time
    pub completed_at: DateTime<Utc>,
    /// Elapsed time in milliseconds
    pub duration_ms: u64,
    /// Artifact size in bytes
    pub size: u64,
    /// SHA-256 of the artifact file, hex encoded
    pub checksum: String,
    /// Compression container, if any
    pub compression: Option<CompressionFormat>,
    /// Tables in the snapshot (best effort)
    pub table_count: usize,
    /// Rows in the snapshot (best effort)
    pub record_count: u64,
    /// Non-fatal notes
    pub warnings: Vec<String>,
    /// Failure reason; always set when `success` is false
    pub error: Option<String>,
}

impl BackupResult {
    /// Failed result; the error is never empty
    pub fn failure(
        backup_id: impl Into<String>,
        path: impl Into<PathBuf>,
        started_at: DateTime<Utc>,
        error: impl Into<String>,
    ) -> Self {
        let error = error.into();
        let completed_at = Utc::now();
        Self {
            success: false,
            backup_id: backup_id.into(),
            path: path.into(),
            backup_type: BackupType::Full,
            started_at,
            completed_at,
            duration_ms: elapsed_ms(started_at, completed_at),
            size: 0,
            checksum: String::new(),
            compression: None,
            table_count: 0,
            record_count: 0,
            warnings: Vec::new(),
            error: Some(if error.trim().is_empty() {
                "backup failed".to_string()
            } else {
                error
            }),
        }
    }

    /// Whether the artifact can be restored from
    pub fn is_usable(&self) -> bool {
        self.success && self.error.is_none() && !self.checksum.is_empty()
    }

    /// Elapsed time
    pub fn duration(&self) -> Duration {
        Duration::from_millis(self.duration_ms)
    }
}

/// Milliseconds between two timestamps, never negative
pub fn elapsed_ms(start: DateTime<Utc>, end: DateTime<Utc>) -> u64 {
    (end - start).num_milliseconds().max(0) as u64
}

/// Restore request
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RestoreConfig {
    /// Artifact to restore from
    pub source: PathBuf,
    /// Restore into this database instead of the live one
    #[serde(default)]
    pub target_database: Option<String>,
    /// Keep a copy of the data being replaced
    #[serde(default)]
    pub preserve_data: bool,
    /// Only these tables (not every backend supports this)
    #[serde(default)]
    pub tables: Vec<String>,
    /// Validate and report without changing anything
    #[serde(default)]
    pub dry_run: bool,
}

impl RestoreConfig {
    /// Restore the live database from `source`
    pub fn new(source: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            ..Self::default()
        }
    }
}

/// Outcome of a restore
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestoreResult {
    /// Restore completed
    pub success: bool,
    /// Generated restore identifier
    pub restore_id: String,
    /// Tables present after the restore
    pub tables_restored: usize,
    /// Rows present after the restore
    pub records_restored: u64,
    /// Non-fatal notes
    pub warnings: Vec<String>,
    /// Failure reason
    pub error: Option<String>,
    /// Copy of the replaced data, when `preserve_data` was set
    pub preserved_path: Option<PathBuf>,
    /// Elapsed time in milliseconds
    pub duration_ms: u64,
}

/// File-level validation report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationResult {
    /// Artifact passed every check
    pub valid: bool,
    /// Backup identifier from the manifest, if any
    pub backup_id: Option<String>,
    /// Backup type from the manifest, if any
    pub backup_type: Option<BackupType>,
    /// Artifact size in bytes
    pub size: u64,
    /// Row count from the manifest, if any
    pub record_count: Option<u64>,
    /// Recorded checksum matched, or no checksum was recorded
    pub checksum_valid: bool,
    /// Detected compression container
    pub compression: Option<CompressionFormat>,
    /// Failed checks
    pub errors: Vec<String>,
    /// Non-fatal notes
    pub warnings: Vec<String>,
}

impl ValidationResult {
    pub(crate) fn invalid(size: u64, error: impl Into<String>) -> Self {
        Self {
            valid: false,
            backup_id: None,
            backup_type: None,
            size,
            record_count: None,
            checksum_valid: false,
            compression: None,
            errors: vec![error.into()],
            warnings: Vec::new(),
        }
    }
}

/// Catalog entry for a stored backup
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupInfo {
    /// Backup identifier
    pub id: String,
    /// Artifact path
    pub path: PathBuf,
    /// Provider that produced it
    pub provider: String,
    /// Backup type
    pub backup_type: BackupType,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Artifact size in bytes
    pub size: u64,
    /// SHA-256 of the artifact, hex encoded
    pub checksum: String,
    /// Compression container, if any
    pub compression: Option<CompressionFormat>,
}
