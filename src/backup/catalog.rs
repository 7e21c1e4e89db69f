//! Backup catalog
//!
//! Every artifact carries a sidecar `<artifact>.manifest.json`. Listing a
//! backup directory means reading its manifests.

use crate::backup::archive::{parent_dir, with_suffix};
use crate::backup::types::{BackupInfo, BackupType, CompressionFormat};
use crate::config::DatabaseConfig;
use crate::error::{DatabaseError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Suffix of manifest files
pub const MANIFEST_SUFFIX: &str = ".manifest.json";

/// Sidecar description of an artifact
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    /// Backup identifier
    pub id: String,
    /// Provider name
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
    /// Tables in the snapshot
    pub table_count: usize,
    /// Rows in the snapshot
    pub record_count: u64,
    /// Artifact file name, relative to the manifest
    pub artifact: String,
}

impl Manifest {
    /// Manifest path of an artifact
    pub fn path_for(artifact: &Path) -> PathBuf {
        with_suffix(artifact, MANIFEST_SUFFIX)
    }

    /// Write the manifest beside `artifact`
    pub fn write(&self, artifact: &Path) -> Result<()> {
        let json = serde_json::to_vec_pretty(self)?;
        let mut staged = tempfile::Builder::new()
            .prefix(".dbvault-manifest-")
            .tempfile_in(parent_dir(artifact))?;
        staged.write_all(&json)?;
        staged.as_file().sync_all()?;
        staged
            .persist(Self::path_for(artifact))
            .map_err(|e| DatabaseError::backup("failed to write manifest", e.error))?;
        Ok(())
    }

    /// Manifest of an artifact, `None` if it has none
    pub fn read(artifact: &Path) -> Result<Option<Self>> {
        Self::read_file(&Self::path_for(artifact))
    }

    fn read_file(path: &Path) -> Result<Option<Self>> {
        match std::fs::read(path) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Catalog entry for the artifact in `dir`
    pub fn info(&self, dir: &Path) -> BackupInfo {
        BackupInfo {
            id: self.id.clone(),
            path: dir.join(&self.artifact),
            provider: self.provider.clone(),
            backup_type: self.backup_type,
            created_at: self.created_at,
            size: self.size,
            checksum: self.checksum.clone(),
            compression: self.compression,
        }
    }
}

/// `<local data dir>/dbvault/backups`, or `./backups` without one
pub fn default_backup_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|dir| dir.join("dbvault").join("backups"))
        .unwrap_or_else(|| PathBuf::from("backups"))
}

/// Backup directory of a configuration
pub fn backup_dir(config: Option<&DatabaseConfig>) -> PathBuf {
    config
        .and_then(|c| c.backup_dir.clone())
        .unwrap_or_else(default_backup_dir)
}

fn manifests(dir: &Path) -> Result<Vec<(PathBuf, Manifest)>> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut found = Vec::new();
    for entry in entries {
        let path = entry?.path();
        let is_manifest = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| n.ends_with(MANIFEST_SUFFIX))
            .unwrap_or(false);
        if !is_manifest {
            continue;
        }
        // Unreadable manifests are skipped, not fatal to the listing.
        if let Ok(Some(manifest)) = Manifest::read_file(&path) {
            found.push((path, manifest));
        }
    }
    Ok(found)
}

/// Backups of `provider` in `dir`, newest first
pub fn list(dir: &Path, provider: &str) -> Result<Vec<BackupInfo>> {
    let mut backups: Vec<BackupInfo> = manifests(dir)?
        .into_iter()
        .filter(|(_, m)| m.provider == provider)
        .map(|(_, m)| m.info(dir))
        .collect();
    backups.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    Ok(backups)
}

/// Remove the artifact and manifest of backup `id` in `dir`
pub fn delete(dir: &Path, id: &str) -> Result<()> {
    let (manifest_path, manifest) = manifests(dir)?
        .into_iter()
        .find(|(_, m)| m.id == id)
        .ok_or_else(|| DatabaseError::Backup(format!("no backup with id {}", id)))?;

    match std::fs::remove_file(dir.join(&manifest.artifact)) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(DatabaseError::backup("failed to delete backup", e)),
    }
    std::fs::remove_file(manifest_path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use tempfile::tempdir;

    fn manifest(id: &str, provider: &str, age_minutes: i64) -> Manifest {
        Manifest {
            id: id.to_string(),
            provider: provider.to_string(),
            backup_type: BackupType::Full,
            created_at: Utc::now() - Duration::minutes(age_minutes),
            size: 3,
            checksum: "abc".to_string(),
            compression: None,
            table_count: 1,
            record_count: 2,
            artifact: format!("{}.db", id),
        }
    }

    fn store(dir: &Path, m: &Manifest) {
        let artifact = dir.join(&m.artifact);
        std::fs::write(&artifact, b"abc").unwrap();
        m.write(&artifact).unwrap();
    }

    #[test]
    fn test_list_newest_first_and_filtered() {
        let dir = tempdir().unwrap();
        store(dir.path(), &manifest("old", "sqlite", 30));
        store(dir.path(), &manifest("new", "sqlite", 1));
        store(dir.path(), &manifest("other", "postgres", 0));
        std::fs::write(dir.path().join("junk.manifest.json"), b"{not json").unwrap();

        let listed = list(dir.path(), "sqlite").unwrap();
        let ids: Vec<_> = listed.iter().map(|b| b.id.as_str()).collect();
        assert_eq!(ids, vec!["new", "old"]);
        assert_eq!(listed[0].path, dir.path().join("new.db"));
    }

    #[test]
    fn test_delete() {
        let dir = tempdir().unwrap();
        store(dir.path(), &manifest("b1", "sqlite", 0));

        delete(dir.path(), "b1").unwrap();
        assert!(!dir.path().join("b1.db").exists());
        assert!(list(dir.path(), "sqlite").unwrap().is_empty());
        assert!(delete(dir.path(), "b1").is_err());
    }

    #[test]
    fn test_missing_dir_lists_nothing() {
        let dir = tempdir().unwrap();
        assert!(list(&dir.path().join("absent"), "sqlite").unwrap().is_empty());
    }

    #[test]
    fn test_backup_dir_prefers_config() {
        let config = DatabaseConfig::new("sqlite", "app.db").with_backup_dir("/srv/backups");
        assert_eq!(backup_dir(Some(&config)), PathBuf::from("/srv/backups"));
        assert_eq!(backup_dir(None), default_backup_dir());
    }
}
