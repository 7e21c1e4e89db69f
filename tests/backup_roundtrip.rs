//! SQLite backup and restore end to end.

use dbvault::backup::archive::sha256_file;
use dbvault::backup::{BackupConfig, CompressionFormat, RestoreConfig};
use dbvault::config::DatabaseConfig;
use dbvault::database::{ColumnDef, ColumnType, DatabaseProvider, Model, ProviderFactory, TableDef};
use dbvault::error::DatabaseError;
use dbvault::logging::Logger;
use flate2::read::GzDecoder;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;

fn events() -> TableDef {
    TableDef::new("events")
        .column(ColumnDef::id("id"))
        .column(ColumnDef::new("payload", ColumnType::Text).not_null())
}

fn config(path: &Path, backups: &Path) -> DatabaseConfig {
    DatabaseConfig::new("sqlite", path.to_string_lossy().into_owned()).with_backup_dir(backups)
}

async fn seeded(path: &Path, backups: &Path, rows: usize) -> Arc<dyn DatabaseProvider> {
    let provider = ProviderFactory::create("sqlite", Logger::silent()).unwrap();
    provider.connect(&config(path, backups)).await.unwrap();
    let table = events();
    let models: [&dyn Model; 1] = [&table];
    provider.migrate(&models).await.unwrap();

    let mut tx = provider.begin_transaction().await.unwrap();
    for i in 0..rows {
        tx.execute(&format!(
            "INSERT INTO events (payload) VALUES ('{}')",
            "x".repeat(64 + i % 7)
        ))
        .await
        .unwrap();
    }
    tx.commit().await.unwrap();
    provider
}

async fn counts(provider: &dyn DatabaseProvider) -> (usize, u64) {
    provider.handle().await.unwrap().logical_counts().await.unwrap()
}

#[tokio::test]
async fn test_compressed_backup_matches_source() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("app.db");
    let provider = seeded(&db, dir.path(), 200).await;

    let artifact = dir.path().join("out").join("snapshot.db.gz");
    let result = provider
        .as_backup()
        .unwrap()
        .create_backup(&BackupConfig::new(&artifact).compressed(CompressionFormat::Gzip))
        .await
        .unwrap();

    assert!(result.is_usable());
    assert_eq!(result.compression, Some(CompressionFormat::Gzip));
    assert_eq!(result.table_count, 1);
    assert_eq!(result.record_count, 200);
    assert_eq!(result.checksum, sha256_file(&artifact).unwrap());
    assert_eq!(result.size, std::fs::metadata(&artifact).unwrap().len());
    assert!(provider.stats().await.last_backup.is_some());

    provider.close().await.unwrap();
    let source = std::fs::read(&db).unwrap();
    assert!(source.len() >= 10 * 1024);
    let mut decoded = Vec::new();
    GzDecoder::new(std::fs::File::open(&artifact).unwrap())
        .read_to_end(&mut decoded)
        .unwrap();
    assert_eq!(decoded, source);
}

#[tokio::test]
async fn test_restore_into_fresh_provider() {
    let dir = tempfile::tempdir().unwrap();
    let backups = dir.path().join("backups");
    let original = seeded(&dir.path().join("a.db"), &backups, 50).await;
    let before = counts(original.as_ref()).await;

    let artifact = backups.join("a.db.zst");
    let backup = original
        .as_backup()
        .unwrap()
        .create_backup(&BackupConfig::new(&artifact).compressed(CompressionFormat::Zstd))
        .await
        .unwrap();

    let fresh = ProviderFactory::create("sqlite", Logger::silent()).unwrap();
    fresh
        .connect(&config(&dir.path().join("b.db"), &backups))
        .await
        .unwrap();
    assert_eq!(counts(fresh.as_ref()).await, (0, 0));

    let engine = fresh.as_backup().unwrap();
    let validation = engine.validate_backup(&artifact).await.unwrap();
    assert!(validation.valid, "{:?}", validation.errors);
    assert!(validation.checksum_valid);
    assert_eq!(validation.backup_id.as_deref(), Some(backup.backup_id.as_str()));

    let restored = engine
        .restore_backup(&RestoreConfig::new(&artifact))
        .await
        .unwrap();
    assert!(restored.success);
    assert!(fresh.is_connected());
    assert_eq!(counts(fresh.as_ref()).await, before);
    assert_eq!((restored.tables_restored, restored.records_restored), before);
    assert_eq!(fresh.name(), original.name());
    assert_eq!(fresh.version(), original.version());

    let listed = engine.list_backups().await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, backup.backup_id);
    engine.delete_backup(&backup.backup_id).await.unwrap();
    assert!(!artifact.exists());
    assert!(engine.list_backups().await.unwrap().is_empty());

    original.close().await.unwrap();
    fresh.close().await.unwrap();
}

#[tokio::test]
async fn test_dry_run_and_preserve_data() {
    let dir = tempfile::tempdir().unwrap();
    let source = seeded(&dir.path().join("src.db"), dir.path(), 5).await;
    let artifact = dir.path().join("src-backup.db");
    source
        .as_backup()
        .unwrap()
        .create_backup(&BackupConfig::new(&artifact))
        .await
        .unwrap();

    let target = seeded(&dir.path().join("dst.db"), dir.path(), 2).await;
    let engine = target.as_backup().unwrap();

    let mut request = RestoreConfig::new(&artifact);
    request.dry_run = true;
    let dry = engine.restore_backup(&request).await.unwrap();
    assert!(dry.success);
    assert!(!dry.warnings.is_empty());
    assert_eq!(counts(target.as_ref()).await, (1, 2));

    let mut request = RestoreConfig::new(&artifact);
    request.preserve_data = true;
    let restored = engine.restore_backup(&request).await.unwrap();
    assert_eq!(counts(target.as_ref()).await, (1, 5));
    let preserved = restored.preserved_path.expect("preserved copy");
    assert!(preserved
        .to_string_lossy()
        .contains("dst.db.pre-restore-"));
    assert!(preserved.exists());

    let mut request = RestoreConfig::new(&artifact);
    request.tables = vec!["events".to_string()];
    assert!(engine.restore_backup(&request).await.is_err());

    source.close().await.unwrap();
    target.close().await.unwrap();
}

#[tokio::test]
async fn test_restore_rejects_corrupt_artifact_and_keeps_connection() {
    let dir = tempfile::tempdir().unwrap();
    let provider = seeded(&dir.path().join("app.db"), dir.path(), 3).await;
    let bogus = dir.path().join("bogus.db");
    std::fs::write(&bogus, b"definitely not a database file").unwrap();

    let engine = provider.as_backup().unwrap();
    let validation = engine.validate_backup(&bogus).await.unwrap();
    assert!(!validation.valid);

    let err = engine
        .restore_backup(&RestoreConfig::new(&bogus))
        .await
        .unwrap_err();
    assert!(err.is_destructive());
    assert!(provider.is_connected());
    assert_eq!(counts(provider.as_ref()).await, (1, 3));
    provider.close().await.unwrap();
}

#[tokio::test]
async fn test_failed_replace_leaves_target_and_directory_clean() {
    let dir = tempfile::tempdir().unwrap();
    let provider = seeded(&dir.path().join("live.db"), dir.path(), 4).await;
    let artifact = dir.path().join("snapshot.db");
    let engine = provider.as_backup().unwrap();
    engine
        .create_backup(&BackupConfig::new(&artifact))
        .await
        .unwrap();

    let blocker = dir.path().join("blocker");
    std::fs::create_dir(&blocker).unwrap();
    std::fs::write(blocker.join("keep.txt"), b"keep").unwrap();

    let mut request = RestoreConfig::new(&artifact);
    request.target_database = Some(blocker.to_string_lossy().into_owned());
    let err = engine.restore_backup(&request).await.unwrap_err();
    assert!(err.is_destructive());
    assert!(!err.needs_reconnect());

    assert!(blocker.is_dir());
    let entries: Vec<String> = std::fs::read_dir(&blocker)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(entries, ["keep.txt"]);
    assert_eq!(std::fs::read(blocker.join("keep.txt")).unwrap(), b"keep");

    let leftovers: Vec<_> = std::fs::read_dir(dir.path())
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .filter(|name| name.starts_with(".dbvault-restore-"))
        .collect();
    assert!(leftovers.is_empty(), "{:?}", leftovers);

    assert!(provider.is_connected());
    assert_eq!(counts(provider.as_ref()).await, (1, 4));
    provider.close().await.unwrap();
}

#[tokio::test]
async fn test_aborted_restore_reports_failed_reconnect() {
    let dir = tempfile::tempdir().unwrap();
    let live_dir = dir.path().join("live");
    std::fs::create_dir(&live_dir).unwrap();
    let provider = seeded(&live_dir.join("app.db"), dir.path(), 3).await;
    let artifact = dir.path().join("snapshot.db");
    let engine = provider.as_backup().unwrap();
    engine
        .create_backup(&BackupConfig::new(&artifact))
        .await
        .unwrap();

    // Staging and reopening both need the directory.
    std::fs::remove_dir_all(&live_dir).unwrap();
    let err = engine
        .restore_backup(&RestoreConfig::new(&artifact))
        .await
        .unwrap_err();
    assert!(
        matches!(err, DatabaseError::RestoreAbortedNotReconnected { .. }),
        "{:?}",
        err
    );
    assert!(err.is_destructive());
    assert!(err.needs_reconnect());
    assert!(!provider.is_connected());

    std::fs::create_dir(&live_dir).unwrap();
    provider.reconnect().await.unwrap();
    assert!(provider.is_connected());
    provider.close().await.unwrap();
}
