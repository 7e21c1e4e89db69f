//! Artifact files
//!
//! Blocking file-level helpers: writing an artifact through an optional
//! compressor into a temporary file that is renamed into place, hashing,
//! container detection by magic bytes, extraction beside a target and
//! validation. Async callers run these on the blocking pool.

use crate::backup::catalog::Manifest;
use crate::backup::types::{CompressionFormat, ValidationResult};
use crate::error::{DatabaseError, Result};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{self, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// First 16 bytes of every SQLite database file
pub const SQLITE_HEADER: &[u8; 16] = b"SQLite format 3\0";

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];
const ZSTD_MAGIC: [u8; 4] = [0x28, 0xb5, 0x2f, 0xfd];

/// What an artifact's decoded payload should be
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadKind {
    /// A complete SQLite database file
    SqliteFile,
    /// A SQL script produced by a dump tool
    SqlScript,
}

/// Directory a path lives in, `.` for bare file names
pub fn parent_dir(path: &Path) -> &Path {
    path.parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
}

/// `<path><suffix>`, e.g. `app.db-wal`
pub fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

fn staging_file(dir: &Path, prefix: &str) -> io::Result<NamedTempFile> {
    tempfile::Builder::new()
        .prefix(prefix)
        .suffix(".tmp")
        .tempfile_in(dir)
}

/// Compression container of a file, from its magic bytes
pub fn detect_compression(path: &Path) -> io::Result<Option<CompressionFormat>> {
    let mut magic = [0u8; 4];
    let mut file = File::open(path)?;
    let mut read = 0;
    while read < magic.len() {
        match file.read(&mut magic[read..])? {
            0 => break,
            n => read += n,
        }
    }

    if read >= 2 && magic[..2] == GZIP_MAGIC {
        Ok(Some(CompressionFormat::Gzip))
    } else if read == 4 && magic == ZSTD_MAGIC {
        Ok(Some(CompressionFormat::Zstd))
    } else {
        Ok(None)
    }
}

/// Decoded payload reader
pub fn open_payload(path: &Path) -> io::Result<Box<dyn Read>> {
    let compression = detect_compression(path)?;
    let file = BufReader::new(File::open(path)?);
    let reader: Box<dyn Read> = match compression {
        None => Box::new(file),
        Some(CompressionFormat::Gzip) => Box::new(GzDecoder::new(file)),
        Some(CompressionFormat::Zstd) => Box::new(zstd::stream::read::Decoder::with_buffer(file)?),
    };
    Ok(reader)
}

/// Hex SHA-256 of a file
pub fn sha256_file(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)?;
    Ok(hex::encode(hasher.finalize()))
}

fn encode_into(reader: &mut impl Read, file: &mut File, compression: Option<CompressionFormat>) -> io::Result<()> {
    match compression {
        None => {
            io::copy(reader, file)?;
        }
        Some(CompressionFormat::Gzip) => {
            let mut encoder = GzEncoder::new(&mut *file, Compression::default());
            io::copy(reader, &mut encoder)?;
            encoder.finish()?;
        }
        Some(CompressionFormat::Zstd) => {
            let mut encoder = zstd::stream::write::Encoder::new(&mut *file, 0)?;
            io::copy(reader, &mut encoder)?;
            encoder.finish()?;
        }
    }
    file.flush()?;
    file.sync_all()
}

/// Stream `source` into `target`, compressing if asked.
///
/// The bytes go to a temporary file in the target's directory first, so
/// `target` is either absent, untouched or complete. Returns the artifact
/// size.
pub fn write_artifact(source: &Path, target: &Path, compression: Option<CompressionFormat>) -> Result<u64> {
    let mut reader = BufReader::new(
        File::open(source).map_err(|e| DatabaseError::backup("cannot read source database", e))?,
    );

    let mut staged = staging_file(parent_dir(target), ".dbvault-backup-")
        .map_err(|e| DatabaseError::backup("backup path is not writable", e))?;
    encode_into(&mut reader, staged.as_file_mut(), compression)
        .map_err(|e| DatabaseError::backup("failed to write backup", e))?;

    staged
        .persist(target)
        .map_err(|e| DatabaseError::backup("failed to move backup into place", e.error))?;

    let size = std::fs::metadata(target)?.len();
    Ok(size)
}

/// Decode an artifact into a temporary file beside `target`.
///
/// Dropping the returned file removes it; persisting it over `target` is
/// the restore commit point.
pub fn extract_beside(artifact: &Path, target: &Path) -> Result<NamedTempFile> {
    let mut reader = open_payload(artifact)
        .map_err(|e| DatabaseError::restore("cannot read backup", e))?;
    let mut staged = staging_file(parent_dir(target), ".dbvault-restore-")
        .map_err(|e| DatabaseError::restore("target directory is not writable", e))?;

    io::copy(&mut reader, staged.as_file_mut())
        .and_then(|_| staged.as_file().sync_all())
        .map_err(|e| DatabaseError::restore("failed to stage backup", e))?;
    Ok(staged)
}

/// Whether a file starts with the SQLite header
pub fn has_sqlite_header(path: &Path) -> io::Result<bool> {
    let mut header = [0u8; 16];
    let mut file = File::open(path)?;
    match file.read_exact(&mut header) {
        Ok(()) => Ok(&header == SQLITE_HEADER),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

struct DecodedPayload {
    len: u64,
    head: Vec<u8>,
}

fn decode_fully(path: &Path) -> io::Result<DecodedPayload> {
    let mut reader = open_payload(path)?;
    let mut buf = [0u8; 64 * 1024];
    let mut payload = DecodedPayload {
        len: 0,
        head: Vec::with_capacity(SQLITE_HEADER.len()),
    };

    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        if payload.head.len() < SQLITE_HEADER.len() {
            let take = (SQLITE_HEADER.len() - payload.head.len()).min(n);
            payload.head.extend_from_slice(&buf[..take]);
        }
        payload.len += n as u64;
    }
    Ok(payload)
}

/// File-level validation. Never touches a live database.
pub fn validate(path: &Path, kind: PayloadKind) -> ValidationResult {
    let size = match std::fs::metadata(path) {
        Ok(meta) if meta.is_file() => meta.len(),
        Ok(_) => return ValidationResult::invalid(0, "backup path is not a file"),
        Err(e) => return ValidationResult::invalid(0, format!("backup file is not readable: {}", e)),
    };
    if size == 0 {
        return ValidationResult::invalid(0, "backup file is empty");
    }

    let mut result = ValidationResult {
        valid: false,
        backup_id: None,
        backup_type: None,
        size,
        record_count: None,
        checksum_valid: true,
        compression: None,
        errors: Vec::new(),
        warnings: Vec::new(),
    };

    match detect_compression(path) {
        Ok(compression) => result.compression = compression,
        Err(e) => result.errors.push(format!("backup file is not readable: {}", e)),
    }

    match Manifest::read(path) {
        Ok(Some(manifest)) => {
            result.backup_id = Some(manifest.id.clone());
            result.backup_type = Some(manifest.backup_type);
            result.record_count = Some(manifest.record_count);
            if manifest.size != size {
                result.errors.push(format!(
                    "size mismatch: manifest records {} bytes, file has {}",
                    manifest.size, size
                ));
            }
            if !manifest.checksum.is_empty() {
                match sha256_file(path) {
                    Ok(actual) if actual.eq_ignore_ascii_case(&manifest.checksum) => {}
                    Ok(_) => {
                        result.checksum_valid = false;
                        result.errors.push("checksum mismatch".to_string());
                    }
                    Err(e) => {
                        result.checksum_valid = false;
                        result.errors.push(format!("cannot hash backup: {}", e));
                    }
                }
            }
        }
        Ok(None) => result
            .warnings
            .push("no manifest found; checksum not verified".to_string()),
        Err(e) => result
            .warnings
            .push(format!("manifest unreadable, checksum not verified: {}", e)),
    }

    match decode_fully(path) {
        Ok(payload) if payload.len == 0 => result.errors.push("backup payload is empty".to_string()),
        Ok(payload) => {
            if kind == PayloadKind::SqliteFile && payload.head.as_slice() != SQLITE_HEADER {
                result
                    .errors
                    .push("backup payload is not a SQLite database".to_string());
            }
        }
        Err(e) => result
            .errors
            .push(format!("backup payload could not be decoded: {}", e)),
    }

    result.valid = result.errors.is_empty();
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sqlite_like(len: usize) -> Vec<u8> {
        let mut bytes = SQLITE_HEADER.to_vec();
        bytes.extend((0..len).map(|i| (i % 251) as u8));
        bytes
    }

    #[test]
    fn test_compressed_artifacts_round_trip() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("source.db");
        let original = sqlite_like(10 * 1024);
        std::fs::write(&source, &original).unwrap();

        for format in [CompressionFormat::Gzip, CompressionFormat::Zstd] {
            let target = dir.path().join(format!("backup.db.{}", format.extension()));
            let size = write_artifact(&source, &target, Some(format)).unwrap();
            assert_eq!(size, std::fs::metadata(&target).unwrap().len());
            assert_eq!(detect_compression(&target).unwrap(), Some(format));

            let mut decoded = Vec::new();
            open_payload(&target).unwrap().read_to_end(&mut decoded).unwrap();
            assert_eq!(decoded, original);
        }
    }

    #[test]
    fn test_validate_plain_and_rejects_garbage() {
        let dir = tempdir().unwrap();
        let good = dir.path().join("good.db");
        std::fs::write(&good, sqlite_like(128)).unwrap();
        let result = validate(&good, PayloadKind::SqliteFile);
        assert!(result.valid, "{:?}", result.errors);
        assert!(result.checksum_valid);
        assert!(!result.warnings.is_empty());

        let garbage = dir.path().join("garbage.db");
        std::fs::write(&garbage, b"definitely not sqlite").unwrap();
        assert!(!validate(&garbage, PayloadKind::SqliteFile).valid);
        assert!(validate(&garbage, PayloadKind::SqlScript).valid);
    }

    #[test]
    fn test_validate_empty_and_missing() {
        let dir = tempdir().unwrap();
        let empty = dir.path().join("empty.db");
        std::fs::write(&empty, b"").unwrap();

        let result = validate(&empty, PayloadKind::SqliteFile);
        assert!(!result.valid);
        assert!(!result.errors.is_empty());

        let missing = validate(&dir.path().join("nope.db"), PayloadKind::SqliteFile);
        assert!(!missing.valid);
    }

    #[test]
    fn test_truncated_gzip_is_invalid() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("source.db");
        std::fs::write(&source, sqlite_like(64 * 1024)).unwrap();
        let target = dir.path().join("backup.db.gz");
        write_artifact(&source, &target, Some(CompressionFormat::Gzip)).unwrap();

        let bytes = std::fs::read(&target).unwrap();
        std::fs::write(&target, &bytes[..bytes.len() / 2]).unwrap();
        let result = validate(&target, PayloadKind::SqliteFile);
        assert!(!result.valid);
    }

    #[test]
    fn test_extract_beside_and_header() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("source.db");
        std::fs::write(&source, sqlite_like(512)).unwrap();
        let artifact = dir.path().join("backup.db.zst");
        write_artifact(&source, &artifact, Some(CompressionFormat::Zstd)).unwrap();

        let target = dir.path().join("live.db");
        let staged = extract_beside(&artifact, &target).unwrap();
        assert_eq!(staged.path().parent(), Some(dir.path()));
        assert!(has_sqlite_header(staged.path()).unwrap());
        assert!(!target.exists());
    }

    #[test]
    fn test_path_helpers() {
        assert_eq!(parent_dir(Path::new("app.db")), Path::new("."));
        assert_eq!(parent_dir(Path::new("/a/b.db")), Path::new("/a"));
        assert_eq!(with_suffix(Path::new("/a/b.db"), "-wal"), PathBuf::from("/a/b.db-wal"));
    }
}
