//! Uploaded archive handling: bounded read, whole-archive validation, extraction.
//!
//! Validation walks every entry before anything touches the hosting
//! directory, so a rejected upload never leaves files behind.

use crate::error::{ApiError, StorageError};
use flate2::read::GzDecoder;
use std::fs;
use std::io::Read;
use std::path::{Component, Path, PathBuf};
use tar::{Archive, EntryType};
use tracing::debug;

/// Read the whole upload, failing once more than `limit` bytes arrive.
pub fn read_limited<R: Read>(reader: R, limit: u64) -> Result<Vec<u8>, ApiError> {
    let mut bytes = Vec::new();
    reader
        .take(limit.saturating_add(1))
        .read_to_end(&mut bytes)
        .map_err(|e| ApiError::InvalidArchive(format!("Failed to read upload: {}", e)))?;
    if bytes.len() as u64 > limit {
        return Err(ApiError::UploadTooLarge { limit });
    }
    Ok(bytes)
}

/// Entry kinds an upload may contain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
}

/// Entry that passed validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    /// Relative path, free of `..`, roots and prefixes
    pub path: PathBuf,
    pub kind: EntryKind,
}

/// Resolve a raw tar entry name to a relative path inside the target.
///
/// `Ok(None)` means the entry names the target itself (`./`).
pub fn entry_path(raw: &[u8]) -> Result<Option<PathBuf>, ApiError> {
    let name = std::str::from_utf8(raw)
        .map_err(|_| ApiError::InvalidArchive("entry name is not UTF-8".to_string()))?;
    if name.is_empty() {
        return Err(ApiError::InvalidArchive("entry with empty name".to_string()));
    }
    if name.contains('\\') {
        return Err(ApiError::InvalidArchive(format!(
            "entry {:?} contains a backslash",
            name
        )));
    }

    let mut relative = PathBuf::new();
    for component in Path::new(name).components() {
        match component {
            Component::Normal(part) => relative.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(ApiError::InvalidArchive(format!(
                    "entry {:?} escapes the target directory",
                    name
                )));
            }
        }
    }

    if relative.as_os_str().is_empty() {
        return Ok(None);
    }
    Ok(Some(relative))
}

fn open(bytes: &[u8]) -> Archive<GzDecoder<&[u8]>> {
    Archive::new(GzDecoder::new(bytes))
}

fn not_a_tarball(e: std::io::Error) -> ApiError {
    ApiError::InvalidArchive(format!("not a gzip-compressed tar archive: {}", e))
}

/// Check every entry of a gzip tar held in memory.
pub fn validate(bytes: &[u8]) -> Result<Vec<ArchiveEntry>, ApiError> {
    let mut archive = open(bytes);
    let mut validated = Vec::new();

    for entry in archive.entries().map_err(not_a_tarball)? {
        let entry = entry.map_err(not_a_tarball)?;
        let Some(path) = entry_path(&entry.path_bytes())? else {
            continue;
        };
        let kind = match entry.header().entry_type() {
            EntryType::Regular | EntryType::Continuous => EntryKind::File,
            EntryType::Directory => EntryKind::Directory,
            other => {
                return Err(ApiError::InvalidArchive(format!(
                    "entry {} has unsupported type {:?}",
                    path.display(),
                    other
                )))
            }
        };
        validated.push(ArchiveEntry { path, kind });
    }

    if validated.is_empty() {
        return Err(ApiError::InvalidArchive("archive is empty".to_string()));
    }
    Ok(validated)
}

/// Unpack a validated archive into `target`, which must already exist.
pub fn extract(bytes: &[u8], target: &Path) -> Result<usize, ApiError> {
    let mut archive = open(bytes);
    let mut written = 0;

    for entry in archive.entries().map_err(not_a_tarball)? {
        let mut entry = entry.map_err(not_a_tarball)?;
        let Some(relative) = entry_path(&entry.path_bytes())? else {
            continue;
        };
        let destination = target.join(&relative);

        match entry.header().entry_type() {
            EntryType::Directory => fs::create_dir_all(&destination)
                .map_err(StorageError::IoError)?,
            EntryType::Regular | EntryType::Continuous => {
                if let Some(parent) = destination.parent() {
                    fs::create_dir_all(parent)
                        .map_err(StorageError::IoError)?;
                }
                entry
                    .unpack(&destination)
                    .map_err(StorageError::IoError)?;
                written += 1;
            }
            other => {
                return Err(ApiError::InvalidArchive(format!(
                    "entry {} has unsupported type {:?}",
                    relative.display(),
                    other
                )))
            }
        }
    }

    debug!(target = %target.display(), files = written, "Archive extracted");
    Ok(written)
}
