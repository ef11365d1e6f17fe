//! History Importer
//!
//! Accepts a gzip tar of a git working directory, hosts it under a fresh
//! project id and catalogs its full history. The project record is appended
//! last; until then nothing about the import is visible to playback.

pub mod archive;

use crate::concurrency::ProjectLockRegistry;
use crate::config::LivelogConfig;
use crate::error::{ApiError, StorageError};
use crate::store::{MetadataStore, ProjectRecord, SnapshotRecord};
use crate::types::{generate_project_id, now_millis, ProjectId};
use crate::workspace::Workspace;
use git2::Signature;
use serde::Serialize;
use std::fs;
use std::io::{ErrorKind, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Index of the oldest imported revision
pub const FIRST_IMPORTED_INDEX: u64 = 0;

/// Result of a successful import
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImportOutcome {
    pub project_id: ProjectId,
    pub original_name: String,
    pub hosted_path: PathBuf,
    pub snapshots: usize,
}

/// Reject names that could be mistaken for paths.
pub fn validate_project_name(name: &str) -> Result<(), ApiError> {
    if name.trim().is_empty() {
        return Err(ApiError::InvalidProjectName(name.to_string()));
    }
    if name.contains('/') || name.contains('\\') {
        return Err(ApiError::InvalidProjectName(name.to_string()));
    }
    Ok(())
}

pub struct HistoryImporter {
    store: Arc<dyn MetadataStore>,
    locks: Arc<ProjectLockRegistry>,
    hosting_root: PathBuf,
    max_upload_bytes: u64,
    project_id_length: usize,
    lock_timeout: Duration,
    author_name: String,
    author_email: String,
}

impl HistoryImporter {
    pub fn new(
        store: Arc<dyn MetadataStore>,
        locks: Arc<ProjectLockRegistry>,
        config: &LivelogConfig,
    ) -> Result<Self, ApiError> {
        Ok(Self {
            store,
            locks,
            hosting_root: config.import.resolve_hosting_root()?,
            max_upload_bytes: config.import.max_upload_bytes,
            project_id_length: config.import.project_id_length,
            lock_timeout: config.playback.lock_timeout(),
            author_name: config.recorder.author_name.clone(),
            author_email: config.recorder.author_email.clone(),
        })
    }

    /// Import an uploaded archive.
    ///
    /// Every check on the upload runs before the project directory is
    /// created. Any later failure removes the directory again.
    pub fn import<R: Read>(
        &self,
        upload: R,
        original_name: &str,
    ) -> Result<ImportOutcome, ApiError> {
        validate_project_name(original_name)?;
        let bytes = archive::read_limited(upload, self.max_upload_bytes)?;
        let entries = archive::validate(&bytes)?;
        debug!(entries = entries.len(), bytes = bytes.len(), "Upload validated");

        fs::create_dir_all(&self.hosting_root).map_err(|e| {
            ApiError::WorkspaceError(format!(
                "Failed to create hosting root {}: {}",
                self.hosting_root.display(),
                e
            ))
        })?;
        let (project_id, hosted_path) = self.allocate_project_dir()?;
        let populated = self
            .locks
            .try_acquire_for(&project_id, self.lock_timeout)
            .and_then(|_guard| self.populate(&project_id, &hosted_path, &bytes, original_name));

        match populated {
            Ok(outcome) => {
                info!(
                    project_id = %outcome.project_id,
                    name = %outcome.original_name,
                    snapshots = outcome.snapshots,
                    "Project imported"
                );
                Ok(outcome)
            }
            Err(e) => {
                warn!(project_id = %project_id, error = %e, "Import failed, removing partial project");
                if let Err(cleanup) = fs::remove_dir_all(&hosted_path) {
                    warn!(
                        path = %hosted_path.display(),
                        error = %cleanup,
                        "Failed to remove partial project"
                    );
                }
                Err(e)
            }
        }
    }

    /// Pick an id unused by both the store and the hosting directory, and
    /// claim its directory.
    fn allocate_project_dir(&self) -> Result<(ProjectId, PathBuf), ApiError> {
        loop {
            let candidate = generate_project_id(self.project_id_length);
            if self.store.find_project(&candidate)?.is_some() {
                continue;
            }
            let path = self.hosting_root.join(&candidate);
            match fs::create_dir(&path) {
                Ok(()) => return Ok((candidate, path)),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(StorageError::IoError(e).into()),
            }
        }
    }

    fn populate(
        &self,
        project_id: &str,
        hosted_path: &Path,
        bytes: &[u8],
        original_name: &str,
    ) -> Result<ImportOutcome, ApiError> {
        archive::extract(bytes, hosted_path)?;

        let project_path = dunce::canonicalize(hosted_path).map_err(StorageError::IoError)?;
        let workspace = Workspace::open(hosted_path).map_err(|_| {
            ApiError::InvalidArchive("archive does not contain a git repository".to_string())
        })?;
        workspace
            .ensure_confined_to(&project_path)
            .map_err(|e| ApiError::InvalidArchive(e.to_string()))?;

        let signature = Signature::now(&self.author_name, &self.author_email)?;
        let message = "livelog: changes present at import";
        if workspace.stash_save(&signature, message, false)?.is_some() {
            debug!(project_id, "Stashed modifications present in the upload");
        }

        let records: Vec<SnapshotRecord> = workspace
            .history()?
            .into_iter()
            .enumerate()
            .map(|(offset, revision)| SnapshotRecord {
                project_path: project_path.clone(),
                project_id: project_id.to_string(),
                revision_id: revision.id,
                captured_at: revision.captured_at,
                sequence_index: FIRST_IMPORTED_INDEX + offset as u64,
            })
            .collect();

        for record in &records {
            self.store.append_snapshot(record)?;
        }
        self.store.append_project(&ProjectRecord {
            project_id: project_id.to_string(),
            display_name: original_name.to_string(),
            workspace_path: project_path.clone(),
            original_name: Some(original_name.to_string()),
            created_at: now_millis(),
        })?;

        Ok(ImportOutcome {
            project_id: project_id.to_string(),
            original_name: original_name.to_string(),
            hosted_path: project_path,
            snapshots: records.len(),
        })
    }
}
