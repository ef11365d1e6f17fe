//! Error types
//!
//! Storage errors come from the metadata store backends; API errors are what
//! the recorder, importer, and playback surface report to their callers.

use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

/// Errors raised by a metadata store backend.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Store call timed out after {0:?}")]
    Timeout(Duration),

    #[error("Revision {revision_id} is already recorded for project {project_id}")]
    DuplicateRevision {
        project_id: String,
        revision_id: String,
    },

    #[error("Snapshot {got} does not continue project {project_id} (expected {expected})")]
    SequenceConflict {
        project_id: String,
        expected: u64,
        got: u64,
    },

    #[error("Project {0} already exists")]
    DuplicateProject(String),
}

impl From<sled::Error> for StorageError {
    fn from(err: sled::Error) -> Self {
        match err {
            sled::Error::Io(e) => StorageError::IoError(e),
            other => StorageError::Database(other.to_string()),
        }
    }
}

impl From<bincode::Error> for StorageError {
    fn from(err: bincode::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

/// Errors reported by the core operations.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Storage error: {0}")]
    StorageError(#[from] StorageError),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Git error: {0}")]
    Git(#[from] git2::Error),

    #[error("Workspace error: {0}")]
    WorkspaceError(String),

    #[error("Project not found: {0}")]
    ProjectNotFound(String),

    #[error("Invalid project identifier: {0:?}")]
    InvalidProjectId(String),

    #[error("Invalid project name: {0:?}")]
    InvalidProjectName(String),

    #[error("Invalid archive: {0}")]
    InvalidArchive(String),

    #[error("Upload exceeds the {limit} byte limit")]
    UploadTooLarge { limit: u64 },

    #[error("Failed to materialize revision {revision_id}: {message}")]
    Materialization {
        revision_id: String,
        message: String,
    },

    #[error("Timed out waiting for the lock on project {0}")]
    LockTimeout(String),

    #[error("Operation cancelled")]
    Cancelled,
}

impl From<config::ConfigError> for ApiError {
    fn from(err: config::ConfigError) -> Self {
        ApiError::ConfigError(err.to_string())
    }
}

/// Failure classes callers act on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Store timeout or lock contention; the recorder retries next cycle.
    Transient,
    /// Confined to one snapshot or one line.
    ScopedData,
    /// Rejected before any durable state was created.
    InvalidInput,
    NotFound,
    /// Process-level setup failure.
    Fatal,
    Internal,
}

impl ApiError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ApiError::StorageError(StorageError::Timeout(_)) | ApiError::LockTimeout(_) => {
                ErrorKind::Transient
            }
            ApiError::StorageError(_) => ErrorKind::Internal,
            ApiError::Materialization { .. } => ErrorKind::ScopedData,
            ApiError::InvalidProjectId(_)
            | ApiError::InvalidProjectName(_)
            | ApiError::InvalidArchive(_)
            | ApiError::UploadTooLarge { .. } => ErrorKind::InvalidInput,
            ApiError::ProjectNotFound(_) => ErrorKind::NotFound,
            ApiError::ConfigError(_) | ApiError::WorkspaceError(_) => ErrorKind::Fatal,
            ApiError::Git(_) | ApiError::Cancelled => ErrorKind::Internal,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }
}

/// Structured error returned for every rejected request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorResponse {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&ApiError> for ErrorResponse {
    fn from(err: &ApiError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}
