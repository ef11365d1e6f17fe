//! Metadata Store
//!
//! Append-only catalog of projects and their snapshots. The workspace owns the
//! file bytes; the store only records which revision belongs to which project
//! and in what order.

pub mod memory;
pub mod on_demand;
pub mod persistence;
pub mod timed;

pub use memory::MemoryMetadataStore;
pub use on_demand::OnDemandSledStore;
pub use persistence::SledMetadataStore;
pub use timed::TimedStore;

use crate::error::StorageError;
use crate::types::{CapturedAt, ProjectId, RevisionId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::PathBuf;

/// ProjectRecord: one recorded or imported workspace
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectRecord {
    pub project_id: ProjectId,
    pub display_name: String,
    pub workspace_path: PathBuf,
    /// Name supplied with an uploaded archive
    pub original_name: Option<String>,
    pub created_at: CapturedAt,
}

/// SnapshotRecord: one immutable capture of a project's tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotRecord {
    pub project_path: PathBuf,
    pub project_id: ProjectId,
    pub revision_id: RevisionId,
    pub captured_at: CapturedAt,
    pub sequence_index: u64,
}

/// Metadata store interface
///
/// Implementations must let a caller observe its own writes as soon as the
/// append returns. No cross-process guarantee is required.
pub trait MetadataStore: Send + Sync {
    fn append_snapshot(&self, record: &SnapshotRecord) -> Result<(), StorageError>;
    fn append_project(&self, record: &ProjectRecord) -> Result<(), StorageError>;
    /// Snapshots of one project, ascending `sequence_index`
    fn list_snapshots(&self, project_id: &str) -> Result<Vec<SnapshotRecord>, StorageError>;
    fn list_projects(&self) -> Result<BTreeSet<ProjectId>, StorageError>;
    fn find_project(&self, project_id: &str) -> Result<Option<ProjectRecord>, StorageError>;
}

/// Check that `record` may be appended after `last`.
///
/// The first snapshot of a project may start at any index (imports start at 0,
/// the recorder at 1); every later one must be exactly `last + 1`.
pub(crate) fn check_sequence(
    last: Option<&SnapshotRecord>,
    record: &SnapshotRecord,
) -> Result<(), StorageError> {
    match last {
        Some(last) if record.sequence_index != last.sequence_index + 1 => {
            Err(StorageError::SequenceConflict {
                project_id: record.project_id.clone(),
                expected: last.sequence_index + 1,
                got: record.sequence_index,
            })
        }
        _ => Ok(()),
    }
}

/// Next index for a project whose newest snapshot is `last`.
pub fn next_sequence_index(last: Option<&SnapshotRecord>, first: u64) -> u64 {
    last.map(|s| s.sequence_index + 1).unwrap_or(first)
}
