//! In-process metadata store, used by tests and one-shot tooling.

use super::{check_sequence, MetadataStore, ProjectRecord, SnapshotRecord};
use crate::error::StorageError;
use crate::types::ProjectId;
use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap};

#[derive(Default)]
struct Inner {
    projects: HashMap<ProjectId, ProjectRecord>,
    snapshots: HashMap<ProjectId, Vec<SnapshotRecord>>,
}

/// Metadata store kept entirely in memory
#[derive(Default)]
pub struct MemoryMetadataStore {
    inner: RwLock<Inner>,
}

impl MemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MetadataStore for MemoryMetadataStore {
    fn append_snapshot(&self, record: &SnapshotRecord) -> Result<(), StorageError> {
        let mut inner = self.inner.write();
        let log = inner
            .snapshots
            .entry(record.project_id.clone())
            .or_default();
        if log.iter().any(|s| s.revision_id == record.revision_id) {
            return Err(StorageError::DuplicateRevision {
                project_id: record.project_id.clone(),
                revision_id: record.revision_id.clone(),
            });
        }
        check_sequence(log.last(), record)?;
        log.push(record.clone());
        Ok(())
    }

    fn append_project(&self, record: &ProjectRecord) -> Result<(), StorageError> {
        let mut inner = self.inner.write();
        if inner.projects.contains_key(&record.project_id) {
            return Err(StorageError::DuplicateProject(record.project_id.clone()));
        }
        inner
            .projects
            .insert(record.project_id.clone(), record.clone());
        Ok(())
    }

    fn list_snapshots(&self, project_id: &str) -> Result<Vec<SnapshotRecord>, StorageError> {
        Ok(self
            .inner
            .read()
            .snapshots
            .get(project_id)
            .cloned()
            .unwrap_or_default())
    }

    fn list_projects(&self) -> Result<BTreeSet<ProjectId>, StorageError> {
        Ok(self.inner.read().projects.keys().cloned().collect())
    }

    fn find_project(&self, project_id: &str) -> Result<Option<ProjectRecord>, StorageError> {
        Ok(self.inner.read().projects.get(project_id).cloned())
    }
}
