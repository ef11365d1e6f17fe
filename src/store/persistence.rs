//! Sled-backed metadata store.
//!
//! Three trees: `projects` (id → record), `snapshots` (`id/` + big-endian
//! sequence → record, so a prefix scan yields ascending order) and
//! `revisions` (`id/` + revision → sequence) for the uniqueness check.

use super::{check_sequence, MetadataStore, ProjectRecord, SnapshotRecord};
use crate::error::StorageError;
use crate::types::ProjectId;
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::debug;

const BUSY_RETRY: Duration = Duration::from_millis(25);

pub struct SledMetadataStore {
    db: sled::Db,
    projects: sled::Tree,
    snapshots: sled::Tree,
    revisions: sled::Tree,
    /// Serializes the check-then-insert of appends within this process
    append_lock: Mutex<()>,
}

fn project_prefix(project_id: &str) -> Vec<u8> {
    let mut key = project_id.as_bytes().to_vec();
    key.push(b'/');
    key
}

fn snapshot_key(project_id: &str, sequence_index: u64) -> Vec<u8> {
    let mut key = project_prefix(project_id);
    key.extend_from_slice(&sequence_index.to_be_bytes());
    key
}

fn revision_key(project_id: &str, revision_id: &str) -> Vec<u8> {
    let mut key = project_prefix(project_id);
    key.extend_from_slice(revision_id.as_bytes());
    key
}

impl SledMetadataStore {
    /// Open (or create) a store at `path`
    pub fn new(path: &Path) -> Result<Self, StorageError> {
        std::fs::create_dir_all(path)?;
        let db = sled::open(path)?;
        Self::from_db(db)
    }

    /// Open like [`SledMetadataStore::new`], retrying for up to `wait` while
    /// another process holds the database lock.
    pub fn open_waiting(path: &Path, wait: Duration) -> Result<Self, StorageError> {
        std::fs::create_dir_all(path)?;
        let deadline = Instant::now() + wait;
        loop {
            match sled::open(path) {
                Ok(db) => return Self::from_db(db),
                // sled reports a held lock as a plain I/O error
                Err(sled::Error::Io(e)) if Instant::now() < deadline => {
                    debug!(store = %path.display(), error = %e, "Store busy, retrying");
                    std::thread::sleep(BUSY_RETRY);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    pub fn from_db(db: sled::Db) -> Result<Self, StorageError> {
        Ok(Self {
            projects: db.open_tree("projects")?,
            snapshots: db.open_tree("snapshots")?,
            revisions: db.open_tree("revisions")?,
            db,
            append_lock: Mutex::new(()),
        })
    }

    fn last_snapshot(&self, project_id: &str) -> Result<Option<SnapshotRecord>, StorageError> {
        match self
            .snapshots
            .scan_prefix(project_prefix(project_id))
            .next_back()
        {
            Some(entry) => {
                let (_, value) = entry?;
                Ok(Some(bincode::deserialize(&value)?))
            }
            None => Ok(None),
        }
    }
}

impl MetadataStore for SledMetadataStore {
    fn append_snapshot(&self, record: &SnapshotRecord) -> Result<(), StorageError> {
        let _guard = self.append_lock.lock();

        let rev_key = revision_key(&record.project_id, &record.revision_id);
        if self.revisions.contains_key(&rev_key)? {
            return Err(StorageError::DuplicateRevision {
                project_id: record.project_id.clone(),
                revision_id: record.revision_id.clone(),
            });
        }
        let last = self.last_snapshot(&record.project_id)?;
        check_sequence(last.as_ref(), record)?;

        let value = bincode::serialize(record)?;
        self.snapshots.insert(
            snapshot_key(&record.project_id, record.sequence_index),
            value,
        )?;
        self.revisions
            .insert(rev_key, &record.sequence_index.to_be_bytes()[..])?;
        self.db.flush()?;
        Ok(())
    }

    fn append_project(&self, record: &ProjectRecord) -> Result<(), StorageError> {
        let _guard = self.append_lock.lock();

        if self.projects.contains_key(record.project_id.as_bytes())? {
            return Err(StorageError::DuplicateProject(record.project_id.clone()));
        }
        let value = bincode::serialize(record)?;
        self.projects.insert(record.project_id.as_bytes(), value)?;
        self.db.flush()?;
        Ok(())
    }

    fn list_snapshots(&self, project_id: &str) -> Result<Vec<SnapshotRecord>, StorageError> {
        let mut records = Vec::new();
        for entry in self.snapshots.scan_prefix(project_prefix(project_id)) {
            let (_, value) = entry?;
            records.push(bincode::deserialize(&value)?);
        }
        Ok(records)
    }

    fn list_projects(&self) -> Result<BTreeSet<ProjectId>, StorageError> {
        let mut ids = BTreeSet::new();
        for key in self.projects.iter().keys() {
            let key = key?;
            let id = String::from_utf8(key.to_vec())
                .map_err(|e| StorageError::Serialization(e.to_string()))?;
            ids.insert(id);
        }
        Ok(ids)
    }

    fn find_project(&self, project_id: &str) -> Result<Option<ProjectRecord>, StorageError> {
        match self.projects.get(project_id.as_bytes())? {
            Some(value) => Ok(Some(bincode::deserialize(&value)?)),
            None => Ok(None),
        }
    }
}
