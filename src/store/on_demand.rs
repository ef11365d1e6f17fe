//! Sled store that holds the database only for the duration of each call.
//!
//! sled locks its directory for as long as a handle is open. A long-running
//! recorder uses this store so other livelog processes can open the same
//! store between its flushes.

use super::{MetadataStore, ProjectRecord, SledMetadataStore, SnapshotRecord};
use crate::error::StorageError;
use crate::types::ProjectId;
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub struct OnDemandSledStore {
    path: PathBuf,
    /// How long an open waits for another process to let go
    wait: Duration,
    /// sled refuses a second open in the same process as well
    open_lock: Mutex<()>,
}

impl OnDemandSledStore {
    pub fn new(path: &Path, wait: Duration) -> Self {
        Self {
            path: path.to_path_buf(),
            wait,
            open_lock: Mutex::new(()),
        }
    }

    fn with_store<T>(
        &self,
        f: impl FnOnce(&SledMetadataStore) -> Result<T, StorageError>,
    ) -> Result<T, StorageError> {
        let _open = self.open_lock.lock();
        let store = SledMetadataStore::open_waiting(&self.path, self.wait)?;
        f(&store)
    }
}

impl MetadataStore for OnDemandSledStore {
    fn append_snapshot(&self, record: &SnapshotRecord) -> Result<(), StorageError> {
        self.with_store(|s| s.append_snapshot(record))
    }

    fn append_project(&self, record: &ProjectRecord) -> Result<(), StorageError> {
        self.with_store(|s| s.append_project(record))
    }

    fn list_snapshots(&self, project_id: &str) -> Result<Vec<SnapshotRecord>, StorageError> {
        self.with_store(|s| s.list_snapshots(project_id))
    }

    fn list_projects(&self) -> Result<BTreeSet<ProjectId>, StorageError> {
        self.with_store(|s| s.list_projects())
    }

    fn find_project(&self, project_id: &str) -> Result<Option<ProjectRecord>, StorageError> {
        self.with_store(|s| s.find_project(project_id))
    }
}
