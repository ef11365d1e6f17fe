//! Bounded-time wrapper around a metadata store.
//!
//! Each call runs on a helper thread and the caller waits on a channel with a
//! deadline. A timed-out call is reported as [`StorageError::Timeout`]; the
//! helper thread is left to finish on its own and the call is never retried here.

use super::{MetadataStore, ProjectRecord, SnapshotRecord};
use crate::error::StorageError;
use crate::types::ProjectId;
use std::collections::BTreeSet;
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

pub struct TimedStore {
    inner: Arc<dyn MetadataStore>,
    timeout: Duration,
}

impl TimedStore {
    pub fn new(inner: Arc<dyn MetadataStore>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    fn call<T, F>(&self, op: &'static str, f: F) -> Result<T, StorageError>
    where
        T: Send + 'static,
        F: FnOnce(&dyn MetadataStore) -> Result<T, StorageError> + Send + 'static,
    {
        let (tx, rx) = mpsc::channel();
        let inner = Arc::clone(&self.inner);
        std::thread::Builder::new()
            .name(format!("store-{}", op))
            .spawn(move || {
                // receiver may be gone after a timeout
                let _ = tx.send(f(inner.as_ref()));
            })?;

        match rx.recv_timeout(self.timeout) {
            Ok(result) => result,
            Err(mpsc::RecvTimeoutError::Timeout) => {
                warn!(op, timeout_ms = self.timeout.as_millis() as u64, "Store call timed out");
                Err(StorageError::Timeout(self.timeout))
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => Err(StorageError::Database(format!(
                "store call {} terminated without a result",
                op
            ))),
        }
    }
}

impl MetadataStore for TimedStore {
    fn append_snapshot(&self, record: &SnapshotRecord) -> Result<(), StorageError> {
        let record = record.clone();
        self.call("append_snapshot", move |s| s.append_snapshot(&record))
    }

    fn append_project(&self, record: &ProjectRecord) -> Result<(), StorageError> {
        let record = record.clone();
        self.call("append_project", move |s| s.append_project(&record))
    }

    fn list_snapshots(&self, project_id: &str) -> Result<Vec<SnapshotRecord>, StorageError> {
        let project_id = project_id.to_string();
        self.call("list_snapshots", move |s| s.list_snapshots(&project_id))
    }

    fn list_projects(&self) -> Result<BTreeSet<ProjectId>, StorageError> {
        self.call("list_projects", |s| s.list_projects())
    }

    fn find_project(&self, project_id: &str) -> Result<Option<ProjectRecord>, StorageError> {
        let project_id = project_id.to_string();
        self.call("find_project", move |s| s.find_project(&project_id))
    }
}
