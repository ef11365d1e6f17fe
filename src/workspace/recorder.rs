//! Snapshot recorder: polls a workspace and turns each change into a revision
//! plus a cataloged snapshot record.

use super::repo::{capture_message, Workspace};
use crate::concurrency::ProjectLockRegistry;
use crate::config::LivelogConfig;
use crate::error::{ApiError, StorageError};
use crate::store::{next_sequence_index, MetadataStore, ProjectRecord, SnapshotRecord};
use crate::types::{generate_project_id, now_millis, ProjectId};
use git2::Signature;
use parking_lot::RwLock;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Index of the first snapshot a recorder writes for a new project
const FIRST_RECORDED_INDEX: u64 = 1;

/// Result of one polling cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Nothing changed on disk
    Idle,
    /// Changes staged to the same tree as the tip
    EmptyDiff,
    /// A revision was created. `cataloged` is false when the store append
    /// failed and the record waits in the pending queue.
    Recorded { record: SnapshotRecord, cataloged: bool },
}

/// Cloneable switch for stopping a running recorder from another thread
#[derive(Clone)]
pub struct RecorderHandle {
    running: Arc<RwLock<bool>>,
}

impl RecorderHandle {
    pub fn stop(&self) {
        *self.running.write() = false;
    }
}

pub struct SnapshotRecorder {
    workspace: Workspace,
    project: ProjectRecord,
    /// Whether the project record is already in the store
    registered: bool,
    next_index: u64,
    /// Revisions whose append failed, oldest first
    pending: VecDeque<SnapshotRecord>,
    store: Arc<dyn MetadataStore>,
    locks: Arc<ProjectLockRegistry>,
    author_name: String,
    author_email: String,
    poll_interval: Duration,
    lock_timeout: Duration,
    running: Arc<RwLock<bool>>,
}

impl SnapshotRecorder {
    /// Open (or create) the workspace and resolve its project.
    ///
    /// A workspace path that is a regular file is a fatal setup error.
    pub fn new(
        workspace_path: &Path,
        store: Arc<dyn MetadataStore>,
        locks: Arc<ProjectLockRegistry>,
        config: &LivelogConfig,
    ) -> Result<Self, ApiError> {
        let workspace = Workspace::open_or_init(workspace_path)?;
        let canonical = dunce::canonicalize(workspace.root()).map_err(|e| {
            ApiError::WorkspaceError(format!(
                "Failed to canonicalize {}: {}",
                workspace_path.display(),
                e
            ))
        })?;

        let (project, registered) = match find_project_by_path(store.as_ref(), &canonical)? {
            Some(project) => (project, true),
            None => {
                let project = ProjectRecord {
                    project_id: unused_project_id(store.as_ref(), config.import.project_id_length)?,
                    display_name: display_name(&canonical),
                    workspace_path: canonical,
                    original_name: None,
                    created_at: now_millis(),
                };
                (project, false)
            }
        };

        let existing = store.list_snapshots(&project.project_id)?;
        let next_index = next_sequence_index(existing.last(), FIRST_RECORDED_INDEX);

        info!(
            project_id = %project.project_id,
            workspace = %project.workspace_path.display(),
            existing = existing.len(),
            "Recorder ready"
        );

        Ok(Self {
            workspace,
            project,
            registered,
            next_index,
            pending: VecDeque::new(),
            store,
            locks,
            author_name: config.recorder.author_name.clone(),
            author_email: config.recorder.author_email.clone(),
            poll_interval: config.recorder.poll_interval(),
            lock_timeout: config.playback.lock_timeout(),
            running: Arc::new(RwLock::new(true)),
        })
    }

    pub fn project_id(&self) -> &ProjectId {
        &self.project.project_id
    }

    pub fn handle(&self) -> RecorderHandle {
        RecorderHandle {
            running: self.running.clone(),
        }
    }

    /// Poll until stopped. Failed cycles are logged and never end the loop.
    pub fn run(&mut self) {
        info!(project_id = %self.project.project_id, "Recording workspace");

        while *self.running.read() {
            match self.run_cycle() {
                Ok(CycleOutcome::Recorded { record, cataloged }) => {
                    debug!(
                        revision_id = %record.revision_id,
                        sequence_index = record.sequence_index,
                        cataloged,
                        "Snapshot recorded"
                    );
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "Recorder cycle skipped"),
            }
            std::thread::sleep(self.poll_interval);
        }

        info!(project_id = %self.project.project_id, "Recorder stopped");
    }

    /// One polling cycle.
    pub fn run_cycle(&mut self) -> Result<CycleOutcome, ApiError> {
        self.flush_pending();

        let guard = self.locks.try_acquire_workspace(
            &self.project.project_id,
            &self.workspace.lock_path(),
            self.lock_timeout,
        )?;
        if !self.workspace.has_uncommitted_changes()? {
            return Ok(CycleOutcome::Idle);
        }

        let captured_at = now_millis();
        let signature = Signature::now(&self.author_name, &self.author_email)?;
        let oid = self
            .workspace
            .commit_all(&signature, &capture_message(captured_at))?;
        drop(guard);

        let Some(oid) = oid else {
            return Ok(CycleOutcome::EmptyDiff);
        };

        let record = SnapshotRecord {
            project_path: self.project.workspace_path.clone(),
            project_id: self.project.project_id.clone(),
            revision_id: oid.to_string(),
            captured_at,
            sequence_index: self.next_index,
        };
        self.next_index += 1;

        self.pending.push_back(record.clone());
        self.flush_pending();
        let cataloged = !self
            .pending
            .iter()
            .any(|p| p.revision_id == record.revision_id);
        Ok(CycleOutcome::Recorded { record, cataloged })
    }

    /// Append queued records in order, stopping at the first store failure.
    /// The project is registered once one of its snapshots is in the store.
    fn flush_pending(&mut self) {
        while let Some(record) = self.pending.front() {
            match self.store.append_snapshot(record) {
                Ok(()) | Err(StorageError::DuplicateRevision { .. }) => {
                    self.pending.pop_front();
                }
                Err(e) => {
                    warn!(
                        revision_id = %record.revision_id,
                        pending = self.pending.len(),
                        error = %e,
                        "Snapshot append failed, will retry"
                    );
                    return;
                }
            }
            self.register_project();
        }
        if self.next_index > FIRST_RECORDED_INDEX {
            self.register_project();
        }
    }

    fn register_project(&mut self) {
        if self.registered {
            return;
        }
        match self.store.append_project(&self.project) {
            Ok(()) | Err(StorageError::DuplicateProject(_)) => {
                info!(project_id = %self.project.project_id, "Project registered");
                self.registered = true;
            }
            Err(e) => warn!(error = %e, "Project registration failed, will retry"),
        }
    }
}

fn find_project_by_path(
    store: &dyn MetadataStore,
    canonical: &Path,
) -> Result<Option<ProjectRecord>, ApiError> {
    for project_id in store.list_projects()? {
        if let Some(project) = store.find_project(&project_id)? {
            if project.workspace_path == canonical {
                return Ok(Some(project));
            }
        }
    }
    Ok(None)
}

fn unused_project_id(store: &dyn MetadataStore, length: usize) -> Result<ProjectId, ApiError> {
    loop {
        let candidate = generate_project_id(length);
        if store.find_project(&candidate)?.is_none() {
            return Ok(candidate);
        }
    }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
