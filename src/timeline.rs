//! Timeline Assembler
//!
//! Builds the ordered playback response for one project: every snapshot,
//! materialized and annotated, in ascending sequence order.

use crate::cancel::Cancellation;
use crate::concurrency::{ProjectGuard, ProjectLockRegistry};
use crate::config::{FailurePolicy, PlaybackConfig};
use crate::directive::{extract_file, FileRecord};
use crate::error::ApiError;
use crate::materialize::MaterializationEngine;
use crate::store::{MetadataStore, ProjectRecord, SnapshotRecord};
use crate::types::{validate_project_id, CapturedAt, ProjectId, RevisionId};
use crate::workspace::{Tip, Workspace};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// One snapshot in a playback response
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimelineEntry {
    pub project_id: ProjectId,
    pub project_name: String,
    pub revision_id: RevisionId,
    pub captured_at: CapturedAt,
    pub sequence_index: u64,
    pub files: BTreeMap<String, FileRecord>,
    /// Why the files are missing, when the snapshot was skipped
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TimelineEntry {
    fn new(project: &ProjectRecord, snapshot: &SnapshotRecord) -> Self {
        Self {
            project_id: project.project_id.clone(),
            project_name: project.display_name.clone(),
            revision_id: snapshot.revision_id.clone(),
            captured_at: snapshot.captured_at,
            sequence_index: snapshot.sequence_index,
            files: BTreeMap::new(),
            error: None,
        }
    }
}

pub struct TimelineAssembler {
    store: Arc<dyn MetadataStore>,
    locks: Arc<ProjectLockRegistry>,
    failure_policy: FailurePolicy,
    lock_timeout: Duration,
}

impl TimelineAssembler {
    pub fn new(
        store: Arc<dyn MetadataStore>,
        locks: Arc<ProjectLockRegistry>,
        config: &PlaybackConfig,
    ) -> Self {
        Self {
            store,
            locks,
            failure_policy: config.failure_policy,
            lock_timeout: config.lock_timeout(),
        }
    }

    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    /// Ordered timeline of `project_id`.
    ///
    /// Lock timeouts and cancellation abort the whole request. Other
    /// per-snapshot failures follow the failure policy.
    pub fn assemble(
        &self,
        project_id: &str,
        cancel: &Cancellation,
    ) -> Result<Vec<TimelineEntry>, ApiError> {
        validate_project_id(project_id)?;
        let project = self
            .store
            .find_project(project_id)?
            .ok_or_else(|| ApiError::ProjectNotFound(project_id.to_string()))?;
        let snapshots = self.store.list_snapshots(project_id)?;
        if snapshots.is_empty() {
            return Ok(Vec::new());
        }

        let workspace = Workspace::open(&project.workspace_path).map_err(|e| {
            ApiError::WorkspaceError(format!(
                "Project {} workspace {} unavailable: {}",
                project_id,
                project.workspace_path.display(),
                e
            ))
        })?;
        let tip_before = {
            let _guard = self.acquire(project_id, &workspace)?;
            workspace.tip()?
        };

        info!(project_id, snapshots = snapshots.len(), "Assembling timeline");
        let mut entries = Vec::with_capacity(snapshots.len());
        for snapshot in &snapshots {
            cancel.check()?;
            let mut entry = TimelineEntry::new(&project, snapshot);

            let guard = self.acquire(project_id, &workspace)?;
            let materialized =
                MaterializationEngine::materialize(&workspace, &snapshot.revision_id, &guard, cancel);
            drop(guard);

            match materialized {
                Ok(tree) => {
                    for (relative_path, content) in tree {
                        let record = extract_file(&relative_path, content);
                        entry.files.insert(relative_path, record);
                    }
                    debug!(
                        sequence_index = snapshot.sequence_index,
                        files = entry.files.len(),
                        "Snapshot assembled"
                    );
                }
                Err(e @ (ApiError::Cancelled | ApiError::LockTimeout(_))) => return Err(e),
                Err(e) if self.failure_policy == FailurePolicy::FailFast => return Err(e),
                Err(e) => {
                    warn!(
                        project_id,
                        revision_id = %snapshot.revision_id,
                        error = %e,
                        "Skipping snapshot that could not be materialized"
                    );
                    entry.error = Some(e.to_string());
                }
            }
            entries.push(entry);
        }

        self.check_tip(project_id, &workspace, &tip_before)?;
        Ok(entries)
    }

    fn acquire(&self, project_id: &str, workspace: &Workspace) -> Result<ProjectGuard, ApiError> {
        self.locks
            .try_acquire_workspace(project_id, &workspace.lock_path(), self.lock_timeout)
    }

    /// Put the tip back if anything left it elsewhere.
    fn check_tip(
        &self,
        project_id: &str,
        workspace: &Workspace,
        tip_before: &Tip,
    ) -> Result<(), ApiError> {
        let _guard = self.acquire(project_id, workspace)?;
        let tip_after = workspace.tip()?;
        if &tip_after != tip_before {
            error!(
                project_id,
                before = ?tip_before,
                after = ?tip_after,
                "Workspace tip moved during playback, restoring"
            );
            workspace.restore(tip_before)?;
        }
        Ok(())
    }
}
