//! Request surface
//!
//! [`ReplayContext`] owns the shared pieces (store, lock registry, config)
//! and exposes the archive-ingestion, playback and listing operations.

use crate::cancel::Cancellation;
use crate::concurrency::ProjectLockRegistry;
use crate::config::{FailurePolicy, LivelogConfig};
use crate::error::ApiError;
use crate::import::{HistoryImporter, ImportOutcome};
use crate::store::{
    MetadataStore, OnDemandSledStore, ProjectRecord, SledMetadataStore, TimedStore,
};
use crate::timeline::{TimelineAssembler, TimelineEntry};
use crate::types::{validate_project_id, ProjectId};
use crate::workspace::SnapshotRecorder;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Reply to an archive upload
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImportResponse {
    pub project_id: ProjectId,
    pub original_name: String,
    pub hosted_path: PathBuf,
}

impl From<ImportOutcome> for ImportResponse {
    fn from(outcome: ImportOutcome) -> Self {
        Self {
            project_id: outcome.project_id,
            original_name: outcome.original_name,
            hosted_path: outcome.hosted_path,
        }
    }
}

/// Playback query
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PlaybackRequest {
    pub project_id: ProjectId,
    /// Overrides `playback.failure_policy` for this request
    #[serde(default)]
    pub failure_policy: Option<FailurePolicy>,
    /// Abort the request once this much time has passed
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

impl PlaybackRequest {
    pub fn new(project_id: impl Into<ProjectId>) -> Self {
        Self {
            project_id: project_id.into(),
            ..Default::default()
        }
    }
}

pub struct ReplayContext {
    store: Arc<dyn MetadataStore>,
    locks: Arc<ProjectLockRegistry>,
    config: LivelogConfig,
}

impl ReplayContext {
    /// Build on an existing store, e.g. an in-memory one in tests.
    pub fn new(store: Arc<dyn MetadataStore>, config: LivelogConfig) -> Self {
        Self {
            store,
            locks: Arc::new(ProjectLockRegistry::new()),
            config,
        }
    }

    /// Open the sled store named by the config, with every call bounded by
    /// `store.timeout_ms`. The store stays open, and locked against other
    /// processes, for the life of the context.
    pub fn open(config: LivelogConfig) -> Result<Self, ApiError> {
        let path = prepare_store_dir(&config)?;
        let sled = SledMetadataStore::open_waiting(&path, config.store.timeout())?;
        info!(store = %path.display(), "Metadata store opened");
        let store = TimedStore::new(Arc::new(sled), config.store.timeout());
        Ok(Self::new(Arc::new(store), config))
    }

    /// Like [`ReplayContext::open`], but the store is only opened while a
    /// call runs. Long-running commands use this so other processes can
    /// share the store.
    pub fn open_on_demand(config: LivelogConfig) -> Result<Self, ApiError> {
        let path = prepare_store_dir(&config)?;
        let shared = OnDemandSledStore::new(&path, config.store.timeout());
        shared.list_projects()?;
        info!(store = %path.display(), "Metadata store opened on demand");
        let store = TimedStore::new(Arc::new(shared), config.store.timeout());
        Ok(Self::new(Arc::new(store), config))
    }

    pub fn store(&self) -> &Arc<dyn MetadataStore> {
        &self.store
    }

    pub fn locks(&self) -> &Arc<ProjectLockRegistry> {
        &self.locks
    }

    pub fn config(&self) -> &LivelogConfig {
        &self.config
    }

    /// Ingest an uploaded archive as a new project.
    pub fn import_archive<R: Read>(
        &self,
        upload: R,
        original_name: &str,
    ) -> Result<ImportResponse, ApiError> {
        let importer =
            HistoryImporter::new(self.store.clone(), self.locks.clone(), &self.config)?;
        importer.import(upload, original_name).map(ImportResponse::from)
    }

    pub fn playback(&self, request: PlaybackRequest) -> Result<Vec<TimelineEntry>, ApiError> {
        let cancel = match request.timeout_ms {
            Some(ms) => Cancellation::with_timeout(Duration::from_millis(ms)),
            None => Cancellation::none(),
        };
        self.playback_with(&request, &cancel)
    }

    /// Playback under a caller-owned cancellation token.
    pub fn playback_with(
        &self,
        request: &PlaybackRequest,
        cancel: &Cancellation,
    ) -> Result<Vec<TimelineEntry>, ApiError> {
        let mut assembler = TimelineAssembler::new(
            self.store.clone(),
            self.locks.clone(),
            &self.config.playback,
        );
        if let Some(policy) = request.failure_policy {
            assembler = assembler.with_failure_policy(policy);
        }
        assembler.assemble(&request.project_id, cancel)
    }

    pub fn list_projects(&self) -> Result<BTreeSet<ProjectId>, ApiError> {
        Ok(self.store.list_projects()?)
    }

    pub fn project(&self, project_id: &str) -> Result<ProjectRecord, ApiError> {
        validate_project_id(project_id)?;
        self.store
            .find_project(project_id)?
            .ok_or_else(|| ApiError::ProjectNotFound(project_id.to_string()))
    }

    /// Recorder for `workspace`, sharing this context's store and locks.
    pub fn recorder(&self, workspace: &Path) -> Result<SnapshotRecorder, ApiError> {
        SnapshotRecorder::new(
            workspace,
            self.store.clone(),
            self.locks.clone(),
            &self.config,
        )
    }
}

fn prepare_store_dir(config: &LivelogConfig) -> Result<PathBuf, ApiError> {
    let path = config.store.resolve_path()?;
    std::fs::create_dir_all(&path).map_err(|e| {
        ApiError::ConfigError(format!(
            "Failed to create store directory {}: {}",
            path.display(),
            e
        ))
    })?;
    Ok(path)
}
