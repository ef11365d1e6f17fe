//! Shared fixtures: git repositories, archives and replay contexts.

use flate2::write::GzEncoder;
use flate2::Compression;
use git2::{IndexAddOption, Repository, Signature, Time};
use livelog::config::LivelogConfig;
use livelog::error::StorageError;
use livelog::store::{MemoryMetadataStore, MetadataStore, ProjectRecord, SnapshotRecord};
use livelog::types::ProjectId;
use livelog::ReplayContext;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tempfile::TempDir;
use walkdir::WalkDir;

pub fn test_config(temp: &TempDir) -> LivelogConfig {
    let mut config = LivelogConfig::default();
    config.import.hosting_root = Some(temp.path().join("hosted"));
    config.store.path = Some(temp.path().join("store"));
    config.recorder.poll_interval_ms = 10;
    config.playback.lock_timeout_ms = 5_000;
    config
}

/// Replay context over an in-memory store, hosting imports under `temp/hosted`.
pub fn memory_context(temp: &TempDir) -> (ReplayContext, Arc<MemoryMetadataStore>) {
    let store = Arc::new(MemoryMetadataStore::new());
    let shared: Arc<dyn MetadataStore> = store.clone();
    (ReplayContext::new(shared, test_config(temp)), store)
}

/// Memory store whose appends fail on demand
#[derive(Default)]
pub struct FlakyStore {
    inner: MemoryMetadataStore,
    fail_snapshots: AtomicBool,
    fail_projects: AtomicBool,
}

impl FlakyStore {
    pub fn fail_snapshot_appends(&self, fail: bool) {
        self.fail_snapshots.store(fail, Ordering::SeqCst);
    }

    pub fn fail_project_appends(&self, fail: bool) {
        self.fail_projects.store(fail, Ordering::SeqCst);
    }

    fn unavailable() -> StorageError {
        StorageError::Database("store unavailable".to_string())
    }
}

impl MetadataStore for FlakyStore {
    fn append_snapshot(&self, record: &SnapshotRecord) -> Result<(), StorageError> {
        if self.fail_snapshots.load(Ordering::SeqCst) {
            return Err(Self::unavailable());
        }
        self.inner.append_snapshot(record)
    }

    fn append_project(&self, record: &ProjectRecord) -> Result<(), StorageError> {
        if self.fail_projects.load(Ordering::SeqCst) {
            return Err(Self::unavailable());
        }
        self.inner.append_project(record)
    }

    fn list_snapshots(&self, project_id: &str) -> Result<Vec<SnapshotRecord>, StorageError> {
        self.inner.list_snapshots(project_id)
    }

    fn list_projects(&self) -> Result<BTreeSet<ProjectId>, StorageError> {
        self.inner.list_projects()
    }

    fn find_project(&self, project_id: &str) -> Result<Option<ProjectRecord>, StorageError> {
        self.inner.find_project(project_id)
    }
}

/// Replay context over a [`FlakyStore`].
pub fn flaky_context(temp: &TempDir) -> (ReplayContext, Arc<FlakyStore>) {
    let store = Arc::new(FlakyStore::default());
    let shared: Arc<dyn MetadataStore> = store.clone();
    (ReplayContext::new(shared, test_config(temp)), store)
}

pub fn hosting_root(temp: &TempDir) -> PathBuf {
    temp.path().join("hosted")
}

/// Whether the hosting root is missing or holds nothing.
pub fn hosting_root_is_empty(temp: &TempDir) -> bool {
    match fs::read_dir(hosting_root(temp)) {
        Ok(mut entries) => entries.next().is_none(),
        Err(_) => true,
    }
}

pub fn write_files(root: &Path, files: &[(&str, &str)]) {
    for (name, content) in files {
        let path = root.join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, content).unwrap();
    }
}

/// Commit the working tree of `repo` with a fixed committer time.
pub fn commit_all(repo: &Repository, message: &str, seconds: i64) -> String {
    let mut index = repo.index().unwrap();
    index
        .add_all(["*"].iter(), IndexAddOption::DEFAULT, None)
        .unwrap();
    index.update_all(["*"].iter(), None).unwrap();
    index.write().unwrap();
    let tree = repo.find_tree(index.write_tree().unwrap()).unwrap();

    let signature = Signature::new("Author", "author@example.com", &Time::new(seconds, 0)).unwrap();
    let parent = repo.head().ok().and_then(|h| h.peel_to_commit().ok());
    let parents: Vec<&git2::Commit<'_>> = parent.iter().collect();
    repo.commit(
        Some("HEAD"),
        &signature,
        &signature,
        message,
        &tree,
        &parents,
    )
    .unwrap()
    .to_string()
}

/// One commit of a fixture history
pub struct Step<'a> {
    pub files: &'a [(&'a str, &'a str)],
    pub message: &'a str,
    /// Committer time, unix seconds
    pub seconds: i64,
}

/// Repository with one commit per step. Returns the revision ids, oldest first.
pub fn repo_with_history(root: &Path, steps: &[Step<'_>]) -> Vec<String> {
    let repo = Repository::init(root).unwrap();
    steps
        .iter()
        .map(|step| {
            write_files(root, step.files);
            commit_all(&repo, step.message, step.seconds)
        })
        .collect()
}

/// Gzip tar of everything under `root`, `.git` included.
pub fn tar_gz_dir(root: &Path) -> Vec<u8> {
    let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
    for entry in WalkDir::new(root).min_depth(1).sort_by_file_name() {
        let entry = entry.unwrap();
        let relative = entry.path().strip_prefix(root).unwrap();
        if entry.file_type().is_dir() {
            builder.append_dir(relative, entry.path()).unwrap();
        } else if entry.file_type().is_file() {
            builder
                .append_path_with_name(entry.path(), relative)
                .unwrap();
        }
    }
    builder.into_inner().unwrap().finish().unwrap()
}

/// Gzip tar with one regular file whose raw header name is `name`,
/// bypassing the builder's own path checks.
pub fn tar_gz_raw_entry(name: &[u8], content: &[u8]) -> Vec<u8> {
    let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));

    let mut header = tar::Header::new_gnu();
    header.as_old_mut().name[..name.len()].copy_from_slice(name);
    header.set_size(content.len() as u64);
    header.set_mode(0o644);
    header.set_entry_type(tar::EntryType::Regular);
    header.set_cksum();
    builder.append(&header, content).unwrap();

    builder.into_inner().unwrap().finish().unwrap()
}
