//! Per-project mutual exclusion
//!
//! Every operation that moves a workspace's HEAD (playback's detach/restore
//! bracket, import, the recorder's stage-and-commit step) holds the project's
//! lock for its full duration. Different projects never block each other.
//! Workspace callers also take an advisory file lock so separate livelog
//! processes (a running recorder and a playback) exclude each other too.

use crate::error::ApiError;
use crate::types::ProjectId;
use fs2::FileExt;
use parking_lot::{Condvar, Mutex, RwLock};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

const FILE_LOCK_POLL: Duration = Duration::from_millis(10);

/// Lock for one project's workspace
///
/// A flag behind a mutex plus a condvar, so the guard can own an `Arc` to
/// the lock instead of borrowing it.
#[derive(Default)]
pub struct ProjectLock {
    held: Mutex<bool>,
    released: Condvar,
}

impl ProjectLock {
    fn try_acquire_until(&self, deadline: Instant) -> bool {
        let mut held = self.held.lock();
        while *held {
            if self.released.wait_until(&mut held, deadline).timed_out() && *held {
                return false;
            }
        }
        *held = true;
        true
    }

    fn release(&self) {
        let mut held = self.held.lock();
        *held = false;
        self.released.notify_one();
    }

    pub fn is_held(&self) -> bool {
        *self.held.lock()
    }
}

/// Proof that the caller holds a project's lock; released on drop
pub struct ProjectGuard {
    project_id: ProjectId,
    lock: Arc<ProjectLock>,
    /// Locked workspace file, when other processes are excluded too
    file: Option<File>,
}

impl ProjectGuard {
    pub fn project_id(&self) -> &str {
        &self.project_id
    }
}

impl Drop for ProjectGuard {
    fn drop(&mut self) {
        if let Some(file) = self.file.take() {
            // closing the file releases the lock as well
            let _ = FileExt::unlock(&file);
        }
        self.lock.release();
    }
}

impl std::fmt::Debug for ProjectGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProjectGuard")
            .field("project_id", &self.project_id)
            .finish()
    }
}

/// Project-keyed lock registry, created once at startup and shared
pub struct ProjectLockRegistry {
    locks: RwLock<HashMap<ProjectId, Arc<ProjectLock>>>,
}

impl ProjectLockRegistry {
    pub fn new() -> Self {
        Self {
            locks: RwLock::new(HashMap::new()),
        }
    }

    fn lock_for(&self, project_id: &str) -> Arc<ProjectLock> {
        {
            let map = self.locks.read();
            if let Some(lock) = map.get(project_id) {
                return lock.clone();
            }
        }

        // Double-check under the write lock, another thread may have inserted it
        let mut map = self.locks.write();
        map.entry(project_id.to_string())
            .or_insert_with(|| Arc::new(ProjectLock::default()))
            .clone()
    }

    /// Wait up to `timeout` for the project's lock.
    pub fn try_acquire_for(
        &self,
        project_id: &str,
        timeout: Duration,
    ) -> Result<ProjectGuard, ApiError> {
        self.try_acquire_until(project_id, Instant::now() + timeout)
    }

    fn try_acquire_until(
        &self,
        project_id: &str,
        deadline: Instant,
    ) -> Result<ProjectGuard, ApiError> {
        let lock = self.lock_for(project_id);
        if !lock.try_acquire_until(deadline) {
            return Err(ApiError::LockTimeout(project_id.to_string()));
        }
        Ok(ProjectGuard {
            project_id: project_id.to_string(),
            lock,
            file: None,
        })
    }

    /// Wait up to `timeout` for the project's lock and then for an exclusive
    /// lock on `lock_file`, which other processes honour as well.
    pub fn try_acquire_workspace(
        &self,
        project_id: &str,
        lock_file: &Path,
        timeout: Duration,
    ) -> Result<ProjectGuard, ApiError> {
        let deadline = Instant::now() + timeout;
        let mut guard = self.try_acquire_until(project_id, deadline)?;

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .open(lock_file)
            .map_err(|e| {
                ApiError::WorkspaceError(format!(
                    "Failed to open lock file {}: {}",
                    lock_file.display(),
                    e
                ))
            })?;
        let contended = fs2::lock_contended_error().raw_os_error();
        loop {
            match file.try_lock_exclusive() {
                Ok(()) => break,
                Err(e) if e.raw_os_error() == contended => {
                    if Instant::now() >= deadline {
                        return Err(ApiError::LockTimeout(project_id.to_string()));
                    }
                    std::thread::sleep(FILE_LOCK_POLL);
                }
                Err(e) => {
                    return Err(ApiError::WorkspaceError(format!(
                        "Failed to lock {}: {}",
                        lock_file.display(),
                        e
                    )))
                }
            }
        }
        guard.file = Some(file);
        Ok(guard)
    }

    /// Whether some caller currently holds the project's lock.
    pub fn is_held(&self, project_id: &str) -> bool {
        self.locks
            .read()
            .get(project_id)
            .map(|lock| lock.is_held())
            .unwrap_or(false)
    }
}

impl Default for ProjectLockRegistry {
    fn default() -> Self {
        Self::new()
    }
}
