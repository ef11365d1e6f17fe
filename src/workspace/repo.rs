//! Git-backed workspace: the on-disk directory whose history holds every snapshot's bytes.

use crate::error::ApiError;
use crate::types::{CapturedAt, RevisionId, UNKNOWN_CAPTURE_TIME};
use git2::build::CheckoutBuilder;
use git2::{
    Commit, ErrorCode, IndexAddOption, Oid, Repository, Signature, Sort, StashApplyOptions,
    StashFlags, StatusOptions,
};
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

/// Name of the version-control metadata directory, never part of a snapshot
pub const VCS_DIR: &str = ".git";

/// Advisory lock file inside the VCS directory, shared by every livelog process
const LOCK_FILE: &str = "livelog.lock";

/// Capture stamps above this are nanoseconds (older recordings), not milliseconds.
const NANOSECOND_STAMP_FLOOR: i64 = 100_000_000_000_000_000;

/// Where HEAD points before a detach, so it can be put back afterwards
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Tip {
    /// Symbolic HEAD, e.g. `refs/heads/master`
    Branch(String),
    Detached(Oid),
    /// Repository without commits yet
    Unborn,
}

/// One entry of a workspace's history
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Revision {
    pub id: RevisionId,
    pub captured_at: CapturedAt,
}

pub struct Workspace {
    repo: Repository,
    root: PathBuf,
}

impl Workspace {
    /// Open an existing repository rooted at `path`.
    pub fn open(path: &Path) -> Result<Self, ApiError> {
        let repo = Repository::open(path)?;
        let root = repo
            .workdir()
            .ok_or_else(|| {
                ApiError::WorkspaceError(format!("{} is a bare repository", path.display()))
            })?
            .to_path_buf();
        Ok(Self { repo, root })
    }

    /// Open `path`, creating the directory and repository when missing.
    pub fn open_or_init(path: &Path) -> Result<Self, ApiError> {
        if path.is_file() {
            return Err(ApiError::WorkspaceError(format!(
                "{} is a file, not a directory",
                path.display()
            )));
        }
        if !path.exists() {
            std::fs::create_dir_all(path).map_err(|e| {
                ApiError::WorkspaceError(format!("Failed to create {}: {}", path.display(), e))
            })?;
        }
        match Repository::open(path) {
            Ok(_) => Self::open(path),
            Err(e) if e.code() == ErrorCode::NotFound => {
                debug!(workspace = %path.display(), "Initialising repository");
                Repository::init(path)?;
                Self::open(path)
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// File other livelog processes lock before touching this workspace.
    pub fn lock_path(&self) -> PathBuf {
        self.repo.path().join(LOCK_FILE)
    }

    /// Fail unless both the working tree and the VCS directory sit at `root`.
    ///
    /// `root` must already be canonical. A configured `core.worktree` is
    /// rejected outright, whatever it points at.
    pub fn ensure_confined_to(&self, root: &Path) -> Result<(), ApiError> {
        match self.repo.config()?.get_entry("core.worktree") {
            Ok(_) => {
                return Err(ApiError::WorkspaceError(
                    "repository configures core.worktree".to_string(),
                ))
            }
            Err(e) if e.code() == ErrorCode::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        let canonical = |path: &Path| {
            dunce::canonicalize(path).map_err(|e| {
                ApiError::WorkspaceError(format!("Failed to canonicalize {}: {}", path.display(), e))
            })
        };
        let workdir = canonical(&self.root)?;
        if workdir != root {
            return Err(ApiError::WorkspaceError(format!(
                "working tree {} is outside {}",
                workdir.display(),
                root.display()
            )));
        }
        let git_dir = canonical(self.repo.path())?;
        if git_dir != root.join(VCS_DIR) {
            return Err(ApiError::WorkspaceError(format!(
                "repository data {} is outside {}",
                git_dir.display(),
                root.display()
            )));
        }
        Ok(())
    }

    /// Current HEAD.
    pub fn tip(&self) -> Result<Tip, ApiError> {
        let head = match self.repo.head() {
            Ok(head) => head,
            Err(e) if e.code() == ErrorCode::UnbornBranch => return Ok(Tip::Unborn),
            Err(e) => return Err(e.into()),
        };
        if self.repo.head_detached()? {
            let oid = head
                .target()
                .ok_or_else(|| ApiError::WorkspaceError("Detached HEAD without target".into()))?;
            return Ok(Tip::Detached(oid));
        }
        let name = head
            .name()
            .ok_or_else(|| ApiError::WorkspaceError("HEAD name is not UTF-8".into()))?;
        Ok(Tip::Branch(name.to_string()))
    }

    /// Tracked modifications, deletions, or untracked files; ignored files don't count.
    pub fn has_uncommitted_changes(&self) -> Result<bool, ApiError> {
        let mut opts = StatusOptions::new();
        opts.include_untracked(true)
            .recurse_untracked_dirs(true)
            .include_ignored(false);
        let statuses = self.repo.statuses(Some(&mut opts))?;
        Ok(!statuses.is_empty())
    }

    /// Stage everything and commit it.
    ///
    /// Returns `None` when the staged tree equals the current tip's tree, so an
    /// empty diff never produces a revision.
    pub fn commit_all(
        &self,
        signature: &Signature<'_>,
        message: &str,
    ) -> Result<Option<Oid>, ApiError> {
        let mut index = self.repo.index()?;
        index.read(false)?;
        index.add_all(["*"].iter(), IndexAddOption::DEFAULT, None)?;
        index.update_all(["*"].iter(), None)?;
        let tree_id = index.write_tree()?;
        index.write()?;

        let parent = match self.repo.head() {
            Ok(head) => Some(head.peel_to_commit()?),
            Err(e) if e.code() == ErrorCode::UnbornBranch => None,
            Err(e) => return Err(e.into()),
        };
        match &parent {
            Some(parent) if parent.tree_id() == tree_id => return Ok(None),
            None if index.is_empty() => return Ok(None),
            _ => {}
        }

        let tree = self.repo.find_tree(tree_id)?;
        let parents: Vec<&Commit<'_>> = parent.iter().collect();
        let oid = self
            .repo
            .commit(Some("HEAD"), signature, signature, message, &tree, &parents)?;
        Ok(Some(oid))
    }

    /// Check out `revision_id` with a detached HEAD, overwriting tracked files.
    ///
    /// Callers stash local edits first. Unknown or malformed ids are reported
    /// as a materialization error for that revision.
    pub fn detach_to(&self, revision_id: &str) -> Result<(), ApiError> {
        let scoped = |message: String| ApiError::Materialization {
            revision_id: revision_id.to_string(),
            message,
        };
        let oid = Oid::from_str(revision_id).map_err(|e| scoped(e.message().to_string()))?;
        let commit = self
            .repo
            .find_commit(oid)
            .map_err(|e| scoped(e.message().to_string()))?;

        let mut checkout = CheckoutBuilder::new();
        checkout.force();
        self.repo
            .checkout_tree(commit.as_object(), Some(&mut checkout))
            .map_err(|e| scoped(e.message().to_string()))?;
        self.repo.set_head_detached(oid)?;
        Ok(())
    }

    /// Put HEAD and the working tree back to `tip`.
    ///
    /// Never overwrites local edits; a conflicting checkout is an error.
    pub fn restore(&self, tip: &Tip) -> Result<(), ApiError> {
        let commit = match tip {
            Tip::Unborn => return Ok(()),
            Tip::Branch(name) => self.repo.find_reference(name)?.peel_to_commit()?,
            Tip::Detached(oid) => self.repo.find_commit(*oid)?,
        };

        let mut checkout = CheckoutBuilder::new();
        checkout.safe();
        self.repo
            .checkout_tree(commit.as_object(), Some(&mut checkout))?;

        match tip {
            Tip::Branch(name) => self.repo.set_head(name)?,
            Tip::Detached(oid) => self.repo.set_head_detached(*oid)?,
            Tip::Unborn => {}
        }
        Ok(())
    }

    /// Every regular file under the root except the VCS directory, sorted by
    /// `/`-separated relative path.
    pub fn list_files(&self) -> Result<Vec<(String, PathBuf)>, ApiError> {
        let mut files = Vec::new();
        let walker = WalkDir::new(&self.root)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || e.file_name() != VCS_DIR);
        for entry in walker {
            let entry = entry.map_err(|e| {
                ApiError::WorkspaceError(format!("Failed to walk {}: {}", self.root.display(), e))
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let relative = entry.path().strip_prefix(&self.root).map_err(|e| {
                ApiError::WorkspaceError(format!("{}: {}", entry.path().display(), e))
            })?;
            let relative = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            files.push((relative, entry.path().to_path_buf()));
        }
        Ok(files)
    }

    /// History reachable from HEAD, oldest first.
    pub fn history(&self) -> Result<Vec<Revision>, ApiError> {
        if self.tip()? == Tip::Unborn {
            return Ok(Vec::new());
        }
        let mut walk = self.repo.revwalk()?;
        walk.push_head()?;
        walk.set_sorting(Sort::TOPOLOGICAL | Sort::REVERSE)?;

        let mut revisions = Vec::new();
        for oid in walk {
            let commit = self.repo.find_commit(oid?)?;
            revisions.push(Revision {
                id: commit.id().to_string(),
                captured_at: capture_time(&commit),
            });
        }
        Ok(revisions)
    }

    pub fn revision(&self, oid: Oid) -> Result<Revision, ApiError> {
        let commit = self.repo.find_commit(oid)?;
        Ok(Revision {
            id: commit.id().to_string(),
            captured_at: capture_time(&commit),
        })
    }

    /// Set aside uncommitted modifications, untracked files too when asked.
    ///
    /// Returns the stash entry, or `None` when there was nothing to set aside.
    pub fn stash_save(
        &self,
        signature: &Signature<'_>,
        message: &str,
        include_untracked: bool,
    ) -> Result<Option<Oid>, ApiError> {
        if self.tip()? == Tip::Unborn {
            return Ok(None);
        }
        let flags = if include_untracked {
            StashFlags::INCLUDE_UNTRACKED
        } else {
            StashFlags::DEFAULT
        };
        // stashing needs a mutable handle
        let mut repo = Repository::open(self.repo.path())?;
        match repo.stash_save(signature, message, Some(flags)) {
            Ok(oid) => Ok(Some(oid)),
            Err(e) if e.code() == ErrorCode::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Reapply the stash entry `stash` and drop it.
    pub fn stash_pop(&self, stash: Oid) -> Result<(), ApiError> {
        let mut repo = Repository::open(self.repo.path())?;
        let mut position = None;
        repo.stash_foreach(|index, _, oid| {
            if *oid == stash && position.is_none() {
                position = Some(index);
            }
            true
        })?;
        let index = position
            .ok_or_else(|| ApiError::WorkspaceError(format!("stash {} not found", stash)))?;
        let mut apply = StashApplyOptions::new();
        apply.reinstantiate_index();
        repo.stash_pop(index, Some(&mut apply))?;
        Ok(())
    }
}

/// Revision message written by the recorder: the capture time in unix milliseconds.
pub fn capture_message(captured_at: CapturedAt) -> String {
    captured_at.to_string()
}

/// Capture time of a revision.
///
/// The recorder's message stamp is authoritative; revisions authored elsewhere
/// fall back to the committer time, and to [`UNKNOWN_CAPTURE_TIME`] if neither decodes.
pub fn capture_time(commit: &Commit<'_>) -> CapturedAt {
    let stamp = commit
        .message()
        .and_then(|m| m.trim().parse::<i64>().ok())
        .filter(|v| *v >= 0);
    if let Some(stamp) = stamp {
        if stamp >= NANOSECOND_STAMP_FLOOR {
            return stamp / 1_000_000;
        }
        return stamp;
    }
    let seconds = commit.time().seconds();
    if seconds >= 0 {
        seconds.saturating_mul(1000)
    } else {
        UNKNOWN_CAPTURE_TIME
    }
}
