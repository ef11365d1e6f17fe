//! Materialization Engine
//!
//! Reproduces the full file tree of one revision by detaching the workspace
//! to it, reading every file, and putting the previous tip back.

use crate::cancel::Cancellation;
use crate::concurrency::ProjectGuard;
use crate::error::ApiError;
use crate::workspace::{Tip, Workspace};
use git2::{Oid, Signature};
use std::collections::BTreeMap;
use std::fs;
use tracing::{debug, warn};

/// `/`-separated relative path to file content
pub type MaterializedTree = BTreeMap<String, String>;

const STASH_AUTHOR: &str = "livelog";
const STASH_EMAIL: &str = "livelog@localhost";
const STASH_MESSAGE: &str = "livelog: local changes set aside during playback";

/// Sets local changes aside and records the tip; puts both back when dropped,
/// unless [`TipGuard::restore`] already did.
pub struct TipGuard<'a> {
    workspace: &'a Workspace,
    tip: Option<Tip>,
    stash: Option<Oid>,
}

impl<'a> TipGuard<'a> {
    /// Record the tip, then stash tracked edits and untracked files.
    pub fn record(workspace: &'a Workspace) -> Result<Self, ApiError> {
        let tip = workspace.tip()?;
        let signature = Signature::now(STASH_AUTHOR, STASH_EMAIL)?;
        let stash = workspace.stash_save(&signature, STASH_MESSAGE, true)?;
        if let Some(stash) = stash {
            debug!(workspace = %workspace.root().display(), %stash, "Local changes stashed");
        }
        Ok(Self {
            workspace,
            tip: Some(tip),
            stash,
        })
    }

    /// Restore now and report the outcome.
    pub fn restore(mut self) -> Result<(), ApiError> {
        self.put_back()
    }

    /// Tip first, then the stash. A stash is only popped onto a restored tip.
    fn put_back(&mut self) -> Result<(), ApiError> {
        let Some(tip) = self.tip.take() else {
            return Ok(());
        };
        if let Err(e) = self.workspace.restore(&tip) {
            if let Some(stash) = self.stash.take() {
                warn!(
                    workspace = %self.workspace.root().display(),
                    %stash,
                    "Local changes left in the stash"
                );
            }
            return Err(e);
        }
        match self.stash.take() {
            Some(stash) => self.workspace.stash_pop(stash),
            None => Ok(()),
        }
    }
}

impl Drop for TipGuard<'_> {
    fn drop(&mut self) {
        let tip = self.tip.clone();
        if let Err(e) = self.put_back() {
            warn!(
                workspace = %self.workspace.root().display(),
                tip = ?tip,
                error = %e,
                "Failed to restore workspace tip"
            );
        }
    }
}

pub struct MaterializationEngine;

impl MaterializationEngine {
    /// Contents of every file at `revision_id`.
    ///
    /// The caller proves it holds the project's lock by passing the guard.
    /// Local edits and untracked files never leak into the tree. The tip and
    /// those edits are the same on return as on entry, whether the call
    /// succeeded or not.
    pub fn materialize(
        workspace: &Workspace,
        revision_id: &str,
        guard: &ProjectGuard,
        cancel: &Cancellation,
    ) -> Result<MaterializedTree, ApiError> {
        let tip = TipGuard::record(workspace)?;
        workspace.detach_to(revision_id)?;

        let mut tree = MaterializedTree::new();
        for (relative, absolute) in workspace.list_files()? {
            cancel.check()?;
            let bytes = fs::read(&absolute).map_err(|e| ApiError::Materialization {
                revision_id: revision_id.to_string(),
                message: format!("Failed to read {}: {}", relative, e),
            })?;
            tree.insert(relative, String::from_utf8_lossy(&bytes).into_owned());
        }

        tip.restore()?;
        debug!(
            project_id = guard.project_id(),
            revision_id,
            files = tree.len(),
            "Revision materialized"
        );
        Ok(tree)
    }
}
