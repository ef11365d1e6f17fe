//! Workspace domain: the git-backed working directory and the recorder that polls it.

pub mod recorder;
pub mod repo;

pub use recorder::{CycleOutcome, RecorderHandle, SnapshotRecorder};
pub use repo::{Revision, Tip, Workspace, VCS_DIR};
