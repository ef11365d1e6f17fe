//! livelog: Recorded Workspace Playback
//!
//! Records a workspace's history as ordered snapshots (or imports an existing
//! git history from an archive) and replays it as a timeline of full file
//! trees, each file annotated with the directives written in its comments.

pub mod api;
pub mod cancel;
pub mod concurrency;
pub mod config;
pub mod directive;
pub mod error;
pub mod import;
pub mod logging;
pub mod materialize;
pub mod store;
pub mod timeline;
pub mod tooling;
pub mod types;
pub mod workspace;

pub use api::{ImportResponse, PlaybackRequest, ReplayContext};
pub use error::{ApiError, ErrorKind, ErrorResponse, StorageError};
pub use timeline::TimelineEntry;
