//! Configuration
//!
//! Typed configuration for every component, loaded from layered sources by
//! [`ConfigLoader`]: built-in defaults, the global file, the workspace file,
//! then `LIVELOG__SECTION__KEY` environment variables.

mod facade;
mod merge;
pub mod paths;
mod sources;

pub use facade::ConfigLoader;

use crate::error::ApiError;
use crate::logging::LoggingConfig;
use crate::types::PROJECT_ID_LENGTH;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Name of the per-workspace config file
pub const WORKSPACE_CONFIG_FILE: &str = ".livelog.toml";

/// Root configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LivelogConfig {
    pub recorder: RecorderConfig,
    pub import: ImportConfig,
    pub store: StoreConfig,
    pub playback: PlaybackConfig,
    pub logging: LoggingConfig,
}

impl LivelogConfig {
    /// Reject values that would make a component spin or refuse everything.
    pub fn validate(&self) -> Result<(), ApiError> {
        if self.recorder.poll_interval_ms == 0 {
            return Err(ApiError::ConfigError(
                "recorder.poll_interval_ms must be greater than zero".to_string(),
            ));
        }
        if self.recorder.author_name.trim().is_empty() {
            return Err(ApiError::ConfigError(
                "recorder.author_name cannot be empty".to_string(),
            ));
        }
        if self.import.max_upload_bytes == 0 {
            return Err(ApiError::ConfigError(
                "import.max_upload_bytes must be greater than zero".to_string(),
            ));
        }
        if !(8..=64).contains(&self.import.project_id_length) {
            return Err(ApiError::ConfigError(format!(
                "import.project_id_length must be between 8 and 64, got {}",
                self.import.project_id_length
            )));
        }
        if self.store.timeout_ms == 0 {
            return Err(ApiError::ConfigError(
                "store.timeout_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_poll_interval_ms() -> u64 {
    500
}

fn default_author_name() -> String {
    "livelog".to_string()
}

fn default_author_email() -> String {
    "livelog@localhost".to_string()
}

/// Snapshot recorder settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecorderConfig {
    /// Delay between polling cycles
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Author identity of recorded revisions
    #[serde(default = "default_author_name")]
    pub author_name: String,

    #[serde(default = "default_author_email")]
    pub author_email: String,
}

impl RecorderConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            author_name: default_author_name(),
            author_email: default_author_email(),
        }
    }
}

fn default_max_upload_bytes() -> u64 {
    10_000_000
}

fn default_project_id_length() -> usize {
    PROJECT_ID_LENGTH
}

/// History importer settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportConfig {
    /// Upload ceiling, enforced while reading
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: u64,

    /// Directory imported projects are extracted under; `None` uses the XDG data dir
    #[serde(default)]
    pub hosting_root: Option<PathBuf>,

    #[serde(default = "default_project_id_length")]
    pub project_id_length: usize,
}

impl ImportConfig {
    pub fn resolve_hosting_root(&self) -> Result<PathBuf, ApiError> {
        match &self.hosting_root {
            Some(root) => Ok(root.clone()),
            None => Ok(paths::data_dir()?.join("hosted")),
        }
    }
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            max_upload_bytes: default_max_upload_bytes(),
            hosting_root: None,
            project_id_length: default_project_id_length(),
        }
    }
}

fn default_store_timeout_ms() -> u64 {
    10_000
}

/// Metadata store settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Sled database directory; `None` uses the XDG data dir
    #[serde(default)]
    pub path: Option<PathBuf>,

    /// Bound on every store call
    #[serde(default = "default_store_timeout_ms")]
    pub timeout_ms: u64,
}

impl StoreConfig {
    pub fn resolve_path(&self) -> Result<PathBuf, ApiError> {
        match &self.path {
            Some(path) => Ok(path.clone()),
            None => Ok(paths::data_dir()?.join("store")),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: None,
            timeout_ms: default_store_timeout_ms(),
        }
    }
}

/// What playback does when one snapshot cannot be materialized
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Abort the whole request with the snapshot's error
    FailFast,
    /// Emit the entry with an error marker and no files, then continue
    #[default]
    Skip,
}

fn default_lock_timeout_ms() -> u64 {
    30_000
}

/// Timeline assembly settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaybackConfig {
    #[serde(default)]
    pub failure_policy: FailurePolicy,

    /// How long a request waits for a project lock held by someone else
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,
}

impl PlaybackConfig {
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            failure_policy: FailurePolicy::default(),
            lock_timeout_ms: default_lock_timeout_ms(),
        }
    }
}
