//! ConfigLoader facade delegating to merge service.

use super::merge::service::MergeService;
use super::LivelogConfig;
use crate::error::ApiError;
use std::path::Path;

/// Configuration loader facade.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from the standard sources, validated.
    pub fn load(workspace_root: Option<&Path>) -> Result<LivelogConfig, ApiError> {
        let config = MergeService::load(workspace_root)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file (plus environment), validated.
    pub fn load_from_file(path: &Path) -> Result<LivelogConfig, ApiError> {
        let config = MergeService::load_from_file(path).map_err(|e| {
            ApiError::ConfigError(format!(
                "Failed to load config from {}: {}",
                path.display(),
                e
            ))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Create default configuration.
    pub fn default() -> LivelogConfig {
        LivelogConfig::default()
    }
}
