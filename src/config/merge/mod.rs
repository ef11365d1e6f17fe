//! Source merging: defaults, then files, then environment.

pub mod service;

use config::builder::DefaultState;
use config::{ConfigBuilder, ConfigError};

/// Builder seeded with the values every layer falls back to.
///
/// Struct-level serde defaults cover the rest; only keys whose type the
/// environment source could misparse are pinned here.
pub fn builder_with_defaults() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    config::Config::builder()
        .set_default("playback.failure_policy", "skip")?
        .set_default("logging.format", "text")
}
