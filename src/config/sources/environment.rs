//! Environment variable source: LIVELOG__ prefix with __ separator

use config::builder::DefaultState;
use config::ConfigBuilder;
use config::ConfigError;
use config::Environment;

/// Add environment variable overlay to builder.
/// `LIVELOG__PLAYBACK__LOCK_TIMEOUT_MS=5000` sets `playback.lock_timeout_ms`.
pub fn add_to_builder(
    builder: ConfigBuilder<DefaultState>,
) -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    let builder = builder.add_source(
        Environment::with_prefix("LIVELOG")
            .separator("__")
            .try_parsing(true),
    );
    Ok(builder)
}
