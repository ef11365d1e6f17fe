//! Core identifiers.

use crate::error::ApiError;
use rand::distributions::Alphanumeric;
use rand::Rng;

/// ProjectId: opaque generated identifier of a recorded project
pub type ProjectId = String;

/// RevisionId: hex object id of the git commit a snapshot refers to
pub type RevisionId = String;

/// Capture time in unix milliseconds, or [`UNKNOWN_CAPTURE_TIME`]
pub type CapturedAt = i64;

/// Sentinel for a revision whose capture time could not be decoded.
pub const UNKNOWN_CAPTURE_TIME: CapturedAt = -1;

/// Default length of generated project identifiers.
pub const PROJECT_ID_LENGTH: usize = 20;

const MAX_PROJECT_ID_LENGTH: usize = 64;

/// Generate a random alphanumeric project identifier.
///
/// Callers are responsible for checking the result against existing projects.
pub fn generate_project_id(length: usize) -> ProjectId {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(length)
        .map(char::from)
        .collect()
}

/// Reject identifiers that could not have been generated by [`generate_project_id`].
///
/// Ids end up as directory names, so anything outside `[0-9A-Za-z]` is refused.
pub fn validate_project_id(project_id: &str) -> Result<(), ApiError> {
    if project_id.is_empty()
        || project_id.len() > MAX_PROJECT_ID_LENGTH
        || !project_id.chars().all(|c| c.is_ascii_alphanumeric())
    {
        return Err(ApiError::InvalidProjectId(project_id.to_string()));
    }
    Ok(())
}

/// Current wall-clock time in unix milliseconds.
pub fn now_millis() -> CapturedAt {
    chrono::Utc::now().timestamp_millis()
}
