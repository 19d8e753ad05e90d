//! Stable exit codes for `apk-mirror` commands.

use crate::error::SyncError;

/// Command succeeded. Covers every sync outcome, including a failed push.
pub const OK: i32 = 0;
/// Invalid config, fatal stage error, or any other failure.
pub const FAILED: i32 = 1;
/// `apk-mirror sync` found zero or several downloaded files.
pub const AMBIGUOUS_ARTIFACT: i32 = 2;

/// Exit code for an error that aborted a command.
pub fn for_error(err: &anyhow::Error) -> i32 {
    match err.downcast_ref::<SyncError>() {
        Some(SyncError::AmbiguousArtifact { .. }) => AMBIGUOUS_ARTIFACT,
        _ => FAILED,
    }
}
