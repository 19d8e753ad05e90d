//! Pipeline conditions that callers must tell apart.
//!
//! Everything else propagates as plain `anyhow` errors with context. These
//! variants travel inside `anyhow::Error` and are recovered with
//! `downcast_ref::<SyncError>()` by the orchestrator (push failures) and the
//! CLI (exit codes).

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// The scratch directory did not hold exactly one file after fetch.
    #[error("expected exactly one downloaded artifact, found {count}: [{}]", .names.join(", "))]
    AmbiguousArtifact { count: usize, names: Vec<String> },

    /// Manifest missing, unparseable, or lacking a usable version code.
    #[error("malformed manifest: {reason}")]
    MalformedManifest { reason: String },

    /// The decompiler exited unsuccessfully or ran past its budget.
    #[error("transform failed (exit code {exit_code:?}, timed out: {timed_out})")]
    TransformFailed {
        exit_code: Option<i32>,
        timed_out: bool,
    },

    /// Commit `commit` exists locally but could not be pushed.
    #[error("push of {commit} failed: {reason}")]
    PushFailed { commit: String, reason: String },
}

impl SyncError {
    pub fn malformed(reason: impl Into<String>) -> Self {
        SyncError::MalformedManifest {
            reason: reason.into(),
        }
    }
}
