//! Shared deterministic types for the mirror pipeline.
//!
//! These types define stable contracts between the orchestrator and the CLI.
//! `SyncOutcome` is serialized for `apk-mirror sync --json`, so variant and
//! field names are part of the command's output format.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Integer ordering key declared by the artifact manifest.
pub type VersionCode = u64;

/// Version of a decompiled artifact.
///
/// `code` is the only ordering key. `label` is display-only and embeds the
/// human-readable version name alongside the code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Version {
    pub code: VersionCode,
    pub label: String,
}

impl Version {
    /// Build a version from the manifest's code and name (`"42 (1.2.3)"`).
    pub fn new(code: VersionCode, name: &str) -> Self {
        Self {
            code,
            label: format!("{code} ({name})"),
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label)
    }
}

/// How a completed run ended.
///
/// Every variant is a successful run from the process point of view: the
/// fatal conditions (ambiguous artifact, transform failure, malformed manifest)
/// surface as errors instead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SyncOutcome {
    /// Newer version committed, pushed, and recorded.
    Published { version: Version, commit: String },
    /// Newer version, but the decompiled tree matched HEAD. Recorded anyway.
    NoChanges { version: Version },
    /// Extracted code was not strictly greater than the recorded one.
    NotNewer {
        version: Version,
        last_published: Option<VersionCode>,
    },
    /// Local commit created but the push was rejected. Not recorded.
    PushFailed {
        version: Version,
        commit: String,
        reason: String,
    },
}

impl SyncOutcome {
    pub fn version(&self) -> &Version {
        match self {
            SyncOutcome::Published { version, .. }
            | SyncOutcome::NoChanges { version }
            | SyncOutcome::NotNewer { version, .. }
            | SyncOutcome::PushFailed { version, .. } => version,
        }
    }

    /// One-line human summary, printed by the CLI.
    pub fn summary(&self) -> String {
        match self {
            SyncOutcome::Published { version, commit } => {
                format!("published {version} as {commit}")
            }
            SyncOutcome::NoChanges { version } => {
                format!("no changes detected for {version}")
            }
            SyncOutcome::NotNewer {
                version,
                last_published,
            } => match last_published {
                Some(last) => format!("skipped {version}: not newer than {last}"),
                None => format!("skipped {version}"),
            },
            SyncOutcome::PushFailed {
                version,
                commit,
                reason,
            } => format!("push failed for {version} (local commit {commit}): {reason}"),
        }
    }
}
