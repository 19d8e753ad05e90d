//! Strict-inequality gate deciding whether a decompiled version is published.
//!
//! The last published code is `Option<VersionCode>`: `None` means no version
//! was ever recorded and orders below every code, including `0`.

use super::types::{Version, VersionCode};

/// Value returned by the version store when nothing was recorded yet.
pub const NO_PRIOR_VERSION: Option<VersionCode> = None;

/// True when `candidate` must be published on top of `last_published`.
///
/// Equal codes are not newer, so re-running against an unchanged artifact is a
/// no-op.
pub fn is_newer(candidate: &Version, last_published: Option<VersionCode>) -> bool {
    Some(candidate.code) > last_published
}
