//! Read the version out of a decompiled tree.

use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::info;

use crate::core::manifest::parse_manifest;
use crate::core::types::Version;
use crate::error::SyncError;

/// Parse `<output_dir>/<manifest_file>` into a [`Version`].
///
/// A missing manifest is reported as [`SyncError::MalformedManifest`] like
/// any other unusable manifest.
pub fn extract_version(output_dir: &Path, manifest_file: &str) -> Result<Version> {
    let path = output_dir.join(manifest_file);
    let xml = match fs::read_to_string(&path) {
        Ok(xml) => xml,
        Err(err) if err.kind() == ErrorKind::NotFound => {
            return Err(SyncError::malformed(format!("{} not found", path.display())).into());
        }
        Err(err) => return Err(err).with_context(|| format!("read {}", path.display())),
    };
    let version = parse_manifest(&xml).with_context(|| format!("parse {}", path.display()))?;
    info!(version = %version, "extracted version");
    Ok(version)
}
