//! Scratch directory and output tree housekeeping.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, info};

use crate::error::SyncError;

/// Name the single downloaded artifact is renamed to before transform.
pub const ARTIFACT_NAME: &str = "app.apk";

/// Remove `dir` entirely and recreate it empty.
pub fn reset_scratch(dir: &Path) -> Result<()> {
    info!(path = %dir.display(), "clearing download directory");
    if dir.exists() {
        fs::remove_dir_all(dir).with_context(|| format!("remove {}", dir.display()))?;
    }
    fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;
    Ok(())
}

/// Enforce the exactly-one-artifact postcondition and rename it to
/// [`ARTIFACT_NAME`].
///
/// Zero or several entries fail with [`SyncError::AmbiguousArtifact`].
pub fn take_single_artifact(dir: &Path) -> Result<PathBuf> {
    let mut names = list_names(dir)?;
    if names.len() != 1 {
        names.sort();
        return Err(SyncError::AmbiguousArtifact {
            count: names.len(),
            names,
        }
        .into());
    }

    let source = dir.join(&names[0]);
    if !source.is_file() {
        return Err(SyncError::AmbiguousArtifact {
            count: 1,
            names,
        })
        .with_context(|| format!("{} is not a regular file", source.display()));
    }

    let target = dir.join(ARTIFACT_NAME);
    if source != target {
        debug!(from = %source.display(), to = %target.display(), "renaming artifact");
        fs::rename(&source, &target)
            .with_context(|| format!("rename {} to {}", source.display(), target.display()))?;
    }
    Ok(target)
}

/// Delete everything under `dir` except `.git`, creating `dir` if missing.
///
/// Run before transform so files dropped upstream also vanish from the mirror.
pub fn clear_output_tree(dir: &Path) -> Result<()> {
    fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;
    let mut removed = 0usize;
    for entry in fs::read_dir(dir).with_context(|| format!("read {}", dir.display()))? {
        let entry = entry.with_context(|| format!("read entry in {}", dir.display()))?;
        if entry.file_name() == ".git" {
            continue;
        }
        let path = entry.path();
        let file_type = entry
            .file_type()
            .with_context(|| format!("stat {}", path.display()))?;
        if file_type.is_dir() {
            fs::remove_dir_all(&path)
        } else {
            fs::remove_file(&path)
        }
        .with_context(|| format!("remove {}", path.display()))?;
        removed += 1;
    }
    debug!(path = %dir.display(), removed, "cleared output tree");
    Ok(())
}

fn list_names(dir: &Path) -> Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("read {}", dir.display()))? {
        let entry = entry.with_context(|| format!("read entry in {}", dir.display()))?;
        names.push(entry.file_name().to_string_lossy().into_owned());
    }
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ambiguous_count(err: &anyhow::Error) -> Option<usize> {
        match err.downcast_ref::<SyncError>() {
            Some(SyncError::AmbiguousArtifact { count, .. }) => Some(*count),
            _ => None,
        }
    }

    #[test]
    fn reset_scratch_empties_existing_dir() {
        let temp = tempfile::tempdir().expect("tempdir");
        let dir = temp.path().join("downloaded");
        fs::create_dir_all(dir.join("sub")).expect("mkdir");
        fs::write(dir.join("old.apk"), "old").expect("write");

        reset_scratch(&dir).expect("reset");
        assert!(dir.is_dir());
        assert_eq!(fs::read_dir(&dir).expect("read").count(), 0);
    }

    #[test]
    fn single_file_is_renamed_to_canonical_name() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::write(temp.path().join("com.example.app_1.2.3.apk"), "apk").expect("write");

        let artifact = take_single_artifact(temp.path()).expect("artifact");
        assert_eq!(artifact, temp.path().join(ARTIFACT_NAME));
        assert_eq!(fs::read_to_string(&artifact).expect("read"), "apk");
        assert_eq!(list_names(temp.path()).expect("names"), vec![ARTIFACT_NAME]);
    }

    #[test]
    fn already_canonical_name_is_kept() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::write(temp.path().join(ARTIFACT_NAME), "apk").expect("write");
        let artifact = take_single_artifact(temp.path()).expect("artifact");
        assert_eq!(artifact, temp.path().join(ARTIFACT_NAME));
    }

    #[test]
    fn empty_dir_is_ambiguous() {
        let temp = tempfile::tempdir().expect("tempdir");
        let err = take_single_artifact(temp.path()).unwrap_err();
        assert_eq!(ambiguous_count(&err), Some(0));
    }

    #[test]
    fn two_files_are_ambiguous() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::write(temp.path().join("b.apk"), "b").expect("write");
        fs::write(temp.path().join("a.apk"), "a").expect("write");

        let err = take_single_artifact(temp.path()).unwrap_err();
        assert_eq!(ambiguous_count(&err), Some(2));
        assert!(err.to_string().contains("[a.apk, b.apk]"));
        assert!(temp.path().join("a.apk").exists(), "nothing is renamed");
    }

    #[test]
    fn lone_directory_is_rejected() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::create_dir(temp.path().join("partial")).expect("mkdir");
        let err = take_single_artifact(temp.path()).unwrap_err();
        assert_eq!(ambiguous_count(&err), Some(1));
    }

    #[test]
    fn clear_output_tree_keeps_git_dir_only() {
        let temp = tempfile::tempdir().expect("tempdir");
        let dir = temp.path();
        fs::create_dir_all(dir.join(".git/objects")).expect("mkdir");
        fs::write(dir.join(".git/HEAD"), "ref: refs/heads/master").expect("write");
        fs::create_dir_all(dir.join("sources/com/example")).expect("mkdir");
        fs::write(dir.join("sources/com/example/Main.java"), "class Main {}").expect("write");
        fs::write(dir.join("AndroidManifest.xml"), "<manifest/>").expect("write");

        clear_output_tree(dir).expect("clear");
        assert_eq!(list_names(dir).expect("names"), vec![".git"]);
        assert!(dir.join(".git/HEAD").exists());
    }
}
