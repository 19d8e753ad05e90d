//! Test-only fakes and fixtures for driving the sync pipeline.
//!
//! Scripted stages pop one response per call, so a test reads as the sequence
//! of runs it simulates. [`TestMirror`] provides a temp directory with a local
//! bare remote and a config pointing at it.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{Context, Result, anyhow, bail};
use tempfile::TempDir;

use crate::core::types::{SyncOutcome, VersionCode};
use crate::error::SyncError;
use crate::io::acquirer::Acquirer;
use crate::io::config::{
    AcquireConfig, CredentialsConfig, GitConfig, Identity, MirrorConfig, TransformConfig,
};
use crate::io::credentials::StaticCredentials;
use crate::io::git::GitRepository;
use crate::io::transformer::Transformer;
use crate::io::version_store::{FileVersionStore, VersionStore};
use crate::sync::run_sync;

/// Identity used for every test commit.
pub fn test_identity() -> Identity {
    Identity {
        name: "Mirror Test".to_string(),
        email: "mirror@example.com".to_string(),
    }
}

/// Minimal manifest carrying `code` and `name`.
pub fn manifest_xml(code: VersionCode, name: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="utf-8"?>
<manifest xmlns:android="http://schemas.android.com/apk/res/android" android:versionCode="{code}" android:versionName="{name}" package="com.example.app">
    <application android:label="Example"/>
</manifest>
"#
    )
}

/// Create a bare repository at `<dir>/remote.git` and return its path.
pub fn init_bare_remote(dir: &Path) -> PathBuf {
    let remote = dir.join("remote.git");
    let status = Command::new("git")
        .args(["init", "--bare", "--quiet"])
        .arg(&remote)
        .status()
        .expect("spawn git init --bare");
    assert!(status.success(), "git init --bare failed");
    remote
}

/// Run git in `dir` and return trimmed stdout; panics on failure.
pub fn git_capture(dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .expect("spawn git");
    assert!(
        output.status.success(),
        "git {} failed: {}",
        args.join(" "),
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

/// Files one scripted fetch drops into the download directory.
pub type ScriptedFetch = Vec<(String, Vec<u8>)>;

/// Acquirer that writes pre-scripted files, one fetch per call.
#[derive(Debug, Default)]
pub struct ScriptedAcquirer {
    fetches: RefCell<VecDeque<ScriptedFetch>>,
    calls: RefCell<usize>,
}

impl ScriptedAcquirer {
    pub fn new(fetches: Vec<ScriptedFetch>) -> Self {
        Self {
            fetches: RefCell::new(fetches.into()),
            calls: RefCell::new(0),
        }
    }

    /// One fetch per entry, each dropping a single `<name>` with `contents`.
    pub fn single_files(files: &[(&str, &str)]) -> Self {
        Self::new(
            files
                .iter()
                .map(|(name, contents)| vec![(name.to_string(), contents.as_bytes().to_vec())])
                .collect(),
        )
    }

    pub fn calls(&self) -> usize {
        *self.calls.borrow()
    }
}

impl Acquirer for ScriptedAcquirer {
    fn fetch(&self, target_dir: &Path) -> Result<()> {
        *self.calls.borrow_mut() += 1;
        let files = self
            .fetches
            .borrow_mut()
            .pop_front()
            .ok_or_else(|| anyhow!("no scripted fetch left"))?;
        for (name, contents) in files {
            let path = target_dir.join(&name);
            fs::write(&path, contents).with_context(|| format!("write {}", path.display()))?;
        }
        Ok(())
    }
}

/// What one scripted decompile produces.
#[derive(Debug, Clone, Default)]
pub struct ScriptedTransform {
    /// Manifest contents; `None` leaves the manifest out.
    pub manifest: Option<String>,
    /// Extra files relative to the output directory.
    pub files: Vec<(String, String)>,
    /// Fail like a decompiler exiting with status 1.
    pub fail: bool,
}

impl ScriptedTransform {
    /// Manifest for `code`/`name` plus one source file that changes with them.
    pub fn version(code: VersionCode, name: &str) -> Self {
        Self {
            manifest: Some(manifest_xml(code, name)),
            files: vec![(
                "java/com/example/app/BuildConfig.java".to_string(),
                format!(
                    "package com.example.app;\n\npublic final class BuildConfig {{\n    public static final int VERSION_CODE = {code};\n    public static final String VERSION_NAME = \"{name}\";\n}}\n"
                ),
            )],
            fail: false,
        }
    }

    pub fn with_manifest(manifest: impl Into<String>) -> Self {
        Self {
            manifest: Some(manifest.into()),
            ..Self::default()
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn with_file(mut self, rel: &str, body: &str) -> Self {
        self.files.push((rel.to_string(), body.to_string()));
        self
    }
}

/// Transformer that writes scripted trees and records what it was handed.
#[derive(Debug)]
pub struct ScriptedTransformer {
    transforms: RefCell<VecDeque<ScriptedTransform>>,
    artifacts: RefCell<Vec<(PathBuf, Vec<u8>)>>,
    manifest_file: String,
}

impl ScriptedTransformer {
    pub fn new(transforms: Vec<ScriptedTransform>) -> Self {
        Self {
            transforms: RefCell::new(transforms.into()),
            artifacts: RefCell::new(Vec::new()),
            manifest_file: TransformConfig::default().manifest_file,
        }
    }

    /// Artifact paths and their contents, one per call.
    pub fn artifacts(&self) -> Vec<(PathBuf, Vec<u8>)> {
        self.artifacts.borrow().clone()
    }

    pub fn calls(&self) -> usize {
        self.artifacts.borrow().len()
    }
}

impl Transformer for ScriptedTransformer {
    fn transform(&self, artifact: &Path, output_dir: &Path) -> Result<()> {
        let contents =
            fs::read(artifact).with_context(|| format!("read {}", artifact.display()))?;
        self.artifacts
            .borrow_mut()
            .push((artifact.to_path_buf(), contents));

        let script = self
            .transforms
            .borrow_mut()
            .pop_front()
            .ok_or_else(|| anyhow!("no scripted transform left"))?;
        if script.fail {
            return Err(SyncError::TransformFailed {
                exit_code: Some(1),
                timed_out: false,
            }
            .into());
        }

        fs::create_dir_all(output_dir)?;
        if let Some(manifest) = &script.manifest {
            fs::write(output_dir.join(&self.manifest_file), manifest)?;
        }
        for (rel, body) in &script.files {
            let path = output_dir.join(rel);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&path, body)?;
        }
        Ok(())
    }
}

/// Temp directory holding a mirror config, a bare remote, and nothing else.
pub struct TestMirror {
    temp: TempDir,
    config: MirrorConfig,
    remote: PathBuf,
}

impl TestMirror {
    /// Mirror whose `origin` is a local bare repository.
    pub fn new() -> Result<Self> {
        let temp = tempfile::tempdir().context("create tempdir")?;
        let remote = init_bare_remote(temp.path());
        Ok(Self::with_remote(temp, remote))
    }

    /// Mirror whose `origin` does not exist, so every push fails.
    pub fn with_unreachable_remote() -> Result<Self> {
        let temp = tempfile::tempdir().context("create tempdir")?;
        let remote = temp.path().join("missing.git");
        Ok(Self::with_remote(temp, remote))
    }

    fn with_remote(temp: TempDir, remote: PathBuf) -> Self {
        let root = temp.path();
        let config = MirrorConfig {
            package_name: "com.example.app".to_string(),
            target_folder: root.join("mirror"),
            version_file: root.join("version.txt"),
            scratch_dir: root.join("downloaded"),
            acquire: AcquireConfig::default(),
            transform: TransformConfig {
                log_file: root.join("jadx.log"),
                ..TransformConfig::default()
            },
            git: GitConfig {
                repository: remote.display().to_string(),
                branch: "master".to_string(),
                author: test_identity(),
                committer: test_identity(),
                credentials: CredentialsConfig::None,
            },
        };
        Self {
            temp,
            config,
            remote,
        }
    }

    pub fn path(&self) -> &Path {
        self.temp.path()
    }

    pub fn config(&self) -> &MirrorConfig {
        &self.config
    }

    pub fn remote(&self) -> &Path {
        &self.remote
    }

    pub fn workdir(&self) -> &Path {
        &self.config.target_folder
    }

    pub fn store(&self) -> FileVersionStore {
        FileVersionStore::new(&self.config.version_file)
    }

    pub fn repository(&self) -> GitRepository {
        GitRepository::from_config(&self.config.target_folder, &self.config.git)
    }

    /// Recorded last published code.
    pub fn recorded(&self) -> Option<VersionCode> {
        self.store().load()
    }

    /// Run one sync with scripted acquire/transform and real git/record.
    pub fn sync(
        &self,
        acquirer: &ScriptedAcquirer,
        transformer: &ScriptedTransformer,
    ) -> Result<SyncOutcome> {
        run_sync(
            &self.config,
            acquirer,
            transformer,
            &self.repository(),
            &self.store(),
            &StaticCredentials::none(),
        )
    }

    /// Number of commits on the mirror's local HEAD (0 when unborn).
    pub fn local_commit_count(&self) -> Result<usize> {
        self.commit_count(self.workdir(), "HEAD")
    }

    /// Number of commits on the remote branch (0 when it does not exist).
    pub fn remote_commit_count(&self) -> Result<usize> {
        self.commit_count(&self.remote, "refs/heads/master")
    }

    fn commit_count(&self, dir: &Path, rev: &str) -> Result<usize> {
        let verify = Command::new("git")
            .args(["rev-parse", "--verify", "--quiet", rev])
            .current_dir(dir)
            .output()
            .context("spawn git rev-parse")?;
        if !verify.status.success() {
            return Ok(0);
        }
        let out = Command::new("git")
            .args(["rev-list", "--count", rev])
            .current_dir(dir)
            .output()
            .context("spawn git rev-list")?;
        if !out.status.success() {
            bail!("git rev-list failed in {}", dir.display());
        }
        Ok(String::from_utf8_lossy(&out.stdout).trim().parse()?)
    }
}
