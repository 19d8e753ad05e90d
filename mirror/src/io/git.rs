//! Git adapter for the mirror working directory.
//!
//! The mirror commits and force-pushes deterministically, so we keep a small,
//! explicit wrapper around `git` subprocess calls. [`Repository`] is the seam
//! the orchestrator depends on; [`GitRepository`] implements it on top of
//! [`Git`].

use std::ffi::OsStr;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use anyhow::{Context, Result, anyhow};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use tracing::{debug, info, instrument, warn};

use super::config::{GitConfig, Identity};
use super::credentials::Credentials;
use crate::error::SyncError;

pub const REMOTE_NAME: &str = "origin";

/// Full commit id.
pub type CommitRef = String;

/// Parsed `git status --porcelain` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEntry {
    /// 2-letter XY code, or "??" for untracked.
    pub code: String,
    /// Path for the changed file.
    pub path: String,
}

/// Everything needed to publish one version.
#[derive(Debug, Clone, Copy)]
pub struct CommitRequest<'a> {
    pub message: &'a str,
    pub author: &'a Identity,
    pub committer: &'a Identity,
    pub credentials: Option<&'a Credentials>,
}

/// Version-controlled mirror working directory.
pub trait Repository {
    /// Discard uncommitted changes (or create the repository) and return HEAD.
    fn reset(&self) -> Result<Option<CommitRef>>;
    /// Paths that differ from HEAD, including untracked files.
    fn status(&self) -> Result<Vec<StatusEntry>>;
    /// Commit every change and push the branch to `origin`.
    ///
    /// A rejected push fails with [`SyncError::PushFailed`]; the local commit
    /// is kept.
    fn commit_and_push(&self, request: &CommitRequest<'_>) -> Result<CommitRef>;
}

/// Wrapper for executing git commands in a working directory.
#[derive(Debug, Clone)]
pub struct Git {
    workdir: PathBuf,
    program: PathBuf,
}

impl Git {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self::with_program(workdir, "git")
    }

    /// Use `program` instead of the `git` found on `PATH`.
    pub fn with_program(workdir: impl Into<PathBuf>, program: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
            program: program.into(),
        }
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    /// Whether `workdir` itself holds a readable repository.
    ///
    /// A repository in a parent directory does not count. `Ok(false)` means
    /// there is no `.git` or git ran and rejected it; failing to run git at
    /// all is an error, never a verdict on the repository.
    pub fn is_repository(&self) -> Result<bool> {
        let git_dir = self.workdir.join(".git");
        match fs::symlink_metadata(&git_dir) {
            Ok(_) => {}
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(false),
            Err(err) => {
                return Err(err).with_context(|| format!("stat {}", git_dir.display()));
            }
        }
        let out = self.run(&["--git-dir=.git", "rev-parse", "--git-dir"])?;
        if !out.status.success() {
            debug!(
                stderr = %String::from_utf8_lossy(&out.stderr).trim(),
                "git rejected repository"
            );
        }
        Ok(out.status.success())
    }

    /// Return the HEAD commit, or `None` on an unborn branch.
    pub fn head(&self) -> Result<Option<CommitRef>> {
        let args = ["rev-parse", "--verify", "--quiet", "HEAD^{commit}"];
        let out = self.run(&args)?;
        match out.status.code() {
            Some(0) => Ok(Some(String::from_utf8_lossy(&out.stdout).trim().to_string())),
            // --verify --quiet exits 1 without output when HEAD is unborn.
            Some(1) => Ok(None),
            _ => Err(anyhow!(
                "git {} failed: {}",
                args.join(" "),
                String::from_utf8_lossy(&out.stderr).trim()
            )),
        }
    }

    /// Subject line of a commit.
    pub fn commit_subject(&self, commit: &str) -> Result<String> {
        let out = self.run_capture(&["log", "-1", "--format=%s", commit])?;
        Ok(out.trim().to_string())
    }

    /// Get status entries (including untracked) in porcelain format.
    pub fn status_porcelain(&self) -> Result<Vec<StatusEntry>> {
        let out = self.run_capture(&[
            "-c",
            "core.quotepath=false",
            "status",
            "--porcelain=v1",
            "-uall",
        ])?;
        let mut entries = Vec::new();
        for line in out.lines() {
            if line.trim().is_empty() {
                continue;
            }
            entries.push(parse_status_line(line)?);
        }
        Ok(entries)
    }

    /// Create a repository whose unborn HEAD points at `branch`.
    #[instrument(skip_all, fields(branch))]
    pub fn init(&self, branch: &str) -> Result<()> {
        fs::create_dir_all(&self.workdir)
            .with_context(|| format!("create {}", self.workdir.display()))?;
        self.run_checked(&["init", "--quiet"])?;
        self.run_checked(&["symbolic-ref", "HEAD", &format!("refs/heads/{branch}")])?;
        Ok(())
    }

    /// Point `name` at `url`, adding the remote if needed.
    pub fn ensure_remote(&self, name: &str, url: &str) -> Result<()> {
        let existing = self.run_capture(&["remote"])?;
        if existing.lines().any(|line| line.trim() == name) {
            debug!(remote = name, "updating remote url");
            self.run_checked(&["remote", "set-url", name, url])?;
        } else {
            debug!(remote = name, "adding remote");
            self.run_checked(&["remote", "add", name, url])?;
        }
        Ok(())
    }

    /// URL configured for a remote.
    pub fn remote_url(&self, name: &str) -> Result<String> {
        let out = self.run_capture(&["remote", "get-url", name])?;
        Ok(out.trim().to_string())
    }

    /// Drop staged, modified, and untracked changes relative to HEAD.
    #[instrument(skip_all)]
    pub fn discard_changes(&self, head: Option<&str>) -> Result<()> {
        match head {
            Some(_) => {
                self.run_checked(&["reset", "--hard", "--quiet", "HEAD"])?;
            }
            // Unborn branch: nothing to reset to, so just empty the index.
            None => {
                self.run_checked(&["read-tree", "--empty"])?;
            }
        }
        self.run_checked(&["clean", "-f", "-d", "--quiet"])?;
        Ok(())
    }

    /// Stage all changes (respects .gitignore).
    pub fn add_all(&self) -> Result<()> {
        self.run_checked(&["add", "-A"])?;
        Ok(())
    }

    /// Commit staged changes with explicit author and committer identities.
    #[instrument(skip_all)]
    pub fn commit(
        &self,
        message: &str,
        author: &Identity,
        committer: &Identity,
    ) -> Result<CommitRef> {
        let envs = [
            ("GIT_AUTHOR_NAME", author.name.as_str()),
            ("GIT_AUTHOR_EMAIL", author.email.as_str()),
            ("GIT_COMMITTER_NAME", committer.name.as_str()),
            ("GIT_COMMITTER_EMAIL", committer.email.as_str()),
        ];
        self.run_checked_with_env(
            &[
                "-c",
                "commit.gpgsign=false",
                "commit",
                "--quiet",
                "--no-verify",
                "-m",
                message,
            ],
            &envs,
        )?;
        self.head()?
            .ok_or_else(|| anyhow!("HEAD missing right after commit"))
    }

    /// Force-push `branch` to `remote`.
    ///
    /// Credentials are handed to git through `GIT_CONFIG_*` environment
    /// variables as an HTTP basic auth header, keeping them off the command
    /// line and out of the repository config.
    #[instrument(skip_all, fields(remote, branch))]
    pub fn force_push(
        &self,
        remote: &str,
        branch: &str,
        credentials: Option<&Credentials>,
    ) -> Result<()> {
        let refspec = format!("+refs/heads/{branch}:refs/heads/{branch}");
        let mut envs = vec![("GIT_TERMINAL_PROMPT", "0".to_string())];
        if let Some(creds) = credentials {
            let token = BASE64.encode(format!("{}:{}", creds.username, creds.password));
            envs.push(("GIT_CONFIG_COUNT", "1".to_string()));
            envs.push(("GIT_CONFIG_KEY_0", "http.extraHeader".to_string()));
            envs.push(("GIT_CONFIG_VALUE_0", format!("Authorization: Basic {token}")));
        }
        let envs: Vec<(&str, &str)> = envs.iter().map(|(k, v)| (*k, v.as_str())).collect();
        self.run_checked_with_env(&["push", "--quiet", remote, &refspec], &envs)?;
        Ok(())
    }

    fn run_capture(&self, args: &[&str]) -> Result<String> {
        let output = self.run_checked(args)?;
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    fn run_checked(&self, args: &[&str]) -> Result<Output> {
        self.run_checked_with_env(args, &[])
    }

    fn run_checked_with_env(&self, args: &[&str], envs: &[(&str, &str)]) -> Result<Output> {
        let output = self.run_with_env(args, envs)?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!("git {} failed: {}", args.join(" "), stderr.trim()));
        }
        Ok(output)
    }

    fn run(&self, args: &[&str]) -> Result<Output> {
        self.run_with_env(args, &[])
    }

    fn run_with_env(&self, args: &[&str], envs: &[(&str, &str)]) -> Result<Output> {
        Command::new(&self.program)
            .args(args)
            .envs(envs.iter().map(|(k, v)| (OsStr::new(k), OsStr::new(v))))
            .current_dir(&self.workdir)
            .output()
            .with_context(|| format!("spawn {} {}", self.program.display(), args.join(" ")))
    }
}

/// [`Repository`] backed by the `git` CLI.
#[derive(Debug, Clone)]
pub struct GitRepository {
    git: Git,
    remote_url: String,
    branch: String,
}

impl GitRepository {
    pub fn new(
        workdir: impl Into<PathBuf>,
        remote_url: impl Into<String>,
        branch: impl Into<String>,
    ) -> Self {
        Self {
            git: Git::new(workdir),
            remote_url: remote_url.into(),
            branch: branch.into(),
        }
    }

    pub fn from_config(workdir: &Path, git: &GitConfig) -> Self {
        Self::new(workdir, &git.repository, &git.branch)
    }

    /// Run `program` instead of the `git` found on `PATH`.
    pub fn with_git_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.git = Git::with_program(self.git.workdir().to_path_buf(), program);
        self
    }

    pub fn git(&self) -> &Git {
        &self.git
    }

    fn initialize(&self) -> Result<()> {
        info!(
            path = %self.git.workdir().display(),
            remote = %self.remote_url,
            "creating new repository"
        );
        self.git.init(&self.branch)?;
        self.git.ensure_remote(REMOTE_NAME, &self.remote_url)?;
        Ok(())
    }

    fn reset_existing(&self) -> Result<Option<CommitRef>> {
        let head = self.git.head()?;
        match &head {
            Some(commit) => {
                let subject = self.git.commit_subject(commit)?;
                info!(head = %commit, subject = %subject, "resetting local changes");
            }
            None => info!("resetting local changes (no commits yet)"),
        }
        self.git.discard_changes(head.as_deref())?;
        Ok(head)
    }

    /// Remove an unreadable `.git` so the directory can be re-initialized.
    fn discard_broken_repository(&self) -> Result<()> {
        let git_dir = self.git.workdir().join(".git");
        let meta = match fs::symlink_metadata(&git_dir) {
            Ok(meta) => meta,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(()),
            Err(err) => {
                return Err(err).with_context(|| format!("stat {}", git_dir.display()));
            }
        };
        warn!(path = %git_dir.display(), "repository unreadable, discarding it");
        if meta.is_dir() {
            fs::remove_dir_all(&git_dir)
        } else {
            fs::remove_file(&git_dir)
        }
        .with_context(|| format!("remove {}", git_dir.display()))
    }
}

impl Repository for GitRepository {
    #[instrument(skip_all, fields(path = %self.git.workdir().display()))]
    fn reset(&self) -> Result<Option<CommitRef>> {
        // Only a repository git itself rejects is rebuilt. Failing to run git
        // propagates with `.git` untouched.
        if self
            .git
            .is_repository()
            .context("check mirror repository")?
        {
            return self.reset_existing();
        }
        info!("no readable repository at target folder");
        self.discard_broken_repository()?;
        self.initialize()?;
        Ok(None)
    }

    fn status(&self) -> Result<Vec<StatusEntry>> {
        self.git.status_porcelain()
    }

    #[instrument(skip_all, fields(branch = %self.branch))]
    fn commit_and_push(&self, request: &CommitRequest<'_>) -> Result<CommitRef> {
        let parent = self.git.head()?;
        self.git.add_all()?;
        let commit = self
            .git
            .commit(request.message, request.author, request.committer)
            .context("commit mirror changes")?;
        info!(commit = %commit, parent = ?parent, "committed");

        info!(remote = REMOTE_NAME, "pushing");
        if let Err(err) = self
            .git
            .force_push(REMOTE_NAME, &self.branch, request.credentials)
        {
            warn!(commit = %commit, err = %err, "push failed");
            return Err(SyncError::PushFailed {
                commit,
                reason: format!("{err:#}"),
            }
            .into());
        }
        Ok(commit)
    }
}

fn parse_status_line(line: &str) -> Result<StatusEntry> {
    if let Some(path) = line.strip_prefix("?? ") {
        return Ok(StatusEntry {
            code: "??".to_string(),
            path: path.trim().to_string(),
        });
    }
    if line.len() < 4 {
        return Err(anyhow!("unexpected porcelain line: '{line}'"));
    }
    let code = line[..2].to_string();
    let mut path = line[3..].trim().to_string();
    if let Some((_, new)) = path.split_once("->") {
        path = new.trim().to_string();
    }
    Ok(StatusEntry { code, path })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{git_capture, init_bare_remote, test_identity};

    fn repo_at(workdir: &Path, remote: &Path) -> GitRepository {
        GitRepository::new(workdir, remote.display().to_string(), "master")
    }

    fn publish(repo: &GitRepository, message: &str) -> Result<CommitRef> {
        let identity = test_identity();
        repo.commit_and_push(&CommitRequest {
            message,
            author: &identity,
            committer: &identity,
            credentials: None,
        })
    }

    #[test]
    fn parses_untracked_line() {
        let e = parse_status_line("?? sources/Main.java").expect("parse");
        assert_eq!(
            e,
            StatusEntry {
                code: "??".to_string(),
                path: "sources/Main.java".to_string()
            }
        );
    }

    #[test]
    fn parses_modified_line() {
        let e = parse_status_line(" M AndroidManifest.xml").expect("parse");
        assert_eq!(
            e,
            StatusEntry {
                code: " M".to_string(),
                path: "AndroidManifest.xml".to_string()
            }
        );
    }

    #[test]
    fn parses_rename_line_uses_new_path() {
        let e = parse_status_line("R  old.java -> new.java").expect("parse");
        assert_eq!(e.path, "new.java");
    }

    #[test]
    fn reset_initializes_missing_repository_with_origin() {
        let temp = tempfile::tempdir().expect("tempdir");
        let remote = init_bare_remote(temp.path());
        let workdir = temp.path().join("work");
        let repo = repo_at(&workdir, &remote);

        let head = repo.reset().expect("reset");
        assert_eq!(head, None);
        assert!(repo.git().is_repository().expect("is_repository"));
        assert_eq!(
            repo.git().remote_url(REMOTE_NAME).expect("url"),
            remote.display().to_string()
        );
        assert_eq!(
            git_capture(&workdir, &["symbolic-ref", "HEAD"]),
            "refs/heads/master"
        );
    }

    #[test]
    fn reset_discards_untracked_and_modified_files() {
        let temp = tempfile::tempdir().expect("tempdir");
        let remote = init_bare_remote(temp.path());
        let workdir = temp.path().join("work");
        let repo = repo_at(&workdir, &remote);
        repo.reset().expect("init");

        fs::write(workdir.join("kept.txt"), "v1").expect("write");
        let first = publish(&repo, "first").expect("publish");

        fs::write(workdir.join("kept.txt"), "v2").expect("modify");
        fs::write(workdir.join("stray.txt"), "junk").expect("untracked");
        fs::create_dir_all(workdir.join("nested/dir")).expect("mkdir");
        fs::write(workdir.join("nested/dir/file.txt"), "junk").expect("nested");
        assert!(!repo.status().expect("status").is_empty());

        let head = repo.reset().expect("reset");
        assert_eq!(head, Some(first));
        assert!(repo.status().expect("status").is_empty());
        assert_eq!(
            fs::read_to_string(workdir.join("kept.txt")).expect("read"),
            "v1"
        );
        assert!(!workdir.join("nested").exists());
    }

    #[test]
    fn reset_on_unborn_branch_leaves_clean_status() {
        let temp = tempfile::tempdir().expect("tempdir");
        let remote = init_bare_remote(temp.path());
        let workdir = temp.path().join("work");
        let repo = repo_at(&workdir, &remote);
        repo.reset().expect("init");

        fs::write(workdir.join("staged.txt"), "x").expect("write");
        repo.git().add_all().expect("add");

        assert_eq!(repo.reset().expect("reset"), None);
        assert!(repo.status().expect("status").is_empty());
    }

    #[test]
    fn reset_reinitializes_corrupt_repository() {
        let temp = tempfile::tempdir().expect("tempdir");
        let remote = init_bare_remote(temp.path());
        let workdir = temp.path().join("work");
        fs::create_dir_all(workdir.join(".git")).expect("mkdir");
        fs::write(workdir.join(".git/HEAD"), "garbage").expect("corrupt");
        let repo = repo_at(&workdir, &remote);

        assert_eq!(repo.reset().expect("reset"), None);
        assert!(repo.git().is_repository().expect("is_repository"));
        assert!(repo.status().expect("status").is_empty());
    }

    #[test]
    fn reset_keeps_history_when_git_cannot_be_spawned() {
        let temp = tempfile::tempdir().expect("tempdir");
        let remote = init_bare_remote(temp.path());
        let workdir = temp.path().join("work");
        let repo = repo_at(&workdir, &remote);
        repo.reset().expect("init");
        fs::write(workdir.join("a.txt"), "a").expect("write");
        let first = publish(&repo, "first").expect("publish");

        let broken =
            repo_at(&workdir, &remote).with_git_program(temp.path().join("no-git-here"));
        let err = broken.reset().unwrap_err();

        assert!(format!("{err:#}").contains("no-git-here"), "{err:#}");
        assert!(workdir.join(".git").is_dir());
        assert_eq!(repo.git().head().expect("head"), Some(first));
    }

    #[cfg(unix)]
    #[test]
    fn reset_surfaces_failures_of_a_readable_repository() {
        use std::os::unix::fs::PermissionsExt;

        let temp = tempfile::tempdir().expect("tempdir");
        let remote = init_bare_remote(temp.path());
        let workdir = temp.path().join("work");
        let repo = repo_at(&workdir, &remote);
        repo.reset().expect("init");
        fs::write(workdir.join("a.txt"), "a").expect("write");
        let first = publish(&repo, "first").expect("publish");

        // Accepts the repository, then fails every other command.
        let flaky = temp.path().join("flaky-git");
        fs::write(
            &flaky,
            "#!/bin/sh\ncase \"$*\" in\n  *\"rev-parse --git-dir\"*) echo .git; exit 0 ;;\nesac\necho 'fatal: Too many open files' 1>&2\nexit 128\n",
        )
        .expect("write script");
        fs::set_permissions(&flaky, fs::Permissions::from_mode(0o755)).expect("chmod");

        let err = repo_at(&workdir, &remote)
            .with_git_program(&flaky)
            .reset()
            .unwrap_err();

        assert!(format!("{err:#}").contains("Too many open files"), "{err:#}");
        assert_eq!(repo.git().head().expect("head"), Some(first));
        assert_eq!(git_capture(&workdir, &["rev-list", "--count", "HEAD"]), "1");
    }

    #[test]
    fn head_is_none_on_unborn_branch() {
        let temp = tempfile::tempdir().expect("tempdir");
        let remote = init_bare_remote(temp.path());
        let workdir = temp.path().join("work");
        let repo = repo_at(&workdir, &remote);
        repo.reset().expect("init");
        assert_eq!(repo.git().head().expect("head"), None);
    }

    #[test]
    fn first_commit_has_no_parent_and_reaches_remote() {
        let temp = tempfile::tempdir().expect("tempdir");
        let remote = init_bare_remote(temp.path());
        let workdir = temp.path().join("work");
        let repo = repo_at(&workdir, &remote);
        repo.reset().expect("init");

        fs::write(workdir.join("a.txt"), "a").expect("write");
        let commit = publish(&repo, "Updated to version 1 (1.0)").expect("publish");

        assert_eq!(git_capture(&workdir, &["rev-list", "--count", "HEAD"]), "1");
        assert_eq!(
            git_capture(&workdir, &["log", "-1", "--format=%P"]),
            "",
            "first commit must have no parent"
        );
        assert_eq!(
            git_capture(&remote, &["rev-parse", "refs/heads/master"]),
            commit
        );
        assert_eq!(
            git_capture(&workdir, &["log", "-1", "--format=%an <%ae> / %cn <%ce>"]),
            "Mirror Test <mirror@example.com> / Mirror Test <mirror@example.com>"
        );
    }

    #[test]
    fn second_commit_parents_previous_head() {
        let temp = tempfile::tempdir().expect("tempdir");
        let remote = init_bare_remote(temp.path());
        let workdir = temp.path().join("work");
        let repo = repo_at(&workdir, &remote);
        repo.reset().expect("init");

        fs::write(workdir.join("a.txt"), "a").expect("write");
        let first = publish(&repo, "first").expect("first");
        fs::write(workdir.join("a.txt"), "b").expect("write");
        publish(&repo, "second").expect("second");

        assert_eq!(git_capture(&workdir, &["log", "-1", "--format=%P"]), first);
    }

    #[test]
    fn push_failure_keeps_local_commit() {
        let temp = tempfile::tempdir().expect("tempdir");
        let workdir = temp.path().join("work");
        let repo = repo_at(&workdir, &temp.path().join("no-such-remote.git"));
        repo.reset().expect("init");

        fs::write(workdir.join("a.txt"), "a").expect("write");
        let err = publish(&repo, "first").unwrap_err();

        let Some(SyncError::PushFailed { commit, .. }) = err.downcast_ref::<SyncError>() else {
            panic!("expected push failure, got {err:#}");
        };
        assert_eq!(
            repo.git().head().expect("head").as_deref(),
            Some(commit.as_str())
        );
        assert!(repo.status().expect("status").is_empty());
    }
}
