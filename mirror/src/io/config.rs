//! Mirror configuration loaded from a TOML file (default `mirror.toml`).
//!
//! The configuration is assembled once at startup and passed by reference to
//! every component. Relative paths are resolved against the directory holding
//! the config file, so scheduled runs behave the same from any cwd.

use std::fs;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::credentials::{CredentialProvider, EnvCredentials, StaticCredentials};

pub const DEFAULT_CONFIG_PATH: &str = "mirror.toml";

/// Top-level mirror configuration (TOML).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MirrorConfig {
    /// Identifies which remote artifact to fetch (e.g. `com.example.app`).
    pub package_name: String,
    /// Working directory of the mirror repository.
    pub target_folder: PathBuf,
    /// Plain-text file holding the last published version code.
    #[serde(default = "default_version_file")]
    pub version_file: PathBuf,
    /// Scratch directory the acquirer downloads into. Cleared on every run.
    #[serde(default = "default_scratch_dir")]
    pub scratch_dir: PathBuf,
    #[serde(default)]
    pub acquire: AcquireConfig,
    #[serde(default)]
    pub transform: TransformConfig,
    pub git: GitConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AcquireConfig {
    /// Fetch command; each argument is a template over `package`, `url`, `dir`.
    pub command: Vec<String>,
    /// Download page template over `package`.
    pub url: String,
    /// Budget for the fetch command itself.
    pub timeout_secs: u64,
    /// How long to wait for the download to land after the command returns.
    pub settle_timeout_secs: u64,
    /// Interval between scratch directory polls.
    pub poll_interval_ms: u64,
    /// Truncate captured command output beyond this many bytes.
    pub output_limit_bytes: usize,
}

impl Default for AcquireConfig {
    fn default() -> Self {
        Self {
            command: vec![
                "node".to_string(),
                "fetch.js".to_string(),
                "{{ url }}".to_string(),
                "{{ dir }}".to_string(),
            ],
            url: "https://apkcombo.com/en-sk/apk-downloader/?q={{ package }}".to_string(),
            timeout_secs: 5 * 60,
            settle_timeout_secs: 2 * 60,
            poll_interval_ms: 500,
            output_limit_bytes: 100_000,
        }
    }
}

impl AcquireConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn settle_timeout(&self) -> Duration {
        Duration::from_secs(self.settle_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TransformConfig {
    /// Decompiler executable.
    pub executable: PathBuf,
    /// Decompiler stdout/stderr are appended here.
    pub log_file: PathBuf,
    pub timeout_secs: u64,
    pub output_limit_bytes: usize,
    /// Manifest file name inside the decompiled tree.
    pub manifest_file: String,
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self {
            executable: PathBuf::from("jadx/bin/jadx"),
            log_file: PathBuf::from("jadx.log"),
            timeout_secs: 30 * 60,
            output_limit_bytes: 100_000,
            manifest_file: "AndroidManifest.xml".to_string(),
        }
    }
}

impl TransformConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GitConfig {
    /// Remote URL registered as `origin` when the repository is created.
    pub repository: String,
    /// Branch committed to and force-pushed.
    #[serde(default = "default_branch")]
    pub branch: String,
    pub author: Identity,
    pub committer: Identity,
    #[serde(default)]
    pub credentials: CredentialsConfig,
}

/// Name/email pair used for commit signatures.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Identity {
    pub name: String,
    pub email: String,
}

/// Where push credentials come from.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(tag = "source", rename_all = "lowercase")]
pub enum CredentialsConfig {
    /// No credentials (local or pre-authenticated remotes).
    #[default]
    None,
    /// Plaintext pair stored in the config file.
    Plain { username: String, password: String },
    /// Pair read from environment variables at push time.
    Env {
        username_var: String,
        password_var: String,
    },
}

impl std::fmt::Debug for CredentialsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CredentialsConfig::None => f.write_str("None"),
            CredentialsConfig::Plain { username, .. } => f
                .debug_struct("Plain")
                .field("username", username)
                .field("password", &"<redacted>")
                .finish(),
            CredentialsConfig::Env {
                username_var,
                password_var,
            } => f
                .debug_struct("Env")
                .field("username_var", username_var)
                .field("password_var", password_var)
                .finish(),
        }
    }
}

impl CredentialsConfig {
    /// Build the provider consulted by the publish stage.
    pub fn provider(&self) -> Box<dyn CredentialProvider> {
        match self {
            CredentialsConfig::None => Box::new(StaticCredentials::none()),
            CredentialsConfig::Plain { username, password } => {
                Box::new(StaticCredentials::new(username, password))
            }
            CredentialsConfig::Env {
                username_var,
                password_var,
            } => Box::new(EnvCredentials::new(username_var, password_var)),
        }
    }
}

fn default_version_file() -> PathBuf {
    PathBuf::from("version.txt")
}

fn default_scratch_dir() -> PathBuf {
    PathBuf::from("downloaded")
}

fn default_branch() -> String {
    "master".to_string()
}

impl MirrorConfig {
    /// Starter config written by `apk-mirror init`.
    pub fn template() -> Self {
        let bot = Identity {
            name: "Mirror Bot".to_string(),
            email: "mirror-bot@example.com".to_string(),
        };
        Self {
            package_name: "com.example.app".to_string(),
            target_folder: PathBuf::from("mirror"),
            version_file: default_version_file(),
            scratch_dir: default_scratch_dir(),
            acquire: AcquireConfig::default(),
            transform: TransformConfig::default(),
            git: GitConfig {
                repository: "https://git.example.com/mirror/com.example.app.git".to_string(),
                branch: default_branch(),
                author: bot.clone(),
                committer: bot,
                credentials: CredentialsConfig::Env {
                    username_var: "MIRROR_GIT_USERNAME".to_string(),
                    password_var: "MIRROR_GIT_PASSWORD".to_string(),
                },
            },
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.package_name.trim().is_empty() {
            return Err(anyhow!("package_name must be non-empty"));
        }
        if self.git.repository.trim().is_empty() {
            return Err(anyhow!("git.repository must be non-empty"));
        }
        if self.git.branch.trim().is_empty() {
            return Err(anyhow!("git.branch must be non-empty"));
        }
        for (label, identity) in [
            ("git.author", &self.git.author),
            ("git.committer", &self.git.committer),
        ] {
            if identity.name.trim().is_empty() || identity.email.trim().is_empty() {
                return Err(anyhow!("{label} needs both name and email"));
            }
        }
        if self.acquire.command.is_empty() || self.acquire.command[0].trim().is_empty() {
            return Err(anyhow!("acquire.command must be a non-empty array"));
        }
        if self.acquire.timeout_secs == 0 || self.transform.timeout_secs == 0 {
            return Err(anyhow!("acquire.timeout_secs and transform.timeout_secs must be > 0"));
        }
        if self.acquire.poll_interval_ms == 0 {
            return Err(anyhow!("acquire.poll_interval_ms must be > 0"));
        }
        if self.acquire.output_limit_bytes == 0 || self.transform.output_limit_bytes == 0 {
            return Err(anyhow!("output_limit_bytes must be > 0"));
        }
        if self.transform.manifest_file.trim().is_empty() {
            return Err(anyhow!("transform.manifest_file must be non-empty"));
        }
        // The target folder is wiped before every transform and cleaned on
        // reset; the scratch directory is removed at the start of every run.
        let target = normalize(&self.target_folder);
        let scratch = normalize(&self.scratch_dir);
        for (label, path) in [
            ("version_file", &self.version_file),
            ("scratch_dir", &self.scratch_dir),
            ("transform.log_file", &self.transform.log_file),
        ] {
            if normalize(path).starts_with(&target) {
                return Err(anyhow!(
                    "{label} ({}) must live outside target_folder ({})",
                    path.display(),
                    self.target_folder.display()
                ));
            }
        }
        for (label, path) in [
            ("target_folder", &self.target_folder),
            ("version_file", &self.version_file),
            ("transform.log_file", &self.transform.log_file),
        ] {
            if normalize(path).starts_with(&scratch) {
                return Err(anyhow!(
                    "{label} ({}) must live outside scratch_dir ({})",
                    path.display(),
                    self.scratch_dir.display()
                ));
            }
        }
        Ok(())
    }

    /// Reject a scratch directory that would take `config_dir` with it.
    pub fn validate_config_dir(&self, config_dir: &Path) -> Result<()> {
        if normalize(config_dir).starts_with(normalize(&self.scratch_dir)) {
            return Err(anyhow!(
                "scratch_dir ({}) must not contain the config directory ({})",
                self.scratch_dir.display(),
                config_dir.display()
            ));
        }
        Ok(())
    }

    /// Make every relative path absolute with respect to `base`.
    pub fn resolve_paths(&mut self, base: &Path) {
        for path in [
            &mut self.target_folder,
            &mut self.version_file,
            &mut self.scratch_dir,
            &mut self.transform.log_file,
        ] {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        }
        // Bare program names (no separator) are left for PATH lookup.
        let exe = &mut self.transform.executable;
        if exe.is_relative() && exe.components().count() > 1 {
            *exe = base.join(&*exe);
        }
    }
}

/// Load, resolve, and validate config from a TOML file.
pub fn load_config(path: &Path) -> Result<MirrorConfig> {
    debug!(path = %path.display(), "loading config");
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let mut cfg: MirrorConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    let base = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    cfg.resolve_paths(&base);
    cfg.validate()
        .and_then(|()| cfg.validate_config_dir(&base))
        .with_context(|| format!("invalid config {}", path.display()))?;
    info!(
        package = %cfg.package_name,
        target = %cfg.target_folder.display(),
        remote = %cfg.git.repository,
        "config loaded"
    );
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &MirrorConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

/// Resolve `.` and `..` lexically so containment checks see through them.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match out.components().next_back() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                Some(Component::RootDir | Component::Prefix(_)) => {}
                _ => out.push(".."),
            },
            other => out.push(other.as_os_str()),
        }
    }
    out
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
