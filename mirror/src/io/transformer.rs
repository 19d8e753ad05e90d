//! Transformer abstraction for decompiling the artifact.
//!
//! [`JadxTransformer`] invokes the jadx decompiler as a subprocess. Its output
//! is appended to a log file for post-mortem diagnosis, and its exit status is
//! inspected: a failed decompile aborts the run instead of surfacing later as
//! a confusing manifest error.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, info, instrument, warn};

use super::config::MirrorConfig;
use super::process::{RunOptions, append_log_line, run_command};
use crate::error::SyncError;

/// Abstraction over decompiler backends.
pub trait Transformer {
    /// Decompile `artifact` into `output_dir`.
    fn transform(&self, artifact: &Path, output_dir: &Path) -> Result<()>;
}

/// Transformer that spawns jadx.
#[derive(Debug, Clone)]
pub struct JadxTransformer {
    pub executable: PathBuf,
    pub log_path: PathBuf,
    pub timeout: Duration,
    pub output_limit_bytes: usize,
}

impl JadxTransformer {
    pub fn from_config(config: &MirrorConfig) -> Self {
        let transform = &config.transform;
        Self {
            executable: transform.executable.clone(),
            log_path: transform.log_file.clone(),
            timeout: transform.timeout(),
            output_limit_bytes: transform.output_limit_bytes,
        }
    }

    /// jadx arguments: no debug info, resources into `output_dir`, sources
    /// into `output_dir/java`.
    pub fn args(artifact: &Path, output_dir: &Path) -> Vec<PathBuf> {
        vec![
            PathBuf::from("--no-debug-info"),
            PathBuf::from("-dr"),
            output_dir.to_path_buf(),
            PathBuf::from("-ds"),
            output_dir.join("java"),
            artifact.to_path_buf(),
        ]
    }
}

impl Transformer for JadxTransformer {
    #[instrument(skip_all, fields(timeout_secs = self.timeout.as_secs()))]
    fn transform(&self, artifact: &Path, output_dir: &Path) -> Result<()> {
        info!(
            artifact = %artifact.display(),
            output = %output_dir.display(),
            "decompiling"
        );
        let args = Self::args(artifact, output_dir);
        append_log_line(
            &self.log_path,
            &format!(
                "=== {} {} ===",
                self.executable.display(),
                args.iter()
                    .map(|a| a.display().to_string())
                    .collect::<Vec<_>>()
                    .join(" ")
            ),
        )?;

        let mut cmd = Command::new(&self.executable);
        cmd.args(&args);
        let output = run_command(
            cmd,
            &RunOptions {
                timeout: self.timeout,
                output_limit_bytes: self.output_limit_bytes,
                log_path: Some(&self.log_path),
            },
        )
        .with_context(|| format!("run {}", self.executable.display()))?;

        if !output.succeeded() {
            warn!(
                exit_code = ?output.status.code(),
                timed_out = output.timed_out,
                log = %self.log_path.display(),
                "decompiler failed"
            );
            return Err(SyncError::TransformFailed {
                exit_code: output.status.code(),
                timed_out: output.timed_out,
            })
            .with_context(|| format!("see {}", self.log_path.display()));
        }

        debug!("decompiler completed successfully");
        info!("decompiled");
        Ok(())
    }
}
