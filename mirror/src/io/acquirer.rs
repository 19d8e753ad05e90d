//! Acquirer abstraction for fetching the artifact.
//!
//! The [`Acquirer`] trait decouples the pipeline from how a download is
//! obtained. [`CommandAcquirer`] runs a configurable external fetcher (for
//! example a headless-browser script) and then waits for an explicit
//! completion condition in the download directory instead of sleeping for a
//! fixed time. Tests use scripted acquirers that just write files.

use std::fs;
use std::path::Path;
use std::process::Command;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use minijinja::{Environment, UndefinedBehavior, context};
use tracing::{debug, info, instrument, warn};

use super::config::MirrorConfig;
use super::process::{RunOptions, run_command};

/// Suffixes browsers and download tools use for in-flight files.
const PARTIAL_SUFFIXES: [&str; 5] = [".crdownload", ".part", ".partial", ".download", ".tmp"];

/// Abstraction over artifact download backends.
pub trait Acquirer {
    /// Deposit the downloaded artifact into `target_dir`.
    ///
    /// The caller checks that exactly one file ended up there.
    fn fetch(&self, target_dir: &Path) -> Result<()>;
}

/// Acquirer that spawns an external fetch command.
#[derive(Debug, Clone)]
pub struct CommandAcquirer {
    /// Argument templates; rendered with `package`, `url`, and `dir`.
    pub command: Vec<String>,
    pub package: String,
    /// Download page template; rendered with `package`.
    pub url: String,
    pub timeout: Duration,
    pub settle_timeout: Duration,
    pub poll_interval: Duration,
    pub output_limit_bytes: usize,
}

impl CommandAcquirer {
    pub fn from_config(config: &MirrorConfig) -> Self {
        let acquire = &config.acquire;
        Self {
            command: acquire.command.clone(),
            package: config.package_name.clone(),
            url: acquire.url.clone(),
            timeout: acquire.timeout(),
            settle_timeout: acquire.settle_timeout(),
            poll_interval: acquire.poll_interval(),
            output_limit_bytes: acquire.output_limit_bytes,
        }
    }

    /// Render the command line for a given download directory.
    pub fn render_command(&self, target_dir: &Path) -> Result<Vec<String>> {
        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Strict);

        let url = env
            .render_str(&self.url, context! { package => &self.package })
            .with_context(|| format!("render acquire url template '{}'", self.url))?;
        let dir = target_dir.display().to_string();
        self.command
            .iter()
            .map(|arg| {
                env.render_str(arg, context! { package => &self.package, url => &url, dir => &dir })
                    .with_context(|| format!("render acquire argument '{arg}'"))
            })
            .collect()
    }
}

impl Acquirer for CommandAcquirer {
    #[instrument(skip_all, fields(package = %self.package, timeout_secs = self.timeout.as_secs()))]
    fn fetch(&self, target_dir: &Path) -> Result<()> {
        let argv = self.render_command(target_dir)?;
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| anyhow!("acquire command is empty"))?;
        info!(program = %program, "starting download");

        let mut cmd = Command::new(program);
        cmd.args(args);
        let output = run_command(
            cmd,
            &RunOptions {
                timeout: self.timeout,
                output_limit_bytes: self.output_limit_bytes,
                log_path: None,
            },
        )
        .context("run acquire command")?;

        if output.timed_out {
            return Err(anyhow!("acquire command timed out after {:?}", self.timeout));
        }
        if !output.status.success() {
            warn!(exit_code = ?output.status.code(), "acquire command failed");
            return Err(anyhow!(
                "acquire command failed with status {:?}: {}",
                output.status.code(),
                output.stderr_tail()
            ));
        }

        wait_for_download(target_dir, self.settle_timeout, self.poll_interval)
    }
}

/// Wait until `dir` holds at least one finished download.
///
/// Finished means: no entry carries a partial-download suffix and the set of
/// names and sizes is unchanged across two consecutive polls. Returning with an
/// empty directory at the deadline is not an error here; the orchestrator
/// reports the missing artifact. A download still in flight at the deadline is.
pub fn wait_for_download(dir: &Path, settle_timeout: Duration, poll_interval: Duration) -> Result<()> {
    let deadline = Instant::now() + settle_timeout;
    let mut previous: Option<Vec<(String, u64)>> = None;

    loop {
        let snapshot = snapshot_dir(dir)?;
        let in_flight = snapshot.iter().any(|(name, _)| is_partial(name));

        if !snapshot.is_empty() && !in_flight && previous.as_ref() == Some(&snapshot) {
            debug!(files = snapshot.len(), "download settled");
            return Ok(());
        }

        if Instant::now() >= deadline {
            if in_flight {
                return Err(anyhow!(
                    "download still in progress after {:?} in {}",
                    settle_timeout,
                    dir.display()
                ));
            }
            warn!(files = snapshot.len(), "download did not settle before deadline");
            return Ok(());
        }

        previous = Some(snapshot);
        thread::sleep(poll_interval);
    }
}

fn snapshot_dir(dir: &Path) -> Result<Vec<(String, u64)>> {
    let mut entries = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("read {}", dir.display()))? {
        let entry = entry.with_context(|| format!("read entry in {}", dir.display()))?;
        let len = entry.metadata().map(|m| m.len()).unwrap_or(0);
        entries.push((entry.file_name().to_string_lossy().into_owned(), len));
    }
    entries.sort();
    Ok(entries)
}

fn is_partial(name: &str) -> bool {
    PARTIAL_SUFFIXES.iter().any(|suffix| name.ends_with(suffix))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn acquirer(command: &[&str]) -> CommandAcquirer {
        CommandAcquirer {
            command: command.iter().map(|s| s.to_string()).collect(),
            package: "com.example.app".to_string(),
            url: "https://downloads.example.com/?q={{ package }}".to_string(),
            timeout: Duration::from_secs(10),
            settle_timeout: Duration::from_secs(2),
            poll_interval: Duration::from_millis(20),
            output_limit_bytes: 1024,
        }
    }

    #[test]
    fn renders_package_url_and_dir() {
        let acq = acquirer(&["fetch", "{{ url }}", "--out={{ dir }}", "{{ package }}"]);
        let argv = acq.render_command(Path::new("/tmp/downloaded")).expect("render");
        assert_eq!(
            argv,
            vec![
                "fetch",
                "https://downloads.example.com/?q=com.example.app",
                "--out=/tmp/downloaded",
                "com.example.app",
            ]
        );
    }

    #[test]
    fn unknown_template_variable_is_an_error() {
        let acq = acquirer(&["fetch", "{{ nope }}"]);
        assert!(acq.render_command(Path::new("/tmp")).is_err());
    }

    #[test]
    fn partial_suffixes_are_detected() {
        assert!(is_partial("app.apk.crdownload"));
        assert!(is_partial("app.apk.part"));
        assert!(!is_partial("app.apk"));
    }

    #[test]
    fn wait_returns_once_file_is_stable() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::write(temp.path().join("app.apk"), "data").expect("write");
        wait_for_download(temp.path(), Duration::from_secs(2), Duration::from_millis(10))
            .expect("settled");
    }

    #[test]
    fn wait_gives_up_quietly_on_empty_dir() {
        let temp = tempfile::tempdir().expect("tempdir");
        wait_for_download(temp.path(), Duration::from_millis(50), Duration::from_millis(10))
            .expect("empty is left to the caller");
    }

    #[test]
    fn wait_fails_when_download_stays_partial() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::write(temp.path().join("app.apk.crdownload"), "half").expect("write");
        let err = wait_for_download(temp.path(), Duration::from_millis(50), Duration::from_millis(10))
            .unwrap_err();
        assert!(err.to_string().contains("still in progress"));
    }

    #[cfg(unix)]
    #[test]
    fn command_acquirer_runs_fetcher_into_dir() {
        let temp = tempfile::tempdir().expect("tempdir");
        let acq = acquirer(&[
            "sh",
            "-c",
            "printf '%s' \"$1\" > \"$2/download.apk\"",
            "sh",
            "{{ url }}",
            "{{ dir }}",
        ]);
        acq.fetch(temp.path()).expect("fetch");
        let body = fs::read_to_string(temp.path().join("download.apk")).expect("read");
        assert_eq!(body, "https://downloads.example.com/?q=com.example.app");
    }

    #[cfg(unix)]
    #[test]
    fn command_acquirer_surfaces_failure() {
        let temp = tempfile::tempdir().expect("tempdir");
        let acq = acquirer(&["sh", "-c", "echo blocked by captcha 1>&2; exit 4"]);
        let err = acq.fetch(temp.path()).unwrap_err();
        assert!(err.to_string().contains("blocked by captcha"));
    }
}
