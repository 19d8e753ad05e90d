//! Helpers for running external tools with timeouts and bounded output.
//!
//! Both the acquire command and the decompiler go through [`run_command`].
//! Output is drained concurrently while the child runs so a chatty tool can
//! never deadlock on a full pipe. On Unix the child leads its own process
//! group; a timeout kills the whole group, so helpers it spawned (a headless
//! browser, a JVM) cannot keep the run alive by holding the pipes open.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

/// How long readers may keep draining after the child has exited.
const READER_GRACE: Duration = Duration::from_secs(2);
const READER_POLL: Duration = Duration::from_millis(20);

/// Log sink shared by the stdout and stderr reader threads.
type SharedLog = Arc<Option<Mutex<BufWriter<File>>>>;

/// Bytes kept from one stream so far. Readable even if its reader never ends.
#[derive(Debug, Default)]
struct Capture {
    bytes: Vec<u8>,
    truncated: usize,
}

type SharedCapture = Arc<Mutex<Capture>>;

/// Limits and sinks for a single child process.
#[derive(Debug, Clone, Copy)]
pub struct RunOptions<'a> {
    /// Wall-clock budget; the child is killed when it runs longer.
    pub timeout: Duration,
    /// Bytes of stdout/stderr kept in memory per stream.
    pub output_limit_bytes: usize,
    /// When set, every output line from both streams is appended here.
    pub log_path: Option<&'a Path>,
}

/// Captured child process output.
#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub stdout_truncated: usize,
    pub stderr_truncated: usize,
    pub timed_out: bool,
}

impl CommandOutput {
    /// True when the child exited zero within its budget.
    pub fn succeeded(&self) -> bool {
        !self.timed_out && self.status.success()
    }

    /// Last non-empty stderr line, for short error messages.
    pub fn stderr_tail(&self) -> String {
        String::from_utf8_lossy(&self.stderr)
            .lines()
            .rev()
            .find(|line| !line.trim().is_empty())
            .unwrap_or_default()
            .trim()
            .to_string()
    }
}

/// Run `cmd` to completion (or timeout) and capture its output.
///
/// stdin is closed. If `options.log_path` is set the file is opened in append
/// mode and receives each line as soon as it is read.
///
/// Returns at most `READER_GRACE` after the child exits or is killed, even
/// when a descendant outside the killed group still holds a pipe; output read
/// up to that point is kept.
#[instrument(skip_all, fields(timeout_secs = options.timeout.as_secs(), logging = options.log_path.is_some()))]
pub fn run_command(mut cmd: Command, options: &RunOptions<'_>) -> Result<CommandOutput> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }

    let log: SharedLog = Arc::new(match options.log_path {
        Some(path) => Some(Mutex::new(open_append(path)?)),
        None => None,
    });

    debug!(program = ?cmd.get_program(), "spawning child process");
    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            error!(err = %e, program = ?cmd.get_program(), "failed to spawn command");
            return Err(e).with_context(|| format!("spawn {:?}", cmd.get_program()));
        }
    };

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;

    let limit = options.output_limit_bytes;
    let stdout_capture = SharedCapture::default();
    let stderr_capture = SharedCapture::default();
    let stdout_handle = {
        let (capture, log) = (Arc::clone(&stdout_capture), Arc::clone(&log));
        thread::spawn(move || read_lines_limited(stdout, limit, &capture, &log))
    };
    let stderr_handle = {
        let (capture, log) = (Arc::clone(&stderr_capture), Arc::clone(&log));
        thread::spawn(move || read_lines_limited(stderr, limit, &capture, &log))
    };

    let mut timed_out = false;
    let status = match child
        .wait_timeout(options.timeout)
        .context("wait for command")?
    {
        Some(status) => status,
        None => {
            warn!(
                timeout_secs = options.timeout.as_secs(),
                "command timed out, killing"
            );
            timed_out = true;
            kill_process_group(&mut child)?;
            child.wait().context("wait command after kill")?
        }
    };

    let deadline = Instant::now() + READER_GRACE;
    let (stdout, stdout_truncated) =
        collect_output(stdout_handle, &stdout_capture, deadline, "stdout")?;
    let (stderr, stderr_truncated) =
        collect_output(stderr_handle, &stderr_capture, deadline, "stderr")?;

    if let Some(mutex) = log.as_ref()
        && let Ok(mut writer) = mutex.lock()
    {
        writer.flush().context("flush command log")?;
    }

    if stdout_truncated > 0 || stderr_truncated > 0 {
        warn!(stdout_truncated, stderr_truncated, "output truncated");
    }

    debug!(exit_code = ?status.code(), timed_out, "command finished");
    Ok(CommandOutput {
        status,
        stdout,
        stderr,
        stdout_truncated,
        stderr_truncated,
        timed_out,
    })
}

/// Append a free-form line to a command log (e.g. a run header).
pub fn append_log_line(path: &Path, line: &str) -> Result<()> {
    let mut writer = open_append(path)?;
    writeln!(writer, "{line}").with_context(|| format!("write {}", path.display()))?;
    writer
        .flush()
        .with_context(|| format!("flush {}", path.display()))?;
    Ok(())
}

fn open_append(path: &Path) -> Result<BufWriter<File>> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create log dir {}", parent.display()))?;
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("open log {}", path.display()))?;
    Ok(BufWriter::new(file))
}

/// Kill the child and every process in its group.
#[cfg(unix)]
fn kill_process_group(child: &mut Child) -> Result<()> {
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    let pgid = i32::try_from(child.id()).context("child pid out of range")?;
    if let Err(errno) = killpg(Pid::from_raw(pgid), Signal::SIGKILL) {
        warn!(err = %errno, pgid, "cannot kill process group, killing child only");
        child.kill().context("kill command")?;
    }
    Ok(())
}

#[cfg(not(unix))]
fn kill_process_group(child: &mut Child) -> Result<()> {
    child.kill().context("kill command")
}

/// Wait for a reader until `deadline`, then take whatever it captured.
///
/// A reader still blocked at the deadline is left detached.
fn collect_output(
    handle: thread::JoinHandle<Result<()>>,
    capture: &SharedCapture,
    deadline: Instant,
    stream: &str,
) -> Result<(Vec<u8>, usize)> {
    while !handle.is_finished() && Instant::now() < deadline {
        thread::sleep(READER_POLL);
    }
    if handle.is_finished() {
        match handle.join() {
            Ok(result) => result.with_context(|| format!("read {stream}"))?,
            Err(_) => return Err(anyhow!("{stream} reader thread panicked")),
        }
    } else {
        warn!(stream, "pipe still held open after child exited, abandoning reader");
    }

    let mut capture = capture
        .lock()
        .map_err(|_| anyhow!("{stream} capture lock poisoned"))?;
    Ok((std::mem::take(&mut capture.bytes), capture.truncated))
}

/// Read a stream line by line into `capture`, keeping at most `limit` bytes,
/// and tee every line into the shared log.
fn read_lines_limited<R: Read>(
    reader: R,
    limit: usize,
    capture: &SharedCapture,
    log: &SharedLog,
) -> Result<()> {
    let mut buf_reader = BufReader::new(reader);

    loop {
        let mut line = Vec::new();
        let n = buf_reader
            .read_until(b'\n', &mut line)
            .context("read line")?;
        if n == 0 {
            break;
        }

        if let Some(mutex) = log.as_ref()
            && let Ok(mut writer) = mutex.lock()
            && let Err(e) = writer.write_all(&line)
        {
            warn!(err = %e, "failed to write to command log");
        }

        let mut kept = capture
            .lock()
            .map_err(|_| anyhow!("capture lock poisoned"))?;
        let keep = n.min(limit.saturating_sub(kept.bytes.len()));
        kept.bytes.extend_from_slice(&line[..keep]);
        kept.truncated += n - keep;
    }

    Ok(())
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(script);
        cmd
    }

    #[test]
    fn captures_both_streams_and_appends_to_log() {
        let temp = tempfile::tempdir().expect("tempdir");
        let log_path = temp.path().join("logs/tool.log");
        append_log_line(&log_path, "=== header ===").expect("header");

        let options = RunOptions {
            timeout: Duration::from_secs(10),
            output_limit_bytes: 1024,
            log_path: Some(&log_path),
        };
        let output = run_command(sh("echo out; echo err 1>&2"), &options).expect("run");

        assert!(output.succeeded());
        assert_eq!(output.stdout, b"out\n");
        assert_eq!(output.stderr_tail(), "err");
        let log = std::fs::read_to_string(&log_path).expect("read log");
        assert!(log.starts_with("=== header ===\n"));
        assert!(log.contains("out\n"));
        assert!(log.contains("err\n"));
    }

    #[test]
    fn truncates_output_beyond_limit() {
        let options = RunOptions {
            timeout: Duration::from_secs(10),
            output_limit_bytes: 4,
            log_path: None,
        };
        let output = run_command(sh("printf 'abcdefgh'"), &options).expect("run");
        assert_eq!(output.stdout, b"abcd");
        assert_eq!(output.stdout_truncated, 4);
    }

    #[test]
    fn reports_non_zero_exit() {
        let options = RunOptions {
            timeout: Duration::from_secs(10),
            output_limit_bytes: 1024,
            log_path: None,
        };
        let output = run_command(sh("exit 3"), &options).expect("run");
        assert!(!output.succeeded());
        assert_eq!(output.status.code(), Some(3));
    }

    #[test]
    fn kills_command_after_timeout() {
        let options = RunOptions {
            timeout: Duration::from_millis(200),
            output_limit_bytes: 1024,
            log_path: None,
        };
        let output = run_command(sh("exec sleep 5"), &options).expect("run");
        assert!(output.timed_out);
        assert!(!output.succeeded());
    }

    #[test]
    fn timeout_kills_grandchildren_holding_the_pipes() {
        let options = RunOptions {
            timeout: Duration::from_millis(200),
            output_limit_bytes: 1024,
            log_path: None,
        };
        let start = Instant::now();
        let output = run_command(sh("sleep 4; echo done"), &options).expect("run");
        let elapsed = start.elapsed();

        assert!(output.timed_out);
        assert!(elapsed < Duration::from_secs(2), "returned after {elapsed:?}");
        assert!(output.stdout.is_empty());
    }

    #[test]
    fn background_process_does_not_hold_the_run_open() {
        let options = RunOptions {
            timeout: Duration::from_secs(10),
            output_limit_bytes: 1024,
            log_path: None,
        };
        let start = Instant::now();
        let output = run_command(sh("sleep 6 & echo started"), &options).expect("run");
        let elapsed = start.elapsed();

        assert!(output.succeeded());
        assert_eq!(output.stdout, b"started\n");
        assert!(elapsed < Duration::from_secs(5), "returned after {elapsed:?}");
    }
}
