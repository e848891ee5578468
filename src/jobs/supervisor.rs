//! Supervised subprocesses for build tools.
//!
//! stdout and stderr are drained by one reader task. Lines starting with
//! [`PROGRESS_MARKER`] become progress reports. The exit status is polled
//! once per [`POLL_INTERVAL`]; past the timeout the process group is killed.

use super::{JobError, ProgressReporter};
use crate::sync::types::ProgressKind;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::time::Instant;
use tracing::{debug, warn};

pub const PROGRESS_MARKER: &str = "#!>";
pub const PROGRESS_STEP: f64 = 0.15;
pub const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// How long to wait for the reader once the process is gone.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug)]
pub struct SupervisedRun {
    /// `None` when the process was killed on timeout
    pub status: Option<ExitStatus>,
    pub output: String,
    pub timed_out: bool,
}

impl SupervisedRun {
    pub fn success(&self) -> bool {
        self.status.is_some_and(|s| s.success())
    }

    pub fn exit_code(&self) -> Option<i32> {
        self.status.and_then(|s| s.code())
    }
}

/// Remove every occurrence of the working directory from a line.
pub fn strip_dir(line: &str, dir: &str) -> String {
    if dir.is_empty() {
        line.to_string()
    } else {
        line.replace(dir, "")
    }
}

/// Human readable timeout for error messages.
pub fn describe_timeout(timeout: Duration) -> String {
    let secs = timeout.as_secs();
    let (count, unit) = if secs >= 60 && secs % 60 == 0 {
        (secs / 60, "minute")
    } else {
        (secs, "second")
    };
    if count == 1 {
        format!("1 {}", unit)
    } else {
        format!("{} {}s", count, unit)
    }
}

/// Run `cmd` in `dir` until it exits or `timeout` passes.
///
/// Progress starts at `start_progress` and advances by [`PROGRESS_STEP`] per
/// marker line. A timeout is reported as an `error`; captured output, if
/// any, is reported once as `output`.
pub async fn run_supervised(
    mut cmd: Command,
    dir: &Path,
    timeout: Duration,
    stage: &str,
    start_progress: f64,
    reporter: Arc<dyn ProgressReporter>,
) -> Result<SupervisedRun, JobError> {
    let program = cmd.as_std().get_program().to_string_lossy().to_string();
    cmd.current_dir(dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    #[cfg(unix)]
    // SAFETY: setpgid is async-signal-safe and touches no parent state.
    unsafe {
        cmd.pre_exec(|| {
            libc::setpgid(0, 0);
            Ok(())
        });
    }

    let mut child = cmd
        .spawn()
        .map_err(|source| JobError::Spawn { program, source })?;
    debug!("Spawned {} for {} (pid {:?})", stage, dir.display(), child.id());

    let reader = spawn_reader(&mut child, dir, start_progress, reporter.clone());

    let deadline = Instant::now() + timeout;
    let status = loop {
        if let Some(status) = child.try_wait()? {
            break Some(status);
        }
        let now = Instant::now();
        if now >= deadline {
            kill_tree(&mut child).await;
            break None;
        }
        tokio::time::sleep(POLL_INTERVAL.min(deadline - now)).await;
    };
    let timed_out = status.is_none();

    let output = match tokio::time::timeout(DRAIN_TIMEOUT, reader).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => {
            warn!("Output reader for {} failed: {}", stage, e);
            String::new()
        }
        Err(_) => {
            warn!("Output of {} still open after exit, giving up on it", stage);
            String::new()
        }
    };

    if timed_out {
        report(
            &*reporter,
            ProgressKind::Error,
            None,
            Some(format!(
                "Consumed more than {} for {}",
                describe_timeout(timeout),
                stage
            )),
        )
        .await;
    }
    if !output.trim().is_empty() {
        report(&*reporter, ProgressKind::Output, None, Some(output.clone())).await;
    }

    Ok(SupervisedRun {
        status,
        output,
        timed_out,
    })
}

fn spawn_reader(
    child: &mut Child,
    dir: &Path,
    start_progress: f64,
    reporter: Arc<dyn ProgressReporter>,
) -> tokio::task::JoinHandle<String> {
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let dir = dir.to_string_lossy().to_string();

    tokio::spawn(async move {
        let mut out = stdout.map(|s| BufReader::new(s).lines());
        let mut err = stderr.map(|s| BufReader::new(s).lines());
        let mut collected = String::new();
        let mut progress = start_progress;

        while out.is_some() || err.is_some() {
            let line = tokio::select! {
                line = next_line(&mut out), if out.is_some() => {
                    if line.is_none() { out = None; }
                    line
                }
                line = next_line(&mut err), if err.is_some() => {
                    if line.is_none() { err = None; }
                    line
                }
            };
            let Some(line) = line else { continue };

            let line = strip_dir(&line, &dir);
            collected.push_str(&line);
            collected.push('\n');
            if let Some(rest) = line.strip_prefix(PROGRESS_MARKER) {
                report(
                    &*reporter,
                    ProgressKind::Progress,
                    Some(progress),
                    Some(rest.to_string()),
                )
                .await;
                progress += PROGRESS_STEP;
            }
        }
        collected
    })
}

async fn next_line<R>(lines: &mut Option<tokio::io::Lines<BufReader<R>>>) -> Option<String>
where
    R: tokio::io::AsyncRead + Unpin,
{
    match lines {
        Some(lines) => lines.next_line().await.ok().flatten(),
        None => None,
    }
}

async fn kill_tree(child: &mut Child) {
    #[cfg(unix)]
    {
        if let Some(pid) = child.id() {
            // SAFETY: plain syscall on the group created in pre_exec.
            unsafe {
                libc::killpg(pid as i32, libc::SIGKILL);
            }
        }
    }
    if let Err(e) = child.kill().await {
        debug!("Kill after timeout: {}", e);
    }
}

/// Progress reports are best effort; a failed post never fails the job.
async fn report(
    reporter: &dyn ProgressReporter,
    kind: ProgressKind,
    progress: Option<f64>,
    message: Option<String>,
) {
    if let Err(e) = reporter.report_progress(kind, progress, message).await {
        warn!("Failed to report {} progress: {}", kind, e);
    }
}
