//! Process execution primitive
//!
//! Spawns a single external command and exposes stdout/stderr as
//! independent line channels plus a one-shot result. No policy lives
//! here: queueing, history and reconciliation are the caller's job.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Child;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

/// ANSI color/style escape sequences emitted by Terraform
static ANSI_ESCAPE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\x1b\[[0-9;]*m").expect("valid ANSI regex"));

/// Remove ANSI escape sequences from a line
pub fn strip_ansi(text: &str) -> String {
    ANSI_ESCAPE.replace_all(text, "").into_owned()
}

/// Cleanup applied to every captured line: strip escapes, drop trailing
/// whitespace. Leading indentation is kept, plan output relies on it.
fn clean_line(line: &str) -> String {
    strip_ansi(line).trim_end().to_string()
}

/// Final outcome of one spawned process
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessResult {
    /// Process ran to completion; `-1` means killed by a signal
    Exited { code: i32 },
    /// Terminated on request before exiting on its own
    Cancelled,
    /// The executable could not be started; never retried
    LaunchFailed { error: String },
}

/// Live handle to a spawned process
///
/// `stdout`/`stderr` are finite, non-restartable line sequences closed
/// when the process exits; `wait` resolves the final result.
pub struct ProcessHandle {
    pub stdout: mpsc::UnboundedReceiver<String>,
    pub stderr: mpsc::UnboundedReceiver<String>,
    result: oneshot::Receiver<ProcessResult>,
}

impl ProcessHandle {
    /// Await the final result; the line channels are closed by then
    pub async fn wait(self) -> ProcessResult {
        self.result.await.unwrap_or(ProcessResult::Cancelled)
    }
}

/// Pure execution primitive: one external process per `spawn` call
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    /// Grace period between SIGTERM and SIGKILL on cancellation
    grace: Duration,
    /// Extra environment variables for every spawned process
    env_vars: Vec<(String, String)>,
}

impl ProcessRunner {
    pub fn new(grace: Duration) -> Self {
        Self {
            grace,
            env_vars: Vec::new(),
        }
    }

    pub fn with_env_vars(mut self, env_vars: Vec<(String, String)>) -> Self {
        self.env_vars = env_vars;
        self
    }

    /// Spawn a process with the given cancellation channel.
    ///
    /// A message on `cancel` requests termination: SIGTERM first, then a
    /// forced kill after the grace period. The handle's result resolves
    /// `Cancelled` in that case. Launch errors resolve immediately as
    /// `LaunchFailed` without a process ever existing.
    pub fn spawn(
        &self,
        program: &str,
        args: &[String],
        working_dir: &Path,
        cancel: mpsc::Receiver<()>,
    ) -> ProcessHandle {
        let (stdout_tx, stdout_rx) = mpsc::unbounded_channel();
        let (stderr_tx, stderr_rx) = mpsc::unbounded_channel();
        let (result_tx, result_rx) = oneshot::channel();

        let mut cmd = tokio::process::Command::new(program);
        cmd.args(args)
            .current_dir(working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        for (name, value) in &self.env_vars {
            cmd.env(name, value);
        }

        match cmd.spawn() {
            Err(err) => {
                debug!(program, error = %err, "process launch failed");
                let _ = result_tx.send(ProcessResult::LaunchFailed {
                    error: err.to_string(),
                });
            }
            Ok(mut child) => {
                if let Some(stdout) = child.stdout.take() {
                    tokio::spawn(pump_lines(stdout, stdout_tx));
                }
                if let Some(stderr) = child.stderr.take() {
                    tokio::spawn(pump_lines(stderr, stderr_tx));
                }
                tokio::spawn(supervise(child, cancel, self.grace, result_tx));
            }
        }

        ProcessHandle {
            stdout: stdout_rx,
            stderr: stderr_rx,
            result: result_rx,
        }
    }
}

/// Forward cleaned lines from one stream until EOF or receiver drop
async fn pump_lines(reader: impl AsyncRead + Unpin, tx: mpsc::UnboundedSender<String>) {
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if tx.send(clean_line(&line)).is_err() {
            break;
        }
    }
}

/// Wait for exit or cancellation, then resolve the result exactly once
async fn supervise(
    mut child: Child,
    mut cancel: mpsc::Receiver<()>,
    grace: Duration,
    result_tx: oneshot::Sender<ProcessResult>,
) {
    let result = tokio::select! {
        status = child.wait() => match status {
            Ok(status) => ProcessResult::Exited {
                code: status.code().unwrap_or(-1),
            },
            Err(err) => {
                warn!(error = %err, "waiting on child process failed");
                ProcessResult::Exited { code: -1 }
            }
        },
        _ = cancel.recv() => {
            terminate_with_grace(&mut child, grace).await;
            ProcessResult::Cancelled
        }
    };
    let _ = result_tx.send(result);
}

async fn terminate_with_grace(child: &mut Child, grace: Duration) {
    #[cfg(unix)]
    {
        if let Some(pid) = child.id() {
            // SIGTERM first so Terraform can release its state lock
            unsafe {
                libc::kill(pid as i32, libc::SIGTERM);
            }
            if tokio::time::timeout(grace, child.wait()).await.is_ok() {
                return;
            }
            warn!(pid, "process ignored SIGTERM within grace period, killing");
        }
    }
    #[cfg(not(unix))]
    let _ = grace;

    let _ = child.kill().await;
    let _ = child.wait().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn runner() -> ProcessRunner {
        ProcessRunner::new(Duration::from_millis(200))
    }

    fn cwd() -> PathBuf {
        std::env::current_dir().unwrap()
    }

    fn no_cancel() -> mpsc::Receiver<()> {
        mpsc::channel(1).1
    }

    #[test]
    fn strip_ansi_removes_color_codes() {
        assert_eq!(strip_ansi("\x1b[32mok\x1b[0m"), "ok");
        assert_eq!(strip_ansi("plain"), "plain");
    }

    #[test]
    fn clean_line_keeps_indentation() {
        assert_eq!(clean_line("  + resource \x1b[1m\"x\"\x1b[0m  "), "  + resource \"x\"");
    }

    #[tokio::test]
    async fn launch_failure_resolves_immediately() {
        let handle = runner().spawn(
            "/nonexistent/terradeck-test-binary",
            &[],
            &cwd(),
            no_cancel(),
        );
        match handle.wait().await {
            ProcessResult::LaunchFailed { error } => assert!(!error.is_empty()),
            other => panic!("expected LaunchFailed, got {other:?}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn captures_stdout_lines_in_order() {
        let args = vec!["-c".to_string(), "echo one; echo two".to_string()];
        let mut handle = runner().spawn("sh", &args, &cwd(), no_cancel());

        let mut lines = Vec::new();
        while let Some(line) = handle.stdout.recv().await {
            lines.push(line);
        }
        assert_eq!(lines, vec!["one", "two"]);
        assert_eq!(handle.wait().await, ProcessResult::Exited { code: 0 });
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn nonzero_exit_is_reported() {
        let args = vec!["-c".to_string(), "echo oops >&2; exit 3".to_string()];
        let mut handle = runner().spawn("sh", &args, &cwd(), no_cancel());

        let mut errs = Vec::new();
        while let Some(line) = handle.stderr.recv().await {
            errs.push(line);
        }
        assert_eq!(errs, vec!["oops"]);
        assert_eq!(handle.wait().await, ProcessResult::Exited { code: 3 });
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn cancel_terminates_long_running_process() {
        let (cancel_tx, cancel_rx) = mpsc::channel(1);
        let args = vec!["-c".to_string(), "sleep 30".to_string()];
        let handle = runner().spawn("sh", &args, &cwd(), cancel_rx);

        cancel_tx.send(()).await.unwrap();
        let started = std::time::Instant::now();
        assert_eq!(handle.wait().await, ProcessResult::Cancelled);
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
