//! External program execution with captured output and a deadline.
//!
//! Every external call goes through the [`Executor`] trait so the VCS
//! transport can be unit-tested without spawning processes.  The production
//! [`SystemExecutor`] enforces a caller-supplied timeout: a child that runs
//! past its deadline is killed and reported as [`ExecError::Timeout`].
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use thiserror::Error;

/// How often a running child is polled for exit.
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Result of a command execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecResult {
    /// Captured standard output (lossy UTF-8).
    pub stdout: String,
    /// Captured standard error (lossy UTF-8).
    pub stderr: String,
    /// Whether the program exited with status zero.
    pub success: bool,
    /// Exit code, `None` when killed by a signal.
    pub code: Option<i32>,
}

impl ExecResult {
    fn new(status: ExitStatus, stdout: &[u8], stderr: &[u8]) -> Self {
        Self {
            stdout: String::from_utf8_lossy(stdout).to_string(),
            stderr: String::from_utf8_lossy(stderr).to_string(),
            success: status.success(),
            code: status.code(),
        }
    }
}

/// Errors that prevent a command from producing an [`ExecResult`].
///
/// A command that runs and exits non-zero is *not* an error at this layer;
/// callers inspect [`ExecResult::success`] and classify the failure.
#[derive(Error, Debug)]
pub enum ExecError {
    /// The program could not be started (missing binary, bad directory).
    #[error("failed to execute {program}: {source}")]
    Spawn {
        /// Program that was invoked.
        program: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The program did not finish before its deadline and was killed.
    #[error("{program} timed out after {}s", .after.as_secs())]
    Timeout {
        /// Program that was invoked.
        program: String,
        /// The deadline that was exceeded.
        after: Duration,
    },

    /// Waiting on or reading from the child process failed.
    #[error("I/O error while running {program}: {source}")]
    Io {
        /// Program that was invoked.
        program: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },
}

/// Abstraction over running external programs.
pub trait Executor: Send + Sync + std::fmt::Debug {
    /// Run `program` with `args` inside `dir`.
    ///
    /// # Errors
    ///
    /// Returns [`ExecError`] if the program cannot be spawned, times out, or
    /// its output cannot be collected.  A non-zero exit is returned as a
    /// result with `success == false`.
    fn run_in(&self, dir: &Path, program: &str, args: &[&str]) -> Result<ExecResult, ExecError> {
        self.run_in_with_env(dir, program, args, &[])
    }

    /// Run `program` inside `dir` with extra environment variables.
    ///
    /// # Errors
    ///
    /// See [`Executor::run_in`].
    fn run_in_with_env(
        &self,
        dir: &Path,
        program: &str,
        args: &[&str],
        env: &[(&str, &str)],
    ) -> Result<ExecResult, ExecError>;

    /// Check if a program is available on PATH.
    fn which(&self, program: &str) -> bool;
}

/// Production executor backed by [`std::process::Command`].
#[derive(Debug, Clone)]
pub struct SystemExecutor {
    timeout: Duration,
}

impl SystemExecutor {
    /// Create an executor that kills children running longer than `timeout`.
    #[must_use]
    pub const fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// The deadline applied to every command.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl Executor for SystemExecutor {
    fn run_in_with_env(
        &self,
        dir: &Path,
        program: &str,
        args: &[&str],
        env: &[(&str, &str)],
    ) -> Result<ExecResult, ExecError> {
        let mut cmd = Command::new(program);
        cmd.args(args)
            .current_dir(dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        for (k, v) in env {
            cmd.env(k, v);
        }

        let child = cmd.spawn().map_err(|source| ExecError::Spawn {
            program: program.to_string(),
            source,
        })?;
        wait_with_deadline(child, program, self.timeout)
    }

    fn which(&self, program: &str) -> bool {
        which::which(program).is_ok()
    }
}

/// Collect a child's output, killing it if it outlives `timeout`.
///
/// Output pipes are drained on helper threads so a chatty child cannot
/// block on a full pipe while we poll for its exit.
fn wait_with_deadline(
    mut child: Child,
    program: &str,
    timeout: Duration,
) -> Result<ExecResult, ExecError> {
    let io_err = |source| ExecError::Io {
        program: program.to_string(),
        source,
    };

    let stdout = drain(child.stdout.take());
    let stderr = drain(child.stderr.take());

    let deadline = Instant::now() + timeout;
    let status = loop {
        if let Some(status) = child.try_wait().map_err(io_err)? {
            break status;
        }
        if Instant::now() >= deadline {
            // Best-effort: the child may exit between try_wait and kill.
            child.kill().ok();
            child.wait().ok();
            return Err(ExecError::Timeout {
                program: program.to_string(),
                after: timeout,
            });
        }
        thread::sleep(POLL_INTERVAL);
    };

    let stdout = stdout.join().unwrap_or_default();
    let stderr = stderr.join().unwrap_or_default();
    Ok(ExecResult::new(status, &stdout, &stderr))
}

fn drain<R: std::io::Read + Send + 'static>(pipe: Option<R>) -> thread::JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            pipe.read_to_end(&mut buf).ok();
        }
        buf
    })
}
