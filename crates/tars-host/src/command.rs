//! External command execution.
//!
//! Children are spawned with `kill_on_drop`, so dropping the future returned
//! by [`CommandRunner::run`] (for example when a background task is
//! cancelled) also kills the subprocess.

use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::errors::{HostError, Result};

/// Captured result of a finished command.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Captured stdout (lossy UTF-8).
    pub stdout: String,
    /// Captured stderr (lossy UTF-8).
    pub stderr: String,
    /// Exit code, `-1` when killed by a signal.
    pub exit_code: i32,
}

impl CommandOutput {
    /// Whether the command exited with status 0.
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// The most useful diagnostic text: stderr, or stdout when stderr is empty.
    pub fn diagnostic(&self) -> String {
        let stderr = self.stderr.trim();
        if stderr.is_empty() {
            self.stdout.trim().to_string()
        } else {
            stderr.to_string()
        }
    }
}

/// Runs external programs.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `program args…`, failing with [`HostError::Timeout`] after `timeout`.
    async fn run(&self, program: &str, args: &[&str], timeout: Duration) -> Result<CommandOutput>;
}

/// Real subprocess execution backed by `tokio::process::Command`.
pub struct TokioCommandRunner;

#[async_trait]
impl CommandRunner for TokioCommandRunner {
    async fn run(&self, program: &str, args: &[&str], timeout: Duration) -> Result<CommandOutput> {
        let start = Instant::now();
        let command_line = render(program, args);

        let mut cmd = tokio::process::Command::new(program);
        let _ = cmd
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!(command = %command_line, "spawning process");

        let child = cmd.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                HostError::Unavailable(program.to_string())
            } else {
                HostError::Io(e)
            }
        })?;

        let output = if let Ok(result) = tokio::time::timeout(timeout, child.wait_with_output()).await {
            result?
        } else {
            warn!(command = %command_line, timeout_secs = timeout.as_secs(), "process timed out");
            return Err(HostError::Timeout {
                command: command_line,
                secs: timeout.as_secs(),
            });
        };

        let exit_code = output.status.code().unwrap_or(-1);
        let duration_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);
        debug!(command = %command_line, exit_code, duration_ms, "process completed");

        Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code,
        })
    }
}

/// Human-readable command line for logs and errors.
pub(crate) fn render(program: &str, args: &[&str]) -> String {
    let mut line = program.to_string();
    for arg in args {
        line.push(' ');
        line.push_str(arg);
    }
    line
}
