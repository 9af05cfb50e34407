//! External process capability

use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use eyre::{Context, Result};
use tokio::process::Command;
use tracing::{debug, warn};

/// Outcome of one external command run.
#[derive(Debug, Clone)]
pub struct RunOutput {
    /// Process exit code; `None` when killed by signal or timed out
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    /// True when the timeout elapsed and the process was killed
    pub timed_out: bool,
    pub duration: Duration,
}

impl RunOutput {
    pub fn success(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }
}

/// Bounded external command execution for task actions.
///
/// Every run carries an explicit timeout; a process that exceeds it is killed
/// and reported as `timed_out` rather than left behind.
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    async fn run(&self, argv: &[String], timeout: Duration) -> Result<RunOutput>;
}

/// Production `ProcessRunner` on tokio::process.
pub struct TokioRunner;

#[async_trait]
impl ProcessRunner for TokioRunner {
    async fn run(&self, argv: &[String], timeout: Duration) -> Result<RunOutput> {
        let (program, args) = argv.split_first().ok_or_else(|| eyre::eyre!("Empty command"))?;
        debug!(%program, ?timeout, "TokioRunner::run: spawning");

        let started = Instant::now();
        let mut command = Command::new(program);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = command.spawn().context(format!("Failed to spawn {program}"))?;

        match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(output) => {
                let output = output.context("Failed to collect command output")?;
                let run = RunOutput {
                    exit_code: output.status.code(),
                    stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                    stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                    timed_out: false,
                    duration: started.elapsed(),
                };
                debug!(exit_code = ?run.exit_code, duration = ?run.duration, "TokioRunner::run: finished");
                Ok(run)
            }
            // Timeout drops the output future, and kill_on_drop reaps the child.
            Err(_) => {
                warn!(%program, ?timeout, "TokioRunner::run: command timed out, killed");
                Ok(RunOutput {
                    exit_code: None,
                    stdout: String::new(),
                    stderr: String::new(),
                    timed_out: true,
                    duration: started.elapsed(),
                })
            }
        }
    }
}

/// Split a configured command string into argv. Whitespace split only; no
/// shell quoting or expansion.
pub fn split_command(command: &str) -> Vec<String> {
    command.split_whitespace().map(str::to_string).collect()
}
