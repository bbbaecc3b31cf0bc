//! Execution backend trait and implementations.
//!
//! A backend runs the wrapped unit sitting in a workspace and hands back the
//! raw process observations. Interpreting those observations is the
//! coordinator's job; backends only separate "could not launch" and "ran out
//! of time" from "ran".

mod nsjail;
mod restricted;

pub use nsjail::NsjailBackend;
pub use restricted::RestrictedBackend;

use std::process::Stdio;
use std::time::{Duration, Instant};

use anyhow::Context;
use async_trait::async_trait;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tracing::debug;

use crate::workspace::Workspace;
use crate::wrapper::LAUNCH_MARKER;

/// Time and resource ceilings for one execution attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionLimits {
    /// Time the script itself is given; nsjail enforces it internally.
    pub time_limit: Duration,
    /// Extra time before the daemon kills the child from outside.
    pub grace: Duration,
    /// Address-space limit in megabytes.
    pub memory_mb: u64,
    /// Open file descriptor limit.
    pub max_open_files: u64,
    /// Most bytes kept from each of stdout and stderr.
    pub max_output_bytes: u64,
}

impl ExecutionLimits {
    /// External wall-clock ceiling, strictly above `time_limit`.
    pub fn wall_clock(&self) -> Duration {
        self.time_limit + self.grace
    }
}

/// Raw observations of a finished child process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOutput {
    /// Exit code, `None` if killed by a signal.
    pub exit_code: Option<i32>,
    pub stdout: String,
    /// Captured stderr with the launch marker removed.
    pub stderr: String,
    /// Whether the interpreter started the unit.
    pub started: bool,
    pub elapsed: Duration,
}

impl ProcessOutput {
    /// Build from raw pipe contents, stripping the launch marker from stderr.
    pub fn from_raw(exit_code: Option<i32>, stdout: String, stderr: &str, elapsed: Duration) -> Self {
        let mut started = false;
        let stderr = stderr
            .split_inclusive('\n')
            .filter(|line| {
                let is_marker = line.trim_end() == LAUNCH_MARKER;
                started |= is_marker;
                !is_marker
            })
            .collect();

        Self {
            exit_code,
            stdout,
            stderr,
            started,
            elapsed,
        }
    }
}

/// Failure of a backend to produce [`ProcessOutput`].
#[derive(Debug, Error)]
pub enum BackendError {
    /// The child could not be spawned, or exited before the interpreter
    /// started the unit. Infrastructure, not the script.
    #[error("{0}")]
    Launch(String),

    /// The external wall-clock ceiling fired and the child was killed.
    #[error("timed out after {} seconds", .limit.as_secs())]
    Timeout { limit: Duration },

    /// The child wrote more than the output limit to one pipe and was killed.
    #[error("output exceeded {limit} bytes")]
    OutputLimit { limit: u64 },

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// Trait for execution backends.
///
/// The primary and fallback strategies share this contract so the
/// coordinator can pick between them without knowing how either works.
#[async_trait]
pub trait ExecutionBackend: Send + Sync {
    /// Short name used in logs and status reports.
    fn name(&self) -> &'static str;

    /// Whether the backend can currently be used.
    async fn is_available(&self) -> bool {
        true
    }

    /// Run the unit in `workspace` under `limits`.
    async fn execute(
        &self,
        workspace: &Workspace,
        limits: &ExecutionLimits,
    ) -> Result<ProcessOutput, BackendError>;
}

/// Spawn `cmd`, collect its output under the wall-clock ceiling and check
/// that the interpreter started the unit.
pub(crate) async fn run_child(
    mut cmd: Command,
    limits: &ExecutionLimits,
) -> Result<ProcessOutput, BackendError> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let program = cmd.as_std().get_program().to_string_lossy().into_owned();
    let started_at = Instant::now();
    let deadline = tokio::time::Instant::now() + limits.wall_clock();

    let mut child = cmd
        .spawn()
        .map_err(|e| BackendError::Launch(format!("Failed to spawn {program}: {e}")))?;

    // Take pipe handles out so `child` stays in scope for kill-on-timeout
    let child_stdout = child.stdout.take().context("Failed to open stdout")?;
    let child_stderr = child.stderr.take().context("Failed to open stderr")?;

    // Read stdout+stderr concurrently, under the ceiling. An overflow on
    // either pipe ends both reads at once.
    let read_all = async {
        tokio::try_join!(
            read_capped(child_stdout, limits.max_output_bytes, "stdout"),
            read_capped(child_stderr, limits.max_output_bytes, "stderr"),
        )
    };

    let finished = match tokio::time::timeout_at(deadline, read_all).await {
        Ok(Ok((stdout_buf, stderr_buf))) => tokio::time::timeout_at(deadline, child.wait())
            .await
            .ok()
            .map(|status| (status, stdout_buf, stderr_buf)),
        Ok(Err(e)) => {
            let _ = child.kill().await;
            debug!(program = %program, error = %e, "Killed child after failed read");
            return Err(e);
        }
        Err(_) => None,
    };

    let Some((status, stdout_buf, stderr_buf)) = finished else {
        let _ = child.kill().await;
        debug!(program = %program, "Killed child after wall-clock ceiling");
        return Err(BackendError::Timeout {
            limit: limits.time_limit,
        });
    };
    let status = status.context("Failed to wait for process")?;

    let output = ProcessOutput::from_raw(
        status.code(),
        String::from_utf8_lossy(&stdout_buf).into_owned(),
        &String::from_utf8_lossy(&stderr_buf),
        started_at.elapsed(),
    );

    debug!(
        exit_code = ?output.exit_code,
        started = output.started,
        elapsed_ms = u64::try_from(output.elapsed.as_millis()).unwrap_or(u64::MAX),
        "Child finished"
    );

    if !output.started {
        return Err(BackendError::Launch(format!(
            "{program} exited ({}) before the interpreter started: {}",
            describe_exit(output.exit_code),
            output.stderr.trim()
        )));
    }

    Ok(output)
}

/// Read `pipe` to the end, failing once it yields more than `limit` bytes.
async fn read_capped<R>(pipe: R, limit: u64, name: &str) -> Result<Vec<u8>, BackendError>
where
    R: AsyncRead + Unpin,
{
    let mut buf = Vec::new();
    pipe.take(limit.saturating_add(1))
        .read_to_end(&mut buf)
        .await
        .with_context(|| format!("Failed to read {name}"))?;
    if u64::try_from(buf.len()).unwrap_or(u64::MAX) > limit {
        return Err(BackendError::OutputLimit { limit });
    }
    Ok(buf)
}

/// Human-readable exit status.
pub fn describe_exit(code: Option<i32>) -> String {
    code.map_or_else(|| "killed by signal".to_string(), |c| format!("exit code: {c}"))
}
