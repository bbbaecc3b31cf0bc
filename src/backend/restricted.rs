//! Restricted fallback backend.
//!
//! Runs the wrapped unit directly as a child of the daemon. The child gets a
//! cleared environment with a short `PATH` and its home and temp directories
//! pointed at the workspace. There is no namespace, mount or rlimit
//! isolation here: the wall-clock ceiling is the only enforced limit.

use std::path::PathBuf;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, instrument};

use super::{run_child, BackendError, ExecutionBackend, ExecutionLimits, ProcessOutput};
use crate::config::Config;
use crate::workspace::Workspace;

/// Backend that runs the interpreter on the host with a minimal environment.
#[derive(Debug, Clone)]
pub struct RestrictedBackend {
    interpreter: PathBuf,
    path_env: String,
    python_path: Option<String>,
}

impl RestrictedBackend {
    /// Create a backend from the daemon configuration.
    pub fn from_config(config: &Config) -> Self {
        Self {
            interpreter: PathBuf::from(&config.interpreter),
            path_env: config.fallback.path.clone(),
            python_path: config.fallback.python_path.clone(),
        }
    }

    fn command(&self, workspace: &Workspace) -> Command {
        let mut cmd = Command::new(&self.interpreter);
        cmd.arg(workspace.unit_path())
            .current_dir(workspace.path())
            .env_clear()
            .env("PATH", &self.path_env)
            .env("HOME", workspace.path())
            .env("TMPDIR", workspace.path())
            .env("PYTHONDONTWRITEBYTECODE", "1");
        if let Some(python_path) = &self.python_path {
            cmd.env("PYTHONPATH", python_path);
        }
        cmd
    }
}

#[async_trait]
impl ExecutionBackend for RestrictedBackend {
    fn name(&self) -> &'static str {
        "restricted"
    }

    #[instrument(skip_all, fields(strategy = "restricted", workspace = %workspace.path().display()))]
    async fn execute(
        &self,
        workspace: &Workspace,
        limits: &ExecutionLimits,
    ) -> Result<ProcessOutput, BackendError> {
        debug!(
            interpreter = %self.interpreter.display(),
            wall_clock = limits.wall_clock().as_secs(),
            "Executing unit without isolation"
        );
        run_child(self.command(workspace), limits).await
    }
}
