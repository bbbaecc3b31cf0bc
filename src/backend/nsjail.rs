//! nsjail backend implementation.
//!
//! Runs the wrapped unit under nsjail with the workspace as the only
//! writable mount, host library and binary directories mounted read-only,
//! and nsjail's own time and rlimit ceilings. The daemon's ceiling sits on
//! top of nsjail's, so a hang inside nsjail itself is still bounded.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, instrument, warn};

use super::{run_child, BackendError, ExecutionBackend, ExecutionLimits, ProcessOutput};
use crate::availability::AvailabilityCache;
use crate::config::Config;
use crate::workspace::{Workspace, UNIT_FILE};

/// Upper bound on how long the availability probe may take.
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Maximum size in megabytes of any file the script writes.
const FILE_SIZE_LIMIT_MB: u64 = 16;

/// Backend that uses nsjail for namespace and resource isolation.
#[derive(Debug)]
pub struct NsjailBackend {
    exec: PathBuf,
    config_file: Option<PathBuf>,
    probe_args: Vec<String>,
    readonly_mounts: Vec<PathBuf>,
    workspace_mount: String,
    interpreter: PathBuf,
    availability: AvailabilityCache,
}

impl NsjailBackend {
    /// Create a backend from the daemon configuration.
    pub fn from_config(config: &Config) -> Self {
        Self {
            exec: config.sandbox.exec.clone(),
            config_file: config.sandbox.config_file.clone(),
            probe_args: config.sandbox.probe_args.clone(),
            readonly_mounts: config.sandbox.readonly_mounts.clone(),
            workspace_mount: config.sandbox.workspace_mount.clone(),
            interpreter: resolve_interpreter(&config.interpreter),
            availability: AvailabilityCache::new(Duration::from_secs(
                config.sandbox.probe_refresh_seconds,
            )),
        }
    }

    /// Arguments passed to nsjail for one run.
    fn args(&self, workspace: &Path, limits: &ExecutionLimits) -> Vec<OsString> {
        let time_limit = limits.time_limit.as_secs().max(1).to_string();
        let memory = limits.memory_mb.to_string();
        let file_size = FILE_SIZE_LIMIT_MB.to_string();
        let open_files = limits.max_open_files.to_string();
        let mount = self.workspace_mount.trim_end_matches('/');

        let mut args: Vec<OsString> = vec!["--mode".into(), "o".into()];

        if let Some(config_file) = self.config_file.as_deref() {
            if config_file.exists() {
                args.push("--config".into());
                args.push(config_file.into());
            } else {
                debug!(path = %config_file.display(), "nsjail config file missing, using flags only");
            }
        }

        let flags: [&str; 13] = [
            "--quiet",
            "--time_limit",
            &time_limit,
            "--rlimit_as",
            &memory,
            "--rlimit_cpu",
            &time_limit,
            "--rlimit_fsize",
            &file_size,
            "--rlimit_nofile",
            &open_files,
            "--cwd",
            mount,
        ];
        args.extend(flags.into_iter().map(OsString::from));

        let mut bind = OsString::from(workspace);
        bind.push(":");
        bind.push(mount);
        args.push("--bindmount".into());
        args.push(bind);

        // nsjail refuses to start if a mount source is missing (no /lib64 on
        // some distributions), so only existing directories are passed.
        for dir in self.readonly_mounts.iter().filter(|d| d.exists()) {
            args.push("--bindmount_ro".into());
            args.push(dir.into());
        }

        args.push("--".into());
        args.push(self.interpreter.clone().into());
        args.push(format!("{mount}/{UNIT_FILE}").into());
        args
    }

    /// Run `<exec> <probe_args>` and report whether it exited successfully.
    async fn probe(&self) -> bool {
        let mut cmd = Command::new(&self.exec);
        cmd.args(&self.probe_args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        match tokio::time::timeout(PROBE_TIMEOUT, cmd.status()).await {
            Ok(Ok(status)) if status.success() => true,
            Ok(Ok(status)) => {
                debug!(exec = %self.exec.display(), ?status, "Sandbox probe exited unsuccessfully");
                false
            }
            Ok(Err(e)) => {
                debug!(exec = %self.exec.display(), error = %e, "Sandbox tool not runnable");
                false
            }
            Err(_) => {
                warn!(exec = %self.exec.display(), "Sandbox probe timed out");
                false
            }
        }
    }
}

#[async_trait]
impl ExecutionBackend for NsjailBackend {
    fn name(&self) -> &'static str {
        "nsjail"
    }

    async fn is_available(&self) -> bool {
        self.availability.get_or_probe(|| self.probe()).await
    }

    #[instrument(skip_all, fields(strategy = "nsjail", workspace = %workspace.path().display()))]
    async fn execute(
        &self,
        workspace: &Workspace,
        limits: &ExecutionLimits,
    ) -> Result<ProcessOutput, BackendError> {
        let mut cmd = Command::new(&self.exec);
        cmd.args(self.args(workspace.path(), limits));

        debug!(time_limit = limits.time_limit.as_secs(), "Executing unit in nsjail");

        let result = run_child(cmd, limits).await;
        if let Err(BackendError::Launch(reason)) = &result {
            warn!(%reason, "nsjail failed to launch the unit");
            self.availability.mark_unavailable().await;
        }
        result
    }
}

/// nsjail execs its command without a `PATH` search, so a bare interpreter
/// name is resolved on the host. The read-only mounts expose the same path
/// inside the jail.
fn resolve_interpreter(interpreter: &str) -> PathBuf {
    if interpreter.contains('/') {
        return PathBuf::from(interpreter);
    }
    which::which(interpreter).unwrap_or_else(|e| {
        warn!(interpreter, error = %e, "Could not resolve interpreter on PATH");
        PathBuf::from(interpreter)
    })
}
