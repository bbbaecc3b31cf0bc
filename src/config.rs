//! Daemon configuration.
//!
//! Configuration is JSON. It is read from the file given with `--config`,
//! otherwise from the `SAFE_EXEC_CONFIG` environment variable, otherwise the
//! built-in defaults apply. Every field is optional.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::backend::ExecutionLimits;

/// Environment variable holding the JSON configuration.
pub const CONFIG_ENV: &str = "SAFE_EXEC_CONFIG";

/// Top-level configuration for the daemon.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Primary (nsjail) strategy settings.
    #[serde(default)]
    pub sandbox: SandboxConfig,

    /// Restricted fallback strategy settings.
    #[serde(default)]
    pub fallback: FallbackConfig,

    /// Interpreter used to run the wrapped unit under both strategies.
    #[serde(default = "default_interpreter")]
    pub interpreter: String,

    /// Script time limit in seconds, enforced inside the sandbox.
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,

    /// Extra seconds the daemon waits beyond `timeout_seconds` before
    /// killing the child itself.
    #[serde(default = "default_grace")]
    pub timeout_grace_seconds: u64,

    /// Address-space limit in megabytes.
    #[serde(default = "default_memory")]
    pub memory_mb: u64,

    /// Open file descriptor limit inside the sandbox.
    #[serde(default = "default_max_open_files")]
    pub max_open_files: u64,

    /// Most bytes of stdout, and separately of stderr, kept from one run.
    /// A child that writes more is killed.
    #[serde(default = "default_max_output")]
    pub max_output_bytes: u64,

    /// Upper bound on child processes running at once.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_executions: usize,

    /// Directory under which per-request workspaces are created.
    /// Defaults to the system temp directory.
    #[serde(default)]
    pub workspace_root: Option<PathBuf>,
}

/// nsjail settings.
#[derive(Debug, Clone, Deserialize)]
pub struct SandboxConfig {
    /// Path to the nsjail binary.
    #[serde(default = "default_sandbox_exec")]
    pub exec: PathBuf,

    /// nsjail configuration file. Passed with `--config` only if it exists.
    #[serde(default = "default_sandbox_config_file")]
    pub config_file: Option<PathBuf>,

    /// Arguments for the availability probe.
    #[serde(default = "default_probe_args")]
    pub probe_args: Vec<String>,

    /// How long a probe result stays valid.
    #[serde(default = "default_probe_refresh")]
    pub probe_refresh_seconds: u64,

    /// Host directories bind-mounted read-only at the same path.
    #[serde(default = "default_readonly_mounts")]
    pub readonly_mounts: Vec<PathBuf>,

    /// Where the workspace is mounted inside the jail.
    #[serde(default = "default_workspace_mount")]
    pub workspace_mount: String,
}

/// Restricted fallback settings.
#[derive(Debug, Clone, Deserialize)]
pub struct FallbackConfig {
    /// `PATH` given to the child.
    #[serde(default = "default_fallback_path")]
    pub path: String,

    /// `PYTHONPATH` given to the child, if any.
    #[serde(default = "default_python_path")]
    pub python_path: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sandbox: SandboxConfig::default(),
            fallback: FallbackConfig::default(),
            interpreter: default_interpreter(),
            timeout_seconds: default_timeout(),
            timeout_grace_seconds: default_grace(),
            memory_mb: default_memory(),
            max_open_files: default_max_open_files(),
            max_output_bytes: default_max_output(),
            max_concurrent_executions: default_max_concurrent(),
            workspace_root: None,
        }
    }
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            exec: default_sandbox_exec(),
            config_file: default_sandbox_config_file(),
            probe_args: default_probe_args(),
            probe_refresh_seconds: default_probe_refresh(),
            readonly_mounts: default_readonly_mounts(),
            workspace_mount: default_workspace_mount(),
        }
    }
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            path: default_fallback_path(),
            python_path: default_python_path(),
        }
    }
}

impl Config {
    /// Load configuration from `SAFE_EXEC_CONFIG`, or defaults when unset.
    pub fn from_env() -> Result<Self> {
        match std::env::var(CONFIG_ENV) {
            Ok(json) => {
                serde_json::from_str(&json).with_context(|| format!("Failed to parse {CONFIG_ENV}"))
            }
            Err(std::env::VarError::NotPresent) => Ok(Self::default()),
            Err(e) => Err(e).with_context(|| format!("Failed to read {CONFIG_ENV}")),
        }
    }

    /// Load configuration from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        serde_json::from_str(&json)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    /// Reject values the executor cannot honour.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(self.timeout_seconds > 0, "timeout_seconds must be positive");
        // The daemon's own ceiling must stay strictly above nsjail's.
        anyhow::ensure!(
            self.timeout_grace_seconds > 0,
            "timeout_grace_seconds must be positive"
        );
        anyhow::ensure!(self.max_output_bytes > 0, "max_output_bytes must be positive");
        anyhow::ensure!(
            self.max_concurrent_executions > 0,
            "max_concurrent_executions must be positive"
        );
        anyhow::ensure!(!self.interpreter.is_empty(), "interpreter must not be empty");
        anyhow::ensure!(
            self.sandbox.workspace_mount.starts_with('/'),
            "sandbox.workspace_mount must be an absolute path"
        );
        Ok(())
    }

    /// Resource and time limits applied to every execution attempt.
    pub const fn limits(&self) -> ExecutionLimits {
        ExecutionLimits {
            time_limit: Duration::from_secs(self.timeout_seconds),
            grace: Duration::from_secs(self.timeout_grace_seconds),
            memory_mb: self.memory_mb,
            max_open_files: self.max_open_files,
            max_output_bytes: self.max_output_bytes,
        }
    }

    /// Directory in which workspaces are created.
    pub fn workspace_root(&self) -> PathBuf {
        self.workspace_root
            .clone()
            .unwrap_or_else(std::env::temp_dir)
    }

    /// Create a config from a JSON string (for testing).
    #[cfg(test)]
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json).context("Failed to parse JSON")?;
        Ok(config)
    }
}

fn default_interpreter() -> String {
    "python3".into()
}

const fn default_timeout() -> u64 {
    30
}

const fn default_grace() -> u64 {
    5
}

const fn default_memory() -> u64 {
    512
}

const fn default_max_open_files() -> u64 {
    64
}

const fn default_max_output() -> u64 {
    16 * 1024 * 1024
}

const fn default_max_concurrent() -> usize {
    8
}

fn default_sandbox_exec() -> PathBuf {
    "/usr/local/bin/nsjail".into()
}

#[allow(clippy::unnecessary_wraps)]
fn default_sandbox_config_file() -> Option<PathBuf> {
    Some("/etc/nsjail/nsjail.cfg".into())
}

fn default_probe_args() -> Vec<String> {
    vec!["--help".into()]
}

const fn default_probe_refresh() -> u64 {
    30
}

fn default_readonly_mounts() -> Vec<PathBuf> {
    ["/usr", "/lib", "/lib64", "/bin", "/sbin"]
        .into_iter()
        .map(PathBuf::from)
        .collect()
}

fn default_workspace_mount() -> String {
    "/tmp".into()
}

fn default_fallback_path() -> String {
    "/usr/local/bin:/usr/bin:/bin".into()
}

#[allow(clippy::unnecessary_wraps)]
fn default_python_path() -> Option<String> {
    Some("/app".into())
}
