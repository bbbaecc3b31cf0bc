//! Request lifecycle: validate, wrap, execute with escalation, interpret.
//!
//! The primary strategy is tried first when its availability probe says it
//! can run. A launch failure (the child never started the unit) falls back to
//! the restricted strategy exactly once. Anything the script itself caused
//! is terminal on whichever strategy produced it.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use serde::Serialize;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, instrument, warn};

use crate::backend::{
    BackendError, ExecutionBackend, ExecutionLimits, NsjailBackend, ProcessOutput,
    RestrictedBackend,
};
use crate::config::Config;
use crate::error::ExecError;
use crate::outcome::{interpret, ExecutionOutcome};
use crate::validator::{validate, ValidationVerdict};
use crate::workspace::Workspace;
use crate::wrapper::wrap;

const SERVICE_NAME: &str = "Safe Python Execution Service (Enhanced with nsjail)";

const FEATURES: &[&str] = &[
    "resource limits",
    "dangerous import blocking",
    "sandboxed execution",
    "nsjail sandboxing",
];

/// Runs submissions through the primary and fallback strategies.
pub struct ExecutionCoordinator {
    primary: Arc<dyn ExecutionBackend>,
    fallback: Arc<dyn ExecutionBackend>,
    limits: ExecutionLimits,
    workspace_root: PathBuf,
    permits: Semaphore,
    sandbox_tool: PathBuf,
}

/// Primary strategy status as reported by `/health`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SandboxStatus {
    pub tool: PathBuf,
    pub available: bool,
}

/// Informational health document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    pub status: &'static str,
    pub service: &'static str,
    pub security: String,
    pub sandbox: SandboxStatus,
    pub features: Vec<&'static str>,
}

impl ExecutionCoordinator {
    /// nsjail primary and restricted fallback, both built from `config`.
    pub fn from_config(config: &Config) -> Self {
        Self::new(
            Arc::new(NsjailBackend::from_config(config)),
            Arc::new(RestrictedBackend::from_config(config)),
            config,
        )
    }

    pub fn new(
        primary: Arc<dyn ExecutionBackend>,
        fallback: Arc<dyn ExecutionBackend>,
        config: &Config,
    ) -> Self {
        Self {
            primary,
            fallback,
            limits: config.limits(),
            workspace_root: config.workspace_root(),
            permits: Semaphore::new(config.max_concurrent_executions),
            sandbox_tool: config.sandbox.exec.clone(),
        }
    }

    /// Run one submission to a terminal outcome.
    ///
    /// Rejected submissions never reach a workspace or a child process. The
    /// workspace is removed before returning, whatever the outcome.
    #[instrument(skip_all, fields(script_len = script.len()))]
    pub async fn execute(&self, script: &str) -> ExecutionOutcome {
        if let ValidationVerdict::Rejected(rejection) = validate(script) {
            debug!(%rejection, "Rejected submission");
            return Err(rejection.into());
        }
        let unit = wrap(script);

        let _permit = self
            .permits
            .acquire()
            .await
            .context("Execution semaphore closed")?;

        let workspace = Workspace::create(&self.workspace_root, &unit)?;
        let attempt = self.run_attempts(&workspace).await;
        if let Err(e) = workspace.close() {
            warn!(error = %format!("{e:#}"), "Failed to remove workspace");
        }

        let outcome = attempt
            .map_err(ExecError::from)
            .and_then(|output| interpret(output, &self.limits));
        match &outcome {
            Ok(done) => info!(exit_code = done.exit_code, "Script completed"),
            Err(e) if e.is_internal() => error!(error = %e, "Execution failed"),
            Err(e) => info!(kind = e.kind(), "Script failed"),
        }
        outcome
    }

    /// Primary if available, falling back once on a launch failure.
    async fn run_attempts(&self, workspace: &Workspace) -> Result<ProcessOutput, BackendError> {
        if self.primary.is_available().await {
            match self.primary.execute(workspace, &self.limits).await {
                Err(BackendError::Launch(reason)) => {
                    warn!(
                        primary = self.primary.name(),
                        fallback = self.fallback.name(),
                        %reason,
                        "Primary strategy failed to launch, falling back"
                    );
                }
                other => return other,
            }
        } else {
            info!(
                primary = self.primary.name(),
                fallback = self.fallback.name(),
                "Primary strategy unavailable, using fallback"
            );
        }

        self.fallback.execute(workspace, &self.limits).await
    }

    pub async fn sandbox_status(&self) -> SandboxStatus {
        SandboxStatus {
            tool: self.sandbox_tool.clone(),
            available: self.primary.is_available().await,
        }
    }

    pub async fn health(&self) -> HealthReport {
        let sandbox = self.sandbox_status().await;
        let state = if sandbox.available {
            "available"
        } else {
            "not available"
        };
        HealthReport {
            status: "healthy",
            service: SERVICE_NAME,
            security: format!("nsjail + input validation (nsjail: {state})"),
            sandbox,
            features: FEATURES.to_vec(),
        }
    }
}
