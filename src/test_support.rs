//! Shared helpers for unit tests.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::backend::{BackendError, ExecutionBackend, ExecutionLimits, ProcessOutput};
use crate::config::Config;
use crate::workspace::Workspace;
use crate::wrapper::LAUNCH_MARKER;

/// Absolute path of a working `python3`, resolved through any shims.
pub fn python3() -> Option<PathBuf> {
    let output = std::process::Command::new("python3")
        .args(["-c", "import sys; print(sys.executable)"])
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let path = PathBuf::from(String::from_utf8_lossy(&output.stdout).trim());
    path.is_absolute().then_some(path)
}

/// Config that runs the real interpreter, with a short time limit.
pub fn python_config(interpreter: &Path, timeout_seconds: u64) -> Config {
    let json = serde_json::json!({
        "interpreter": interpreter,
        "timeout_seconds": timeout_seconds,
        "timeout_grace_seconds": 1,
        "sandbox": { "exec": "/nonexistent/nsjail" },
    });
    serde_json::from_value(json).unwrap()
}

/// Output of a unit that started and printed `line` as its report.
pub fn reported(exit_code: i32, line: &str) -> ProcessOutput {
    ProcessOutput::from_raw(
        Some(exit_code),
        format!("\n{line}\n"),
        &format!("{LAUNCH_MARKER}\n"),
        Duration::from_millis(20),
    )
}

type Responder = dyn Fn(&Workspace) -> Result<ProcessOutput, BackendError> + Send + Sync;

fn never_called(_: &Workspace) -> Result<ProcessOutput, BackendError> {
    panic!("unavailable backend must not be executed")
}

/// Backend that answers from a closure and records what it saw.
pub struct MockBackend {
    name: &'static str,
    available: bool,
    respond: Box<Responder>,
    calls: AtomicUsize,
    workspaces: Mutex<Vec<PathBuf>>,
}

impl MockBackend {
    pub fn new<F>(name: &'static str, respond: F) -> Arc<Self>
    where
        F: Fn(&Workspace) -> Result<ProcessOutput, BackendError> + Send + Sync + 'static,
    {
        Arc::new(Self {
            name,
            available: true,
            respond: Box::new(respond),
            calls: AtomicUsize::new(0),
            workspaces: Mutex::new(Vec::new()),
        })
    }

    pub fn unavailable(name: &'static str) -> Arc<Self> {
        Arc::new(Self {
            name,
            available: false,
            respond: Box::new(never_called),
            calls: AtomicUsize::new(0),
            workspaces: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn workspaces(&self) -> Vec<PathBuf> {
        self.workspaces.lock().unwrap().clone()
    }
}

#[async_trait]
impl ExecutionBackend for MockBackend {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn is_available(&self) -> bool {
        self.available
    }

    async fn execute(
        &self,
        workspace: &Workspace,
        _limits: &ExecutionLimits,
    ) -> Result<ProcessOutput, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.workspaces
            .lock()
            .unwrap()
            .push(workspace.path().to_path_buf());
        (self.respond)(workspace)
    }
}
