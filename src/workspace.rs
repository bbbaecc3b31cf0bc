//! Per-request ephemeral workspace.
//!
//! Each request gets a uniquely named directory holding only the wrapped
//! unit. The directory is removed when the request finishes: explicitly via
//! [`Workspace::close`] on normal paths, and by `Drop` if the request future
//! is cancelled or panics.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tempfile::TempDir;
use tracing::debug;

use crate::wrapper::WrappedUnit;

/// File name of the wrapped unit inside the workspace.
pub const UNIT_FILE: &str = "script.py";

const DIR_PREFIX: &str = "safe-exec-";

/// Exclusively owned scratch directory for one execution.
#[derive(Debug)]
pub struct Workspace {
    dir: TempDir,
    unit_path: PathBuf,
}

impl Workspace {
    /// Create a fresh directory under `root` and write the unit into it.
    pub fn create(root: &Path, unit: &WrappedUnit) -> Result<Self> {
        let dir = tempfile::Builder::new()
            .prefix(DIR_PREFIX)
            .tempdir_in(root)
            .with_context(|| format!("Failed to create workspace under {}", root.display()))?;

        let unit_path = dir.path().join(UNIT_FILE);
        std::fs::write(&unit_path, unit.source())
            .with_context(|| format!("Failed to write unit to {}", unit_path.display()))?;

        debug!(path = %dir.path().display(), "Created workspace");

        Ok(Self { dir, unit_path })
    }

    /// Host path of the workspace directory.
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Host path of the wrapped unit.
    pub fn unit_path(&self) -> &Path {
        &self.unit_path
    }

    /// Remove the workspace, reporting any failure.
    pub fn close(self) -> Result<()> {
        let path = self.dir.path().to_path_buf();
        self.dir
            .close()
            .with_context(|| format!("Failed to remove workspace {}", path.display()))?;
        debug!(path = %path.display(), "Removed workspace");
        Ok(())
    }
}
