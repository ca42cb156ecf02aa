// Ownership/permission reset after sandboxed runs.
// Files written by the sandbox user must be handed back to the worker before
// it reads, relinks or deletes them.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::debug;

#[async_trait]
pub trait PermissionReset: Send + Sync {
    /// Idempotent. Failure is an infrastructure error.
    async fn reset(&self) -> Result<()>;
}

/// Runs an external fixer binary with the submission directory name
pub struct CommandPermissionReset {
    fixer: PathBuf,
    submission_dir: String,
}

impl CommandPermissionReset {
    pub fn new(fixer: impl Into<PathBuf>, submission_root: &Path) -> Result<Self> {
        let submission_dir = submission_root
            .file_name()
            .and_then(|n| n.to_str())
            .map(str::to_string)
            .with_context(|| {
                format!("Submission root has no usable name: {}", submission_root.display())
            })?;
        Ok(Self {
            fixer: fixer.into(),
            submission_dir,
        })
    }
}

#[async_trait]
impl PermissionReset for CommandPermissionReset {
    async fn reset(&self) -> Result<()> {
        let status = Command::new(&self.fixer)
            .arg(&self.submission_dir)
            .status()
            .await
            .with_context(|| format!("Failed to launch {}", self.fixer.display()))?;

        if !status.success() {
            bail!(
                "could not reset permissions: {} exited with {}",
                self.fixer.display(),
                status
            );
        }
        debug!(submission_dir = %self.submission_dir, "Permissions reset");
        Ok(())
    }
}

/// For deployments where the sandbox runs as the worker's own user
pub struct NoopPermissionReset;

#[async_trait]
impl PermissionReset for NoopPermissionReset {
    async fn reset(&self) -> Result<()> {
        Ok(())
    }
}
