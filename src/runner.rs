//! The out-of-process command boundary.
//!
//! Everything this crate does against the cloud happens through one
//! narrow contract: run a shell-level command, get its captured stdout
//! back, or an error carrying the diagnostic output. Pipelines take the
//! runner as a trait object so tests can script it.

use async_trait::async_trait;
use tokio::process::Command;
use tracing::info;

use crate::{EsflowError, Result};

/// Executes a shell-level command and returns its captured output.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `cmd` out of process. Returns captured stdout on success; a
    /// spawn failure or nonzero exit yields `EsflowError::Execution` with
    /// the captured stderr.
    async fn run(
        &self,
        cmd: &str,
        verbose: bool,
    ) -> Result<String>;
}

/// Runs commands through a shell via `tokio::process`.
#[derive(Debug, Clone)]
pub struct ShellRunner {
    shell: String,
}

impl ShellRunner {
    pub fn new() -> Self {
        Self::with_shell("sh")
    }

    pub fn with_shell(shell: impl Into<String>) -> Self {
        Self {
            shell: shell.into(),
        }
    }
}

impl Default for ShellRunner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CommandRunner for ShellRunner {
    async fn run(
        &self,
        cmd: &str,
        verbose: bool,
    ) -> Result<String> {
        let output = Command::new(&self.shell)
            .arg("-c")
            .arg(cmd)
            .output()
            .await
            .map_err(|e| EsflowError::Execution(format!("failed to spawn {cmd}: {e}")))?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(EsflowError::Execution(format!("command exited with {}: {}", output.status, stderr.trim())));
        }

        if verbose {
            info!("{stdout}");
        }

        Ok(stdout)
    }
}
