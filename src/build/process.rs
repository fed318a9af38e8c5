//! Subprocess Dispatch
//!
//! Runs an expanded command line through the platform shell. The
//! `CommandRunner` trait is the seam between the executor and the
//! operating system; tests substitute a scripted runner. Output is
//! captured rather than inherited so the executor can emit each task's
//! lines as one contiguous block.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

use crate::build::cancel::CancelToken;
use crate::errors::{BuildError, Result};

/// Default timeout applied by `SpawnOptions::default()`. Build steps
/// pass `None` instead, since a compile may legitimately run long.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Options for one command invocation.
#[derive(Debug, Clone)]
pub struct SpawnOptions {
    /// Working directory for the child, normally the workspace root.
    pub cwd: PathBuf,
    /// Kill the child and report an error after this long.
    pub timeout: Option<Duration>,
}

impl Default for SpawnOptions {
    fn default() -> Self {
        Self {
            cwd: PathBuf::from("."),
            timeout: Some(DEFAULT_TIMEOUT),
        }
    }
}

/// Captured result of a completed command.
#[derive(Debug, Clone, Default)]
pub struct ExecResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl ExecResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Command execution seam. `Err` is reserved for spawn failures,
/// timeouts and cancellation; an ordinary non-zero exit comes back as
/// an `ExecResult`.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(
        &self,
        command: &str,
        options: &SpawnOptions,
        cancel: &CancelToken,
    ) -> Result<ExecResult>;
}

/// Runs commands through `cmd /s /c` on Windows and `sh -c` elsewhere.
pub struct ShellRunner;

#[async_trait]
impl CommandRunner for ShellRunner {
    async fn run(
        &self,
        command: &str,
        options: &SpawnOptions,
        cancel: &CancelToken,
    ) -> Result<ExecResult> {
        let mut child = shell_command(command)
            .current_dir(&options.cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| BuildError::SpawnFailed(e.to_string()))?;

        // Drain both pipes concurrently with the wait, so a chatty
        // child never blocks on a full pipe.
        let stdout_task = tokio::spawn(read_stream(child.stdout.take()));
        let stderr_task = tokio::spawn(read_stream(child.stderr.take()));

        let status = tokio::select! {
            status = child.wait() => {
                status.map_err(|e| BuildError::SpawnFailed(e.to_string()))?
            }
            _ = cancel.cancelled() => {
                let _ = child.kill().await;
                return Err(BuildError::Cancelled);
            }
            _ = expiry(options.timeout) => {
                let _ = child.kill().await;
                return Err(BuildError::CommandTimeout(
                    options.timeout.unwrap_or(DEFAULT_TIMEOUT),
                ));
            }
        };

        let stdout = stdout_task.await.unwrap_or_default();
        let stderr = stderr_task.await.unwrap_or_default();

        match status.code() {
            Some(code) => Ok(ExecResult {
                stdout,
                stderr,
                exit_code: code,
            }),
            None => Err(BuildError::CommandKilled),
        }
    }
}

/// Sleep for the timeout, or forever when no timeout is set.
async fn expiry(timeout: Option<Duration>) {
    match timeout {
        Some(t) => tokio::time::sleep(t).await,
        None => std::future::pending().await,
    }
}

fn shell_command(command: &str) -> Command {
    if cfg!(windows) {
        let mut cmd = Command::new("cmd");
        cmd.arg("/s").arg("/c").arg(command);
        cmd
    } else {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(command);
        cmd
    }
}

async fn read_stream<R>(stream: Option<R>) -> String
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
{
    use tokio::io::AsyncReadExt;
    let mut buffer = String::new();
    if let Some(mut stream) = stream {
        let _ = stream.read_to_string(&mut buffer).await;
    }
    buffer
}

// ============================================================================
// Tests
// ============================================================================
