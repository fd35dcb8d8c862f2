//! Shared execution data structures: command output, process handles and
//! remote output streams.

use async_trait::async_trait;
use tokio::io::AsyncBufRead;

/// Structured process output for run-to-completion commands.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ExecOutput {
    /// Successful output carrying only stdout.
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            exit_code: 0,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// Failed output carrying an exit code and stderr.
    pub fn failed(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            exit_code,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }
}

/// Minimal lifecycle contract for a spawned process (local or remote).
#[async_trait]
pub trait ManagedProcess: Send {
    /// Request termination without waiting for it.
    fn start_kill(&mut self) -> std::io::Result<()>;
    /// Wait for exit; `None` when the exit code is unavailable (signal).
    async fn wait(&mut self) -> std::io::Result<Option<i32>>;
}

/// Owned handle to a live process.
///
/// Dropping a handle that has not been waited on requests termination, so a
/// process started by a flow never outlives the flow on an early return.
pub struct ProcessHandle {
    label: String,
    inner: Box<dyn ManagedProcess>,
    finished: bool,
}

impl ProcessHandle {
    pub fn new(label: impl Into<String>, inner: Box<dyn ManagedProcess>) -> Self {
        Self {
            label: label.into(),
            inner,
            finished: false,
        }
    }

    /// Short description used in logs.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Wait for the process to exit on its own.
    pub async fn wait(&mut self) -> std::io::Result<Option<i32>> {
        let status = self.inner.wait().await?;
        self.finished = true;
        Ok(status)
    }

    /// Kill the process and reap it. Failures are logged, never returned:
    /// termination must be attempted on every exit path.
    pub async fn terminate(&mut self) {
        if self.finished {
            return;
        }
        if let Err(e) = self.inner.start_kill() {
            tracing::debug!(process = %self.label, "kill request failed: {e}");
        }
        match self.inner.wait().await {
            Ok(status) => tracing::debug!(process = %self.label, ?status, "process terminated"),
            Err(e) => tracing::warn!(process = %self.label, "failed to reap process: {e}"),
        }
        self.finished = true;
    }
}

impl Drop for ProcessHandle {
    fn drop(&mut self) {
        if !self.finished {
            let _ = self.inner.start_kill();
        }
    }
}

impl std::fmt::Debug for ProcessHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessHandle")
            .field("label", &self.label)
            .field("finished", &self.finished)
            .finish()
    }
}

/// Combined stdout/stderr of a streaming process, read line by line.
pub type OutputStream = Box<dyn AsyncBufRead + Send + Unpin>;

/// A streaming process plus its output.
pub struct RemoteProcess {
    pub handle: ProcessHandle,
    pub output: OutputStream,
}

/// One step of execution-context wrapping, applied in insertion order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum CommandTransform {
    /// `bash -c <command>`, for login shells that misbehave under scheduler tools.
    Shell,
    /// `source <profile> && <command>`
    Profile(String),
    /// `<precommand> && <command>`
    Precommand(String),
}
