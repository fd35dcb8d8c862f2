//! Remote and local execution.
//!
//! A [`RemoteEndpoint`] is an immutable handle to one host plus an execution
//! context (shell wrapper, profile script, precommand). Deriving a variant
//! returns a new handle; the original never changes. Commands reach the host
//! through a [`Transport`], which is ssh in production and a scripted fake in
//! tests.

mod contracts;
mod local;
mod process;
mod ssh;
mod types;

use crate::error::SessionError;
use crate::extract::{ExtractionSpec, OutputPatternExtractor, PendingExtraction};
use crate::ui::render::RenderSink;
use std::sync::Arc;

pub use contracts::{LocalLauncher, Transport};
pub use local::SystemLauncher;
pub(crate) use process::ensure_success;
pub use process::{shell_join, shell_quote, shell_quote_path};
pub use ssh::SshTransport;
pub(crate) use types::CommandTransform;
pub use types::{ExecOutput, ManagedProcess, OutputStream, ProcessHandle, RemoteProcess};

/// Handle to a host plus the context commands run in.
#[derive(Clone)]
pub struct RemoteEndpoint {
    host: String,
    transport: Arc<dyn Transport>,
    transforms: Vec<CommandTransform>,
    echo: Option<Arc<dyn RenderSink>>,
}

impl RemoteEndpoint {
    pub fn new(host: impl Into<String>, transport: Arc<dyn Transport>) -> Self {
        Self {
            host: host.into(),
            transport,
            transforms: Vec::new(),
            echo: None,
        }
    }

    /// Stream the output of extracted commands to `sink`.
    pub fn with_output_sink(&self, sink: Arc<dyn RenderSink>) -> Self {
        let mut next = self.clone();
        next.echo = Some(sink);
        next
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// Same transport and output sink, different host, fresh context.
    pub fn at_host(&self, host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            transport: Arc::clone(&self.transport),
            transforms: Vec::new(),
            echo: self.echo.clone(),
        }
    }

    /// Run every command through `bash -c`.
    pub fn with_shell_wrapper(&self) -> Self {
        self.derive(CommandTransform::Shell)
    }

    /// Source `profile` before every command.
    pub fn with_profile(&self, profile: impl Into<String>) -> Self {
        self.derive(CommandTransform::Profile(profile.into()))
    }

    /// Run `precommand` before every command.
    pub fn with_precommand(&self, precommand: impl Into<String>) -> Self {
        self.derive(CommandTransform::Precommand(precommand.into()))
    }

    fn derive(&self, transform: CommandTransform) -> Self {
        let mut next = self.clone();
        next.transforms.push(transform);
        next
    }

    /// Apply the context transforms, oldest first.
    pub fn wrap(&self, command: &str) -> String {
        self.transforms
            .iter()
            .fold(command.to_string(), |cmd, transform| match transform {
                CommandTransform::Shell => shell_join(&["bash", "-c", cmd.as_str()]),
                CommandTransform::Profile(profile) => format!("source {profile} && {cmd}"),
                CommandTransform::Precommand(pre) => format!("{pre} && {cmd}"),
            })
    }

    /// Run a command, failing with the captured output on non-zero exit.
    pub async fn run(&self, command: &str) -> Result<ExecOutput, SessionError> {
        self.run_with(command, None, false).await
    }

    /// Like [`run`](Self::run) without echoing the command.
    pub async fn run_quiet(&self, command: &str) -> Result<ExecOutput, SessionError> {
        self.run_with(command, None, true).await
    }

    /// Run a command quietly and return its output whatever the exit status.
    pub async fn probe(&self, command: &str) -> Result<ExecOutput, SessionError> {
        let wrapped = self.wrap(command);
        self.transport.run(&self.host, &wrapped, None, true).await
    }

    async fn run_with(
        &self,
        command: &str,
        stdin: Option<&[u8]>,
        quiet: bool,
    ) -> Result<ExecOutput, SessionError> {
        let wrapped = self.wrap(command);
        let output = self.transport.run(&self.host, &wrapped, stdin, quiet).await?;
        ensure_success(output, &wrapped)
    }

    /// Trimmed stdout of a command.
    pub async fn get_output(&self, command: &str) -> Result<String, SessionError> {
        Ok(self.run(command).await?.stdout.trim().to_string())
    }

    /// Whitespace-separated words of a command's stdout.
    pub async fn get_lines(&self, command: &str) -> Result<Vec<String>, SessionError> {
        Ok(self
            .run(command)
            .await?
            .stdout
            .split_whitespace()
            .map(str::to_string)
            .collect())
    }

    /// Remote `$HOME`.
    pub async fn home(&self) -> Result<String, SessionError> {
        Ok(self.run_quiet("echo $HOME").await?.stdout.trim().to_string())
    }

    /// Write `text` to `dest`, creating parent directories.
    pub async fn put_text(&self, text: &str, dest: &str) -> Result<(), SessionError> {
        let script = match dest.rsplit_once('/') {
            Some((parent, _)) if !parent.is_empty() => {
                format!("mkdir -p {parent} && cat > {dest}")
            }
            _ => format!("cat > {dest}"),
        };
        self.run_with(&script, Some(text.as_bytes()), true)
            .await
            .map(|_| ())
    }

    /// Start a long-lived command and stream its output.
    pub async fn spawn(&self, command: &str) -> Result<RemoteProcess, SessionError> {
        let wrapped = self.wrap(command);
        self.transport.spawn(&self.host, &wrapped).await
    }

    /// Start `command` and harvest `patterns` from its output.
    ///
    /// Returns as soon as the process is running; await the pending result
    /// for the captured fields.
    pub async fn extract(
        &self,
        command: &str,
        patterns: ExtractionSpec,
    ) -> Result<(ProcessHandle, PendingExtraction), SessionError> {
        let process = self.spawn(command).await?;
        Ok(OutputPatternExtractor::start(
            process,
            patterns,
            self.echo.clone(),
        ))
    }
}

impl std::fmt::Debug for RemoteEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteEndpoint")
            .field("host", &self.host)
            .field("transforms", &self.transforms)
            .finish()
    }
}
