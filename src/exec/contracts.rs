//! Backend contracts that decouple endpoints and tunnels from real ssh.

use crate::error::SessionError;
use async_trait::async_trait;

use super::types::{ExecOutput, ProcessHandle, RemoteProcess};

/// Executes commands on named hosts.
///
/// `SshTransport` is the production implementation; tests script a fake.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Run one command to completion, optionally piping stdin. `quiet`
    /// suppresses the user-facing command echo.
    async fn run(
        &self,
        host: &str,
        command: &str,
        stdin: Option<&[u8]>,
        quiet: bool,
    ) -> Result<ExecOutput, SessionError>;

    /// Start a long-lived command whose combined output is streamed back.
    async fn spawn(&self, host: &str, command: &str) -> Result<RemoteProcess, SessionError>;
}

/// Starts processes on the local machine.
#[async_trait]
pub trait LocalLauncher: Send + Sync {
    /// Spawn `argv` without waiting for it.
    async fn popen(&self, argv: &[String]) -> Result<ProcessHandle, SessionError>;
}
