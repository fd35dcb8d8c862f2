//! Local process launcher.

use crate::error::SessionError;
use crate::ui::render::RenderSink;
use async_trait::async_trait;
use std::sync::Arc;

use super::contracts::LocalLauncher;
use super::process::spawn_detached_io;
use super::types::ProcessHandle;

/// Spawns real local processes, echoing each command line first.
pub struct SystemLauncher {
    sink: Arc<dyn RenderSink>,
}

impl SystemLauncher {
    pub fn new(sink: Arc<dyn RenderSink>) -> Self {
        Self { sink }
    }
}

#[async_trait]
impl LocalLauncher for SystemLauncher {
    async fn popen(&self, argv: &[String]) -> Result<ProcessHandle, SessionError> {
        self.sink.local_command(argv);
        let handle = spawn_detached_io(argv).map_err(|e| {
            let program = argv.first().map(String::as_str).unwrap_or("<empty>");
            SessionError::Io(std::io::Error::new(e.kind(), format!("{program}: {e}")))
        })?;
        tracing::debug!(process = %handle.label(), "spawned local process");
        Ok(handle)
    }
}
