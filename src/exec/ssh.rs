//! SSH transport and control-master lifecycle helpers.
//!
//! The first command sent to a host opens a persistent master connection;
//! every later command (and streaming spawn) multiplexes over its socket.
//! Masters are closed when the transport is dropped.

use crate::error::SessionError;
use crate::ui::render::RenderSink;
use async_trait::async_trait;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
#[cfg(test)]
use std::sync::{Mutex as StdMutex, OnceLock};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::Mutex;

use super::contracts::Transport;
use super::process::{run_process, spawn_streaming};
use super::types::{ExecOutput, RemoteProcess};

/// Production transport shelling out to the `ssh` client.
pub struct SshTransport {
    program: String,
    sink: Arc<dyn RenderSink>,
    /// Open master sockets keyed by host.
    masters: Mutex<HashMap<String, PathBuf>>,
}

impl SshTransport {
    pub fn new(program: impl Into<String>, sink: Arc<dyn RenderSink>) -> Self {
        Self {
            program: program.into(),
            sink,
            masters: Mutex::new(HashMap::new()),
        }
    }

    /// Return the control socket for `host`, opening the master on first use.
    async fn control_path(&self, host: &str) -> Result<PathBuf, SessionError> {
        let mut masters = self.masters.lock().await;
        if let Some(path) = masters.get(host) {
            return Ok(path.clone());
        }

        let path = build_ssh_control_path(host);
        let args = master_args(host, &path);
        tracing::debug!(%host, socket = %path.display(), "opening ssh control master");
        let output = run_process(&self.program, &args, None)
            .await
            .map_err(|e| io_context(&self.program, e))?;
        if output.exit_code != 0 {
            return Err(SessionError::RemoteExecution {
                command: format!("{} -fN {host}", self.program),
                output: output.stderr.trim().to_string(),
            });
        }
        masters.insert(host.to_string(), path.clone());
        Ok(path)
    }
}

#[async_trait]
impl Transport for SshTransport {
    async fn run(
        &self,
        host: &str,
        command: &str,
        stdin: Option<&[u8]>,
        quiet: bool,
    ) -> Result<ExecOutput, SessionError> {
        if !quiet {
            self.sink.remote_command(host, command);
        }
        let path = self.control_path(host).await?;
        run_process(&self.program, &command_args(host, &path, command, false), stdin)
            .await
            .map_err(|e| io_context(&self.program, e))
    }

    async fn spawn(&self, host: &str, command: &str) -> Result<RemoteProcess, SessionError> {
        self.sink.remote_command(host, command);
        let path = self.control_path(host).await?;
        let process = spawn_streaming(&self.program, &command_args(host, &path, command, true))
            .map_err(|e| io_context(&self.program, e))?;
        tracing::debug!(%host, process = %process.handle.label(), "spawned remote process");
        Ok(process)
    }
}

impl Drop for SshTransport {
    fn drop(&mut self) {
        // Best-effort connection cleanup; failures are non-fatal.
        for (host, path) in self.masters.get_mut().drain() {
            close_ssh_control_connection(&self.program, &host, &path);
        }
    }
}

fn io_context(program: &str, e: std::io::Error) -> SessionError {
    SessionError::Io(std::io::Error::new(e.kind(), format!("{program}: {e}")))
}

fn master_args(host: &str, control_path: &Path) -> Vec<String> {
    vec![
        "-o".into(),
        "ControlMaster=yes".into(),
        "-o".into(),
        "ControlPersist=yes".into(),
        "-S".into(),
        control_path.display().to_string(),
        "-fN".into(),
        host.into(),
    ]
}

/// Arguments for one multiplexed command. Streaming commands get a remote
/// pty so stdout/stderr arrive combined and the remote side is hung up
/// when the local process dies.
fn command_args(host: &str, control_path: &Path, command: &str, streaming: bool) -> Vec<String> {
    vec![
        if streaming { "-tt" } else { "-T" }.into(),
        "-S".into(),
        control_path.display().to_string(),
        "-o".into(),
        "ControlMaster=no".into(),
        host.into(),
        command.into(),
    ]
}

#[cfg(test)]
type SshCloseHook = Box<dyn Fn(&str, &Path) + Send + Sync + 'static>;

#[cfg(test)]
fn ssh_close_hook_slot() -> &'static StdMutex<Option<SshCloseHook>> {
    static SLOT: OnceLock<StdMutex<Option<SshCloseHook>>> = OnceLock::new();
    SLOT.get_or_init(|| StdMutex::new(None))
}

#[cfg(test)]
fn set_ssh_close_hook_for_tests(hook: Option<SshCloseHook>) {
    *ssh_close_hook_slot().lock().expect("ssh close hook lock") = hook;
}

fn close_ssh_control_connection(program: &str, host: &str, control_path: &Path) {
    #[cfg(test)]
    {
        if let Some(hook) = ssh_close_hook_slot()
            .lock()
            .expect("ssh close hook lock")
            .as_ref()
        {
            hook(host, control_path);
            return;
        }
    }

    tracing::debug!(%host, "closing ssh control master");
    let _ = std::process::Command::new(program)
        .arg("-S")
        .arg(control_path)
        .arg("-O")
        .arg("exit")
        .arg(host)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();
    let _ = std::fs::remove_file(control_path);
}

fn build_ssh_control_path(host: &str) -> PathBuf {
    let mut hasher = DefaultHasher::new();
    host.hash(&mut hasher);
    std::process::id().hash(&mut hasher);
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos()
        .hash(&mut hasher);
    let hash = hasher.finish();
    std::env::temp_dir().join(format!("slurmtap-ssh-{hash:x}.sock"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testsupport::RecordingSink;

    #[test]
    fn streaming_commands_request_a_tty() {
        let args = command_args("login", Path::new("/tmp/s.sock"), "hostname", true);
        assert_eq!(args[0], "-tt");
        assert_eq!(args[args.len() - 2], "login");
        assert_eq!(args[args.len() - 1], "hostname");
        let args = command_args("login", Path::new("/tmp/s.sock"), "hostname", false);
        assert_eq!(args[0], "-T");
        assert!(args.contains(&"ControlMaster=no".to_string()));
    }

    #[test]
    fn master_runs_in_background_with_persist() {
        let args = master_args("cn-a001", Path::new("/tmp/m.sock"));
        assert!(args.contains(&"ControlPersist=yes".to_string()));
        assert!(args.contains(&"-fN".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("cn-a001"));
    }

    #[test]
    fn control_paths_are_distinct_per_host() {
        let a = build_ssh_control_path("login");
        let b = build_ssh_control_path("cn-a001");
        assert_ne!(a, b);
        assert!(a
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with("slurmtap-ssh-")));
    }

    #[test]
    fn dropping_transport_closes_every_master() {
        let observed = Arc::new(std::sync::Mutex::new(Vec::<(String, PathBuf)>::new()));
        let observed_clone = Arc::clone(&observed);
        set_ssh_close_hook_for_tests(Some(Box::new(move |host, path| {
            observed_clone
                .lock()
                .expect("observed lock")
                .push((host.to_string(), path.to_path_buf()));
        })));

        let transport = SshTransport {
            program: "ssh".into(),
            sink: Arc::new(RecordingSink::default()),
            masters: Mutex::new(HashMap::from([
                ("login".to_string(), PathBuf::from("/tmp/slurmtap-a.sock")),
                ("cn-a001".to_string(), PathBuf::from("/tmp/slurmtap-b.sock")),
            ])),
        };
        drop(transport);
        set_ssh_close_hook_for_tests(None);

        let mut captured = observed.lock().expect("observed lock").clone();
        captured.sort();
        assert_eq!(
            captured,
            vec![
                ("cn-a001".to_string(), PathBuf::from("/tmp/slurmtap-b.sock")),
                ("login".to_string(), PathBuf::from("/tmp/slurmtap-a.sock")),
            ]
        );
    }
}
