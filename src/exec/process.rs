//! Process spawning and shell helpers shared by the ssh and local backends.

use crate::error::SessionError;
use async_trait::async_trait;
use std::process::Stdio;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};

use super::types::{ExecOutput, ManagedProcess, ProcessHandle, RemoteProcess};

/// Spawn and wait for a process, optionally piping stdin.
pub(crate) async fn run_process(
    program: &str,
    args: &[String],
    stdin: Option<&[u8]>,
) -> std::io::Result<ExecOutput> {
    let mut cmd = Command::new(program);
    // Aborted flows drop in-flight futures; the child must die with them.
    cmd.kill_on_drop(true);
    cmd.args(args).stdout(Stdio::piped()).stderr(Stdio::piped());
    if stdin.is_some() {
        cmd.stdin(Stdio::piped());
    } else {
        cmd.stdin(Stdio::null());
    }

    let mut child = cmd.spawn()?;

    if let Some(input) = stdin {
        if let Some(mut child_stdin) = child.stdin.take() {
            child_stdin.write_all(input).await?;
        }
    }

    let output = child.wait_with_output().await?;

    Ok(ExecOutput {
        exit_code: output.status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
    })
}

/// Spawn a long-lived process whose stdout is exposed as a line stream.
///
/// Stdin stays piped and open for the lifetime of the handle: scheduler
/// front-ends such as `salloc` release their allocation on stdin EOF.
pub(crate) fn spawn_streaming(program: &str, args: &[String]) -> std::io::Result<RemoteProcess> {
    let mut cmd = Command::new(program);
    cmd.kill_on_drop(true);
    cmd.args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit());

    let mut child = cmd.spawn()?;
    let stdout = child.stdout.take().ok_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::BrokenPipe, "child stdout unavailable")
    })?;
    let stdin = child.stdin.take();
    let label = format!("{program} {}", args.last().map(String::as_str).unwrap_or(""));

    Ok(RemoteProcess {
        handle: ProcessHandle::new(label, Box::new(ChildProcess::new(child, stdin))),
        output: Box::new(BufReader::new(stdout)),
    })
}

/// Spawn a local process with inherited stdout/stderr.
pub(crate) fn spawn_detached_io(argv: &[String]) -> std::io::Result<ProcessHandle> {
    let (program, args) = argv.split_first().ok_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::InvalidInput, "empty command line")
    })?;
    let mut cmd = Command::new(program);
    cmd.kill_on_drop(true);
    cmd.args(args).stdin(Stdio::null());
    let child = cmd.spawn()?;
    Ok(ProcessHandle::new(
        shell_join(argv),
        Box::new(ChildProcess::new(child, None)),
    ))
}

/// tokio child wrapper implementing the shared process contract.
pub(crate) struct ChildProcess {
    child: Child,
    _stdin: Option<ChildStdin>,
}

impl ChildProcess {
    pub(crate) fn new(child: Child, stdin: Option<ChildStdin>) -> Self {
        Self {
            child,
            _stdin: stdin,
        }
    }
}

#[async_trait]
impl ManagedProcess for ChildProcess {
    fn start_kill(&mut self) -> std::io::Result<()> {
        match self.child.start_kill() {
            // Already reaped.
            Err(e) if e.kind() == std::io::ErrorKind::InvalidInput => Ok(()),
            other => other,
        }
    }

    async fn wait(&mut self) -> std::io::Result<Option<i32>> {
        Ok(self.child.wait().await?.code())
    }
}

/// Convert non-zero command status into a remote execution error that keeps
/// the captured output for diagnosis.
pub(crate) fn ensure_success(output: ExecOutput, command: &str) -> Result<ExecOutput, SessionError> {
    if output.exit_code == 0 {
        return Ok(output);
    }

    let mut details = if output.stderr.trim().is_empty() {
        output.stdout.trim().to_string()
    } else {
        output.stderr.trim().to_string()
    };
    if details.is_empty() {
        details = format!("command exited with {}", output.exit_code);
    }

    Err(SessionError::RemoteExecution {
        command: command.to_string(),
        output: details,
    })
}

/// Shell-safe quoting; words made only of safe characters pass through.
pub fn shell_quote(s: &str) -> String {
    if s.is_empty() {
        return "''".into();
    }
    let safe = s
        .chars()
        .all(|ch| ch.is_ascii_alphanumeric() || "@%+=:,./_-".contains(ch));
    if safe {
        s.to_string()
    } else {
        format!("'{}'", s.replace('\'', "'\\''"))
    }
}

/// [`shell_quote`] for a path; a leading `~` stays bare so the remote shell
/// still expands it.
pub fn shell_quote_path(path: &str) -> String {
    if path == "~" {
        return path.to_string();
    }
    match path.strip_prefix("~/") {
        Some("") => "~/".to_string(),
        Some(rest) => format!("~/{}", shell_quote(rest)),
        None => shell_quote(path),
    }
}

/// Join words into one shell command line.
pub fn shell_join<S: AsRef<str>>(words: &[S]) -> String {
    words
        .iter()
        .map(|w| shell_quote(w.as_ref()))
        .collect::<Vec<_>>()
        .join(" ")
}
