//! Shared test fixtures for execution, extraction and orchestration tests.
//!
//! Flows are exercised against scripted fakes: a transport that answers
//! commands by substring and hands out canned output streams, a launcher
//! that records argv, and sinks that capture what would have been shown.

use crate::browser::UrlOpener;
use crate::error::SessionError;
use crate::exec::{
    ExecOutput, LocalLauncher, ManagedProcess, ProcessHandle, RemoteProcess, Transport,
};
use crate::ui::render::{HintTone, RenderSink};
use async_trait::async_trait;
use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::io::{AsyncReadExt, BufReader, DuplexStream};

static TEST_DIR_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Temporary directory fixture with best-effort cleanup.
#[derive(Debug)]
pub struct TestTempDir {
    path: PathBuf,
}

impl TestTempDir {
    /// Create a unique temporary directory with a readable prefix.
    pub fn new(prefix: &str) -> Self {
        let suffix = TEST_DIR_COUNTER.fetch_add(1, Ordering::Relaxed);
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();
        let dir = std::env::temp_dir().join(format!(
            "slurmtap-{prefix}-{}-{millis}-{suffix}",
            std::process::id()
        ));
        fs::create_dir_all(&dir).expect("failed to create temporary fixture directory");
        Self { path: dir }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Build a child path under the fixture root.
    pub fn child(&self, relative: &str) -> PathBuf {
        self.path.join(relative)
    }
}

impl Drop for TestTempDir {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.path);
    }
}

// ---------------------------------------------------------------------------
// Processes
// ---------------------------------------------------------------------------

/// Shared record of which fake processes were killed.
#[derive(Debug, Clone, Default)]
pub struct ProcessLog {
    kills: Arc<Mutex<Vec<String>>>,
}

impl ProcessLog {
    pub fn kills(&self) -> Vec<String> {
        self.kills.lock().expect("process log lock").clone()
    }

    fn record_kill(&self, label: &str) {
        self.kills
            .lock()
            .expect("process log lock")
            .push(label.to_string());
    }
}

/// Process that either exits immediately (status 0 unless configured) or
/// runs until killed.
///
/// Killing it also closes its output stream, like a real process would.
pub struct FakeProcess {
    label: String,
    log: ProcessLog,
    keep_alive: bool,
    exit_code: i32,
    killed: bool,
    writer: Option<DuplexStream>,
}

impl FakeProcess {
    pub fn new(label: &str, keep_alive: bool, log: &ProcessLog) -> Self {
        Self {
            label: label.to_string(),
            log: log.clone(),
            keep_alive,
            exit_code: 0,
            killed: false,
            writer: None,
        }
    }

    pub fn with_exit_code(mut self, exit_code: i32) -> Self {
        self.exit_code = exit_code;
        self
    }
}

#[async_trait]
impl ManagedProcess for FakeProcess {
    fn start_kill(&mut self) -> std::io::Result<()> {
        if !self.killed {
            self.killed = true;
            self.writer = None;
            self.log.record_kill(&self.label);
        }
        Ok(())
    }

    async fn wait(&mut self) -> std::io::Result<Option<i32>> {
        if self.killed {
            return Ok(None);
        }
        if !self.keep_alive {
            return Ok(Some(self.exit_code));
        }
        std::future::pending().await
    }
}

/// Streaming process that prints `lines`, then either exits or keeps its
/// output open until killed.
pub fn fake_remote_process(
    label: &str,
    lines: &[&str],
    keep_alive: bool,
    log: &ProcessLog,
) -> RemoteProcess {
    let mut bytes = Vec::new();
    for line in lines {
        bytes.extend_from_slice(line.as_bytes());
        bytes.push(b'\n');
    }
    let (writer, reader) = tokio::io::duplex(64);
    let mut process = FakeProcess::new(label, keep_alive, log);
    if keep_alive {
        process.writer = Some(writer);
    }
    RemoteProcess {
        handle: ProcessHandle::new(label, Box::new(process)),
        output: Box::new(BufReader::new(Cursor::new(bytes).chain(reader))),
    }
}

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

struct ScriptedStream {
    needle: String,
    lines: Vec<String>,
    keep_alive: bool,
}

#[derive(Default)]
struct FakeTransportState {
    responses: Vec<(String, ExecOutput)>,
    streams: Vec<ScriptedStream>,
    commands: Vec<String>,
    stdin_payloads: Vec<String>,
}

/// Transport answering commands from a script.
///
/// `run` returns the response of the first registered needle contained in
/// the command, or empty success. `spawn` consumes the first matching
/// scripted stream, or yields a process that exits without output.
#[derive(Default)]
pub struct FakeTransport {
    state: Mutex<FakeTransportState>,
    log: ProcessLog,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&self, needle: &str, output: ExecOutput) {
        self.state
            .lock()
            .expect("fake transport lock")
            .responses
            .push((needle.to_string(), output));
    }

    /// Script the output of the next spawned command containing `needle`.
    pub fn stream(&self, needle: &str, lines: &[&str], keep_alive: bool) {
        self.state
            .lock()
            .expect("fake transport lock")
            .streams
            .push(ScriptedStream {
                needle: needle.to_string(),
                lines: lines.iter().map(|l| l.to_string()).collect(),
                keep_alive,
            });
    }

    /// Every command seen, as `host: command`.
    pub fn commands(&self) -> Vec<String> {
        self.state.lock().expect("fake transport lock").commands.clone()
    }

    pub fn commands_containing(&self, needle: &str) -> Vec<String> {
        self.commands()
            .into_iter()
            .filter(|c| c.contains(needle))
            .collect()
    }

    pub fn stdin_payloads(&self) -> Vec<String> {
        self.state
            .lock()
            .expect("fake transport lock")
            .stdin_payloads
            .clone()
    }

    /// Labels of spawned processes that were killed.
    pub fn kills(&self) -> Vec<String> {
        self.log.kills()
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn run(
        &self,
        host: &str,
        command: &str,
        stdin: Option<&[u8]>,
        _quiet: bool,
    ) -> Result<ExecOutput, SessionError> {
        let mut state = self.state.lock().expect("fake transport lock");
        state.commands.push(format!("{host}: {command}"));
        if let Some(input) = stdin {
            state
                .stdin_payloads
                .push(String::from_utf8_lossy(input).to_string());
        }
        Ok(state
            .responses
            .iter()
            .find(|(needle, _)| command.contains(needle.as_str()))
            .map(|(_, output)| output.clone())
            .unwrap_or_default())
    }

    async fn spawn(&self, host: &str, command: &str) -> Result<RemoteProcess, SessionError> {
        let mut state = self.state.lock().expect("fake transport lock");
        state.commands.push(format!("{host}: {command}"));
        let scripted = state
            .streams
            .iter()
            .position(|s| command.contains(s.needle.as_str()))
            .map(|idx| state.streams.remove(idx));
        let label = format!("{host}: {command}");
        Ok(match scripted {
            Some(s) => {
                let lines: Vec<&str> = s.lines.iter().map(String::as_str).collect();
                fake_remote_process(&label, &lines, s.keep_alive, &self.log)
            }
            None => fake_remote_process(&label, &[], false, &self.log),
        })
    }
}

// ---------------------------------------------------------------------------
// Local launcher
// ---------------------------------------------------------------------------

/// Records local argv and hands out fake processes.
#[derive(Default)]
pub struct FakeLauncher {
    launched: Mutex<Vec<Vec<String>>>,
    log: ProcessLog,
    /// Exit status of launched processes; `None` keeps them running.
    exit_code: Option<i32>,
}

impl FakeLauncher {
    /// Launched processes run until killed.
    pub fn new() -> Self {
        Self::default()
    }

    /// Launched processes exit on their own right away.
    pub fn exiting() -> Self {
        Self::exiting_with(0)
    }

    /// Launched processes exit right away with `exit_code`.
    pub fn exiting_with(exit_code: i32) -> Self {
        Self {
            exit_code: Some(exit_code),
            ..Self::default()
        }
    }

    pub fn launched(&self) -> Vec<Vec<String>> {
        self.launched.lock().expect("fake launcher lock").clone()
    }

    pub fn kills(&self) -> Vec<String> {
        self.log.kills()
    }
}

#[async_trait]
impl LocalLauncher for FakeLauncher {
    async fn popen(&self, argv: &[String]) -> Result<ProcessHandle, SessionError> {
        self.launched
            .lock()
            .expect("fake launcher lock")
            .push(argv.to_vec());
        let label = argv.first().cloned().unwrap_or_default();
        let process = FakeProcess::new(&label, self.exit_code.is_none(), &self.log)
            .with_exit_code(self.exit_code.unwrap_or(0));
        Ok(ProcessHandle::new(label.clone(), Box::new(process)))
    }
}

// ---------------------------------------------------------------------------
// Rendering and browser
// ---------------------------------------------------------------------------

/// Captures rendered output as `kind: text` lines.
#[derive(Debug, Default)]
pub struct RecordingSink {
    lines: Mutex<Vec<String>>,
}

impl RecordingSink {
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().expect("recording sink lock").clone()
    }

    pub fn lines_with_prefix(&self, prefix: &str) -> Vec<String> {
        self.lines()
            .into_iter()
            .filter(|l| l.starts_with(prefix))
            .collect()
    }

    fn push(&self, line: String) {
        self.lines.lock().expect("recording sink lock").push(line);
    }
}

impl RenderSink for RecordingSink {
    fn local_command(&self, argv: &[String]) {
        self.push(format!("local: {}", argv.join(" ")));
    }

    fn remote_command(&self, host: &str, command: &str) {
        self.push(format!("remote: {host}: {command}"));
    }

    fn remote_output(&self, line: &str) {
        self.push(format!("output: {line}"));
    }

    fn activity(&self, text: &str) {
        self.push(format!("activity: {text}"));
    }

    fn field(&self, key: &str, value: &str) {
        self.push(format!("field: {key}={value}"));
    }

    fn hint(&self, label: &str, command: &str, tone: HintTone) {
        self.push(format!("hint: {label} | {command} | {tone:?}"));
    }

    fn warn(&self, msg: &str) {
        self.push(format!("warn: {msg}"));
    }

    fn error(&self, msg: &str) {
        self.push(format!("error: {msg}"));
    }
}

/// Captures URLs instead of launching a browser.
#[derive(Debug, Default)]
pub struct RecordingOpener {
    urls: Mutex<Vec<String>>,
}

impl RecordingOpener {
    pub fn urls(&self) -> Vec<String> {
        self.urls.lock().expect("recording opener lock").clone()
    }
}

impl UrlOpener for RecordingOpener {
    fn open(&self, url: &str) -> bool {
        self.urls
            .lock()
            .expect("recording opener lock")
            .push(url.to_string());
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncBufReadExt;

    #[test]
    fn temp_dir_fixture_is_removed_on_drop() {
        let path = {
            let fixture = TestTempDir::new("fixture");
            fs::write(fixture.child("a.txt"), "x").expect("write");
            fixture.path().to_path_buf()
        };
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn killing_a_live_fake_closes_its_stream() {
        let log = ProcessLog::default();
        let mut process = fake_remote_process("srv", &["hello"], true, &log);
        let mut line = String::new();
        process.output.read_line(&mut line).await.expect("read");
        assert_eq!(line, "hello\n");

        process.handle.terminate().await;
        line.clear();
        let n = process.output.read_line(&mut line).await.expect("read");
        assert_eq!(n, 0);
        assert_eq!(log.kills(), vec!["srv".to_string()]);
    }

    #[tokio::test]
    async fn fake_transport_consumes_streams_in_order() {
        let fake = FakeTransport::new();
        fake.stream("srun", &["one"], false);
        fake.stream("srun", &["two"], false);
        let mut first = fake.spawn("login", "srun a").await.expect("spawn");
        let mut second = fake.spawn("login", "srun b").await.expect("spawn");
        let mut line = String::new();
        first.output.read_line(&mut line).await.expect("read");
        assert_eq!(line.trim(), "one");
        line.clear();
        second.output.read_line(&mut line).await.expect("read");
        assert_eq!(line.trim(), "two");
        assert_eq!(fake.commands().len(), 2);
    }
}
