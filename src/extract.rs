//! Harvesting named fields from a live process output stream.
//!
//! [`PatternScanner`] is the line-at-a-time state machine: it holds the
//! patterns still waiting for a match plus the fields captured so far, and
//! knows nothing about processes. [`OutputPatternExtractor`] drives a scanner
//! from a spawned process on a background task, echoing every line, and
//! keeps draining the stream after completion so the process never blocks
//! on a full pipe.

use crate::error::SessionError;
use crate::exec::{ProcessHandle, RemoteProcess};
use crate::ui::render::RenderSink;
use regex::Regex;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncReadExt};
use tokio::sync::oneshot;

/// Longest chunk of output scanned as one line; longer lines are split.
const MAX_LINE_BYTES: u64 = 64 * 1024;

/// Field names to single-capture-group patterns.
#[derive(Debug, Clone, Default)]
pub struct ExtractionSpec {
    patterns: Vec<(String, Regex)>,
}

impl ExtractionSpec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a field. The pattern must compile, contain exactly one capturing
    /// group, and the name must not already be used.
    pub fn field(mut self, name: &str, pattern: &str) -> Result<Self, SessionError> {
        if self.contains(name) {
            return Err(SessionError::Configuration(format!(
                "duplicate extraction field `{name}`"
            )));
        }
        let regex = Regex::new(pattern).map_err(|e| {
            SessionError::Configuration(format!("invalid pattern for `{name}`: {e}"))
        })?;
        // captures_len counts the implicit whole-match group.
        if regex.captures_len() != 2 {
            return Err(SessionError::Configuration(format!(
                "pattern for `{name}` must have exactly one capturing group: {pattern}"
            )));
        }
        self.patterns.push((name.to_string(), regex));
        Ok(self)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.patterns.iter().any(|(n, _)| n == name)
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

/// Captured fields, in the order their patterns first matched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractionResult {
    fields: Vec<(String, String)>,
}

impl ExtractionResult {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    /// Field names in match order.
    pub fn names(&self) -> Vec<&str> {
        self.fields.iter().map(|(n, _)| n.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Value of a field the caller required in its spec.
    pub fn require(&self, name: &str) -> Result<&str, SessionError> {
        self.get(name).ok_or_else(|| SessionError::OutputExtraction {
            missing: vec![name.to_string()],
        })
    }
}

/// Incremental matcher over output lines.
#[derive(Debug)]
pub struct PatternScanner {
    remaining: Vec<(String, Regex)>,
    found: ExtractionResult,
}

impl PatternScanner {
    pub fn new(spec: ExtractionSpec) -> Self {
        Self {
            remaining: spec.patterns,
            found: ExtractionResult::default(),
        }
    }

    /// Test one line against every unsatisfied pattern. Returns the fields
    /// this line satisfied; first match per field wins.
    pub fn feed(&mut self, line: &str) -> Vec<(String, String)> {
        let mut matched = Vec::new();
        self.remaining.retain(|(name, regex)| {
            let Some(value) = regex
                .captures(line)
                .and_then(|caps| caps.get(1))
                .map(|m| m.as_str().to_string())
            else {
                return true;
            };
            matched.push((name.clone(), value));
            false
        });
        self.found.fields.extend(matched.iter().cloned());
        matched
    }

    pub fn is_complete(&self) -> bool {
        self.remaining.is_empty()
    }

    /// Names still waiting for a match.
    pub fn missing(&self) -> Vec<String> {
        self.remaining.iter().map(|(n, _)| n.clone()).collect()
    }

    /// Final result; fails naming the unmatched fields unless complete.
    pub fn finish(self) -> Result<ExtractionResult, SessionError> {
        if self.is_complete() {
            Ok(self.found)
        } else {
            Err(SessionError::OutputExtraction {
                missing: self.missing(),
            })
        }
    }
}

/// Result of an extraction still in progress.
#[derive(Debug)]
pub struct PendingExtraction {
    rx: oneshot::Receiver<Result<ExtractionResult, SessionError>>,
}

impl PendingExtraction {
    /// Wait until every field is captured or the stream ends.
    pub async fn wait(self) -> Result<ExtractionResult, SessionError> {
        match self.rx.await {
            Ok(result) => result,
            Err(_) => Err(SessionError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "output reader stopped before reporting",
            ))),
        }
    }
}

/// Drives a [`PatternScanner`] from a streaming process.
pub struct OutputPatternExtractor;

impl OutputPatternExtractor {
    /// Start scanning `process` output on a background task. The process
    /// handle is returned untouched so the caller keeps ownership.
    pub fn start(
        process: RemoteProcess,
        spec: ExtractionSpec,
        echo: Option<Arc<dyn RenderSink>>,
    ) -> (ProcessHandle, PendingExtraction) {
        let RemoteProcess {
            handle,
            mut output,
        } = process;
        let (tx, rx) = oneshot::channel();
        let label = handle.label().to_string();

        tokio::spawn(async move {
            let mut scanner = Some(PatternScanner::new(spec));
            let mut tx = Some(tx);
            let mut buf = Vec::new();

            if scanner.as_ref().is_some_and(PatternScanner::is_complete) {
                if let (Some(s), Some(tx)) = (scanner.take(), tx.take()) {
                    let _ = tx.send(s.finish());
                }
            }

            loop {
                buf.clear();
                let read = (&mut output)
                    .take(MAX_LINE_BYTES)
                    .read_until(b'\n', &mut buf)
                    .await;
                match read {
                    Ok(0) => break,
                    Ok(_) => {}
                    Err(e) => {
                        tracing::debug!(process = %label, "output stream failed: {e}");
                        if let Some(tx) = tx.take() {
                            let _ = tx.send(Err(SessionError::Io(e)));
                        }
                        return;
                    }
                }
                let raw = String::from_utf8_lossy(&buf);
                let line = raw.trim_end_matches(['\n', '\r']);
                if let Some(sink) = &echo {
                    sink.remote_output(line);
                }

                let Some(active) = scanner.as_mut() else {
                    continue;
                };
                for (name, value) in active.feed(line) {
                    tracing::debug!(process = %label, field = %name, %value, "captured field");
                }
                if active.is_complete() {
                    if let (Some(s), Some(tx)) = (scanner.take(), tx.take()) {
                        let _ = tx.send(s.finish());
                    }
                }
            }

            if let (Some(s), Some(tx)) = (scanner.take(), tx.take()) {
                tracing::debug!(process = %label, missing = ?s.missing(), "output ended early");
                let _ = tx.send(s.finish());
            }
        });

        (handle, PendingExtraction { rx })
    }
}
