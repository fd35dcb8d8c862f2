//! Rendering contract consumed by orchestration layers.
//!
//! `Renderer` is the default terminal implementation, but tests substitute a
//! recording sink so flows can be asserted without scraping stderr.

pub use crate::ui::renderer::Renderer;

/// Injectable rendering interface used by orchestration code.
pub trait RenderSink: Send + Sync {
    /// Echo a command about to run on the local machine.
    fn local_command(&self, argv: &[String]);
    /// Echo a command about to run on a remote host.
    fn remote_command(&self, host: &str, command: &str);
    /// Render one line streamed from a remote process.
    fn remote_output(&self, line: &str);
    /// Render activity/lifecycle text.
    fn activity(&self, text: &str);
    /// Render one key/value field row.
    fn field(&self, key: &str, value: &str);
    /// Render a suggested follow-up command.
    fn hint(&self, label: &str, command: &str, tone: HintTone);
    /// Render a warning line.
    fn warn(&self, msg: &str);
    /// Render an error line.
    fn error(&self, msg: &str);
}

/// Emphasis used for follow-up command hints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HintTone {
    /// Safe, resumable follow-up.
    Resume,
    /// Irreversible follow-up.
    Destructive,
}

impl RenderSink for Renderer {
    fn local_command(&self, argv: &[String]) {
        self.local_command(argv);
    }

    fn remote_command(&self, host: &str, command: &str) {
        self.remote_command(host, command);
    }

    fn remote_output(&self, line: &str) {
        self.remote_output(line);
    }

    fn activity(&self, text: &str) {
        self.activity(text);
    }

    fn field(&self, key: &str, value: &str) {
        self.field(key, value);
    }

    fn hint(&self, label: &str, command: &str, tone: HintTone) {
        self.hint(label, command, tone);
    }

    fn warn(&self, msg: &str) {
        self.warn(msg);
    }

    fn error(&self, msg: &str) {
        self.error(msg);
    }
}
