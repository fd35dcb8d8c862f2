//! Terminal output renderer for command echo, status and resume hints.

use crate::exec::shell_join;
use crate::ui::render::HintTone;
use crossterm::style::{Color, Stylize};

const LABEL_WARNING: &str = "warning:";
const LABEL_ERROR: &str = "error:";
const INDENT_1: &str = "  ";
const REMOTE_OUTPUT_PREFIX: &str = "#";

/// Default stderr renderer.
#[derive(Debug, Clone, Copy)]
pub struct Renderer {
    /// Whether ANSI color/style output is enabled.
    color: bool,
}

impl Renderer {
    /// Create a renderer with optional color output.
    pub fn new(color: bool) -> Self {
        Self { color }
    }

    /// `(local) $ ssh -nNL ...`
    pub fn local_command(&self, argv: &[String]) {
        let line = shell_join(argv);
        if self.color {
            eprintln!("{} {line}", "(local) $".with(Color::Green).bold());
        } else {
            eprintln!("(local) $ {line}");
        }
    }

    /// `(login) $ squeue --jobs 12 -ho %N`
    pub fn remote_command(&self, host: &str, command: &str) {
        let prompt = format!("({host}) $");
        if self.color {
            eprintln!("{} {command}", prompt.with(Color::Cyan).bold());
        } else {
            eprintln!("{prompt} {command}");
        }
    }

    pub fn remote_output(&self, line: &str) {
        if self.color {
            eprintln!(
                "{} {}",
                REMOTE_OUTPUT_PREFIX.with(Color::DarkGrey),
                line.with(Color::Grey)
            );
        } else {
            eprintln!("{REMOTE_OUTPUT_PREFIX} {line}");
        }
    }

    pub fn activity(&self, text: &str) {
        if self.color {
            eprintln!("{}", text.bold());
        } else {
            eprintln!("{text}");
        }
    }

    pub fn field(&self, key: &str, value: &str) {
        if self.color {
            eprintln!(
                "{INDENT_1}{} {}",
                format!("{key}:").with(Color::DarkGrey),
                value.with(Color::White),
            );
        } else {
            eprintln!("{INDENT_1}{key}: {value}");
        }
    }

    /// Print a label followed by an indented, copy-pasteable command.
    pub fn hint(&self, label: &str, command: &str, tone: HintTone) {
        if self.color {
            let color = match tone {
                HintTone::Resume => Color::Yellow,
                HintTone::Destructive => Color::Red,
            };
            eprintln!("{label}");
            eprintln!("{INDENT_1}{}", command.with(color).bold());
        } else {
            eprintln!("{label}");
            eprintln!("{INDENT_1}{command}");
        }
    }

    pub fn warn(&self, msg: &str) {
        if self.color {
            eprintln!("{} {msg}", LABEL_WARNING.with(Color::Yellow).bold());
        } else {
            eprintln!("{LABEL_WARNING} {msg}");
        }
    }

    pub fn error(&self, msg: &str) {
        if self.color {
            eprintln!("{} {msg}", LABEL_ERROR.with(Color::Red).bold());
        } else {
            eprintln!("{LABEL_ERROR} {msg}");
        }
    }
}
