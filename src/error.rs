//! Error types for session orchestration and configuration loading.

use std::fmt;

// ---------------------------------------------------------------------------
// SessionError
// ---------------------------------------------------------------------------

/// Errors arising while resolving, launching, forwarding or persisting a
/// remote session.
#[derive(Debug)]
pub enum SessionError {
    /// Mutually exclusive or malformed user input. Raised before any remote call.
    Configuration(String),
    /// The scheduler could not tell which node runs a given job.
    AllocationLookup(String),
    /// The scheduler never granted (or never reported) a usable allocation.
    AllocationGrant(String),
    /// The remote command ended before every expected field was captured.
    OutputExtraction { missing: Vec<String> },
    /// Local port probing or tunnel process spawn failed.
    Tunnel(String),
    /// No control record exists for the given identifier.
    RecordNotFound(String),
    /// A remote command exited non-zero.
    RemoteExecution { command: String, output: String },
    /// Local filesystem or process plumbing failure.
    Io(std::io::Error),
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Configuration(msg) => write!(f, "configuration: {msg}"),
            Self::AllocationLookup(msg) => write!(f, "allocation lookup: {msg}"),
            Self::AllocationGrant(msg) => write!(f, "allocation grant: {msg}"),
            Self::OutputExtraction { missing } => write!(
                f,
                "remote command ended before reporting: {}",
                missing.join(", ")
            ),
            Self::Tunnel(msg) => write!(f, "tunnel: {msg}"),
            Self::RecordNotFound(id) => write!(f, "no control record named `{id}`"),
            Self::RemoteExecution { command, output } => {
                write!(f, "remote command `{command}` failed: {output}")
            }
            Self::Io(e) => write!(f, "io: {e}"),
        }
    }
}

impl std::error::Error for SessionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for SessionError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

// ---------------------------------------------------------------------------
// ConfigError
// ---------------------------------------------------------------------------

/// Errors when loading or parsing configuration.
#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Toml(toml::de::Error),
    Invalid(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "io: {e}"),
            Self::Toml(e) => write!(f, "toml: {e}"),
            Self::Invalid(msg) => write!(f, "invalid config: {msg}"),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        Self::Toml(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extraction_error_names_missing_fields() {
        let e = SessionError::OutputExtraction {
            missing: vec!["port".into(), "token".into()],
        };
        assert_eq!(
            e.to_string(),
            "remote command ended before reporting: port, token"
        );
    }

    #[test]
    fn remote_execution_error_carries_output() {
        let e = SessionError::RemoteExecution {
            command: "scancel 12".into(),
            output: "Invalid job id specified".into(),
        };
        let s = e.to_string();
        assert!(s.contains("scancel 12"), "got: {s}");
        assert!(s.contains("Invalid job id"), "got: {s}");
    }

    #[test]
    fn session_error_from_io_keeps_source() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let e = SessionError::from(io_err);
        assert!(e.to_string().starts_with("io:"), "got: {e}");
        assert!(std::error::Error::source(&e).is_some());
    }

    #[test]
    fn config_error_from_toml() {
        let toml_err: toml::de::Error = toml::from_str::<toml::Value>("x = [unclosed").unwrap_err();
        let e = ConfigError::from(toml_err);
        assert!(e.to_string().starts_with("toml:"));
    }

    #[test]
    fn config_error_invalid_message() {
        let e = ConfigError::Invalid("control_dir is empty".into());
        assert_eq!(e.to_string(), "invalid config: control_dir is empty");
    }
}
