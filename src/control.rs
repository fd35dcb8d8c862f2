//! Durable control records for detached sessions.
//!
//! One plain-text file per identifier, holding `key = value` lines appended
//! as the originating flow learns them. A later, independent invocation reads
//! the record back to reopen the tunnel or cancel the job.

use crate::error::SessionError;
use rand::rngs::OsRng;
use rand::RngCore;
use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

pub const KEY_NODE_NAME: &str = "node_name";
pub const KEY_TO_FORWARD: &str = "to_forward";
pub const KEY_JOBID: &str = "jobid";
pub const KEY_TOKEN: &str = "token";
pub const KEY_LOCAL_PORT: &str = "local_port";

const KEY_VALUE_SEPARATOR: &str = " = ";
const ID_BYTES: usize = 6;
const ID_ATTEMPTS: usize = 64;

/// Everything a later invocation needs to resume or cancel a session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ControlRecord {
    pub identifier: String,
    pub node_name: Option<String>,
    /// Remote port or socket path, as reported by the service.
    pub to_forward: Option<String>,
    pub jobid: Option<String>,
    pub token: Option<String>,
    pub local_port: Option<u16>,
}

impl ControlRecord {
    fn from_fields(identifier: &str, mut fields: BTreeMap<String, String>) -> Self {
        let local_port = fields.remove(KEY_LOCAL_PORT).and_then(|raw| {
            raw.parse::<u16>()
                .map_err(|_| {
                    tracing::warn!(record = %identifier, value = %raw, "ignoring unparsable local_port");
                })
                .ok()
        });
        let record = Self {
            identifier: identifier.to_string(),
            node_name: fields.remove(KEY_NODE_NAME),
            to_forward: fields.remove(KEY_TO_FORWARD),
            jobid: fields.remove(KEY_JOBID),
            token: fields.remove(KEY_TOKEN),
            local_port,
        };
        for key in fields.keys() {
            tracing::debug!(record = %identifier, %key, "ignoring unknown control key");
        }
        record
    }
}

/// Directory of control records shared by every invocation of the tool.
#[derive(Debug, Clone)]
pub struct ControlFileStore {
    dir: PathBuf,
}

impl ControlFileStore {
    /// Store rooted at `dir`. Nothing touches the filesystem until `create`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Allocate a fresh identifier backed by an empty record.
    pub fn create(&self) -> Result<String, SessionError> {
        ensure_private_dir(&self.dir)?;
        for _ in 0..ID_ATTEMPTS {
            let identifier = generate_identifier();
            match new_private_file(&self.record_path(&identifier)) {
                Ok(_) => {
                    tracing::debug!(record = %identifier, dir = %self.dir.display(), "created control record");
                    return Ok(identifier);
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Err(SessionError::Io(std::io::Error::other(
            "failed to allocate a unique control record identifier",
        )))
    }

    /// Append one `key = value` line. Repeated keys are kept; readers take
    /// the last one.
    pub fn append(&self, identifier: &str, key: &str, value: &str) -> Result<(), SessionError> {
        let path = self.existing_record_path(identifier)?;
        for part in [key, value] {
            if part.contains('\n') || part.contains(KEY_VALUE_SEPARATOR) {
                return Err(SessionError::Configuration(format!(
                    "control record entries cannot contain newlines or `{KEY_VALUE_SEPARATOR}`: {part:?}"
                )));
            }
        }
        let mut file = match OpenOptions::new().append(true).open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(SessionError::RecordNotFound(identifier.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        writeln!(file, "{key}{KEY_VALUE_SEPARATOR}{value}")?;
        tracing::debug!(record = %identifier, %key, %value, "appended control entry");
        Ok(())
    }

    /// Read a record back; the last occurrence of each key wins.
    pub fn read_all(&self, identifier: &str) -> Result<ControlRecord, SessionError> {
        let path = self.existing_record_path(identifier)?;
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(SessionError::RecordNotFound(identifier.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        let mut fields = BTreeMap::new();
        for line in raw.lines().filter(|l| !l.trim().is_empty()) {
            match line.split_once(KEY_VALUE_SEPARATOR) {
                Some((key, value)) => {
                    fields.insert(key.trim().to_string(), value.trim().to_string());
                }
                None => tracing::warn!(record = %identifier, %line, "skipping malformed control line"),
            }
        }
        Ok(ControlRecord::from_fields(identifier, fields))
    }

    /// Remove a record. An absent record is logged, not an error.
    pub fn delete(&self, identifier: &str) -> Result<(), SessionError> {
        let path = self.existing_record_path(identifier)?;
        match fs::remove_file(&path) {
            Ok(()) => {
                tracing::debug!(record = %identifier, "deleted control record");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::warn!(record = %identifier, "control record already absent");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn exists(&self, identifier: &str) -> bool {
        validate_identifier(identifier).is_ok() && self.record_path(identifier).is_file()
    }

    fn existing_record_path(&self, identifier: &str) -> Result<PathBuf, SessionError> {
        validate_identifier(identifier)
            .map_err(|_| SessionError::RecordNotFound(identifier.to_string()))?;
        Ok(self.record_path(identifier))
    }

    fn record_path(&self, identifier: &str) -> PathBuf {
        self.dir.join(identifier)
    }
}

/// Reject identifiers that could escape the control directory.
fn validate_identifier(identifier: &str) -> Result<(), String> {
    if identifier.is_empty() {
        return Err("identifier cannot be empty".to_string());
    }
    if identifier
        .chars()
        .any(|ch| !(ch.is_ascii_alphanumeric() || ch == '-' || ch == '_'))
    {
        return Err("identifier can only contain ASCII letters, numbers, '-', '_'".to_string());
    }
    Ok(())
}

/// Random lowercase hex identifier.
pub fn generate_identifier() -> String {
    let mut bytes = [0u8; ID_BYTES];
    OsRng.fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Create `dir` owner-only. An existing directory keeps its mode; a warning
/// is logged when others can reach it.
fn ensure_private_dir(dir: &Path) -> std::io::Result<()> {
    if dir.is_dir() {
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(dir)?.permissions().mode() & 0o777;
            if mode & 0o077 != 0 {
                tracing::warn!(
                    dir = %dir.display(),
                    mode = %format!("{mode:o}"),
                    "control directory is accessible to other users"
                );
            }
        }
        return Ok(());
    }
    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o700);
    }
    builder.create(dir)
}

fn new_private_file(path: &Path) -> std::io::Result<fs::File> {
    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    options.open(path)
}
