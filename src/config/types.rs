//! Configuration data model.
//!
//! Struct definitions plus default values. Loading and precedence live in
//! `config::mod`.

use serde::Deserialize;

use super::defaults::{
    DEFAULT_CONTROL_DIR, DEFAULT_LOGIN_HOST, DEFAULT_REMOTE_ROOT, DEFAULT_SSH_PROGRAM,
    DEFAULT_TUNNEL_OPTIONS,
};

/// Top-level runtime configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub cluster: ClusterConfig,
    pub paths: PathsConfig,
    pub ssh: SshConfig,
    pub display: DisplayConfig,
}

/// Where the cluster is and how its nodes are addressed.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClusterConfig {
    /// ssh alias of the login node.
    pub login_host: String,
    /// Appended to bare node names to obtain an ssh-addressable host.
    pub node_host_suffix: String,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            login_host: DEFAULT_LOGIN_HOST.to_string(),
            node_host_suffix: String::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PathsConfig {
    /// Local directory holding control records. `~` is expanded.
    pub control_dir: String,
    /// Directory under the remote home for sockets, batch scripts and profiles.
    pub remote_root: String,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            control_dir: DEFAULT_CONTROL_DIR.to_string(),
            remote_root: DEFAULT_REMOTE_ROOT.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SshConfig {
    pub program: String,
    /// Extra options for tunnel processes.
    pub tunnel_options: Vec<String>,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            program: DEFAULT_SSH_PROGRAM.to_string(),
            tunnel_options: DEFAULT_TUNNEL_OPTIONS
                .iter()
                .map(|opt| opt.to_string())
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DisplayConfig {
    pub color: bool,
    pub open_browser: bool,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            color: true,
            open_browser: true,
        }
    }
}
