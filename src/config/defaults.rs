//! Default configuration constants.

/// ssh alias of the cluster login node.
pub(super) const DEFAULT_LOGIN_HOST: &str = "login";
/// Local control record directory.
pub(super) const DEFAULT_CONTROL_DIR: &str = "~/.slurmtap/control";
/// Remote working directory, relative to the remote home.
pub(super) const DEFAULT_REMOTE_ROOT: &str = ".slurmtap";
pub(super) const DEFAULT_SSH_PROGRAM: &str = "ssh";
/// Compute nodes are reached through changing hosts; skip host key pinning.
pub(super) const DEFAULT_TUNNEL_OPTIONS: &[&str] = &[
    "-o",
    "UserKnownHostsFile=/dev/null",
    "-o",
    "StrictHostKeyChecking=no",
];

/// File name searched for in the working directory and the config root.
pub(super) const CONFIG_FILE_NAME: &str = "slurmtap.toml";
/// Subdirectory of the config root holding the global config.
pub(super) const CONFIG_DIR_NAME: &str = "slurmtap";
