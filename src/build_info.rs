//! Compile-time build metadata for `--version`.

/// Semver package version from `Cargo.toml`.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// VCS commit hash captured at build time.
pub const GIT_COMMIT: &str = env!("SLURMTAP_BUILD_GIT_HASH");

/// Build timestamp captured at compile time.
pub const BUILD_TIMESTAMP: &str = env!("SLURMTAP_BUILD_TIMESTAMP");

/// Body of `slurmtap --version`; clap prefixes the binary name.
pub const LONG_VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    "\ncommit: ",
    env!("SLURMTAP_BUILD_GIT_HASH"),
    "\nbuilt: ",
    env!("SLURMTAP_BUILD_TIMESTAMP")
);

/// Full version block as printed.
pub fn cli_version_text() -> String {
    format!("{} {LONG_VERSION}", crate::session::PROGRAM_NAME)
}
