//! Configuration loading from TOML files and environment variables.
//!
//! Config is loaded in this order of precedence (highest wins):
//! 1. Environment variables (`SLURMTAP_LOGIN_HOST`, `SLURMTAP_CONTROL_DIR`,
//!    `SLURMTAP_NO_BROWSER`)
//! 2. TOML file specified via --config CLI flag
//! 3. ./slurmtap.toml in the current directory
//! 4. $XDG_CONFIG_HOME/slurmtap/slurmtap.toml (or ~/.config/slurmtap/slurmtap.toml)
//! 5. Built-in defaults

use crate::error::ConfigError;
use std::path::{Path, PathBuf};

mod defaults;
mod types;

use defaults::{CONFIG_DIR_NAME, CONFIG_FILE_NAME};
pub use types::{ClusterConfig, Config, DisplayConfig, PathsConfig, SshConfig};

pub const ENV_LOGIN_HOST: &str = "SLURMTAP_LOGIN_HOST";
pub const ENV_CONTROL_DIR: &str = "SLURMTAP_CONTROL_DIR";
pub const ENV_NO_BROWSER: &str = "SLURMTAP_NO_BROWSER";

#[derive(Debug, Clone, PartialEq, Eq)]
enum ConfigSource {
    Explicit(PathBuf),
    Local,
    Global(PathBuf),
    BuiltInDefaults,
}

/// Load configuration from disk and environment.
///
/// `path_override` is an explicit config file path (from --config flag).
pub fn load_config(path_override: Option<&str>) -> Result<Config, ConfigError> {
    load_config_from_sources(
        path_override,
        |path| std::fs::read_to_string(path),
        |name| std::env::var(name).ok(),
        config_root_dir,
        dirs::home_dir,
    )
}

fn load_config_from_sources<FRead, FEnv, FRoot, FHome>(
    path_override: Option<&str>,
    read_file: FRead,
    env_lookup: FEnv,
    config_root: FRoot,
    home_dir: FHome,
) -> Result<Config, ConfigError>
where
    FRead: Fn(&Path) -> Result<String, std::io::Error>,
    FEnv: Fn(&str) -> Option<String>,
    FRoot: Fn() -> Option<PathBuf>,
    FHome: Fn() -> Option<PathBuf>,
{
    let (text, source) = read_config_text_with_sources(path_override, &read_file, &config_root)?;
    tracing::debug!(?source, "loading configuration");
    let mut config: Config = toml::from_str(&text)?;
    apply_env_overrides(&mut config, &env_lookup);
    validate(&config)?;
    config.paths.control_dir = expand_home(&config.paths.control_dir, home_dir())?;
    Ok(config)
}

fn read_config_text_with_sources<FRead, FRoot>(
    path_override: Option<&str>,
    read_file: &FRead,
    config_root: &FRoot,
) -> Result<(String, ConfigSource), ConfigError>
where
    FRead: Fn(&Path) -> Result<String, std::io::Error>,
    FRoot: Fn() -> Option<PathBuf>,
{
    if let Some(p) = path_override {
        let path = PathBuf::from(p);
        let text = read_file(&path)?;
        return Ok((text, ConfigSource::Explicit(path)));
    }

    if let Ok(text) = read_file(Path::new(CONFIG_FILE_NAME)) {
        return Ok((text, ConfigSource::Local));
    }
    if let Some(dir) = config_root() {
        let global = dir.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME);
        if let Ok(text) = read_file(&global) {
            return Ok((text, ConfigSource::Global(global)));
        }
    }

    Ok((String::new(), ConfigSource::BuiltInDefaults))
}

fn apply_env_overrides<FEnv>(config: &mut Config, env_lookup: &FEnv)
where
    FEnv: Fn(&str) -> Option<String>,
{
    if let Some(host) = non_empty_env(env_lookup, ENV_LOGIN_HOST) {
        config.cluster.login_host = host;
    }
    if let Some(dir) = non_empty_env(env_lookup, ENV_CONTROL_DIR) {
        config.paths.control_dir = dir;
    }
    if let Some(value) = non_empty_env(env_lookup, ENV_NO_BROWSER) {
        if !matches!(value.to_ascii_lowercase().as_str(), "0" | "false") {
            config.display.open_browser = false;
        }
    }
}

fn non_empty_env<FEnv>(env_lookup: &FEnv, name: &str) -> Option<String>
where
    FEnv: Fn(&str) -> Option<String>,
{
    env_lookup(name)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn validate(config: &Config) -> Result<(), ConfigError> {
    if config.cluster.login_host.trim().is_empty() {
        return Err(ConfigError::Invalid("cluster.login_host is empty".into()));
    }
    if config.paths.control_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("paths.control_dir is empty".into()));
    }
    let root = config.paths.remote_root.trim();
    if root.is_empty() || root.starts_with('/') {
        return Err(ConfigError::Invalid(format!(
            "paths.remote_root must be relative to the remote home, got `{root}`"
        )));
    }
    if config.ssh.program.trim().is_empty() {
        return Err(ConfigError::Invalid("ssh.program is empty".into()));
    }
    Ok(())
}

/// Expand a leading `~` against `home`.
fn expand_home(path: &str, home: Option<PathBuf>) -> Result<String, ConfigError> {
    let rest = match path.strip_prefix('~') {
        Some(rest) if rest.is_empty() || rest.starts_with('/') => rest,
        _ => return Ok(path.to_string()),
    };
    let home = home.ok_or_else(|| {
        ConfigError::Invalid(format!("cannot expand `{path}`: no home directory"))
    })?;
    let joined = home.join(rest.trim_start_matches('/'));
    Ok(joined.to_string_lossy().into_owned())
}

/// Root directory holding per-application config directories.
pub fn config_root_dir() -> Option<PathBuf> {
    if let Ok(path) = std::env::var("XDG_CONFIG_HOME") {
        let trimmed = path.trim();
        if !trimmed.is_empty() {
            return Some(PathBuf::from(trimmed));
        }
    }
    dirs::home_dir()
        .map(|home| home.join(".config"))
        .or_else(dirs::config_dir)
}
