//! Profile script selection and program presence checks on the login node.

use crate::error::SessionError;
use crate::exec::{shell_join, shell_quote_path, RemoteEndpoint};
use crate::ui::render::{HintTone, RenderSink};

/// File in a working directory naming the profile to use there.
pub const PREFERRED_PROFILE_FILE: &str = ".slurmtap-profile";

/// Pick the profile script for a session rooted at `path`.
///
/// An explicit profile name wins. Otherwise the preferred profile recorded in
/// `<path>/.slurmtap-profile` is used when present. No profile is fine.
pub async fn setup_profile(
    login: &RemoteEndpoint,
    path: &str,
    explicit: Option<&str>,
    remote_root: &str,
) -> Result<Option<String>, SessionError> {
    if let Some(name) = explicit {
        return Ok(Some(format!(
            "~/{}/profiles/{name}.bash",
            remote_root.trim_end_matches('/')
        )));
    }
    let preferred = format!("{}/{PREFERRED_PROFILE_FILE}", path.trim_end_matches('/'));
    let output = login
        .probe(&format!("cat {}", shell_quote_path(&preferred)))
        .await?;
    let profile = output.stdout.trim();
    if output.exit_code != 0 || profile.is_empty() {
        tracing::debug!(%preferred, "no preferred profile");
        return Ok(None);
    }
    tracing::info!(%profile, "using preferred profile");
    Ok(Some(profile.to_string()))
}

/// Make sure `program` is available on `endpoint`.
///
/// When it is missing and `install` is set, the first installer present on
/// the host is run inside a transient allocation. Otherwise the possible
/// install commands are shown and `false` is returned.
pub async fn ensure_program(
    endpoint: &RemoteEndpoint,
    program: &str,
    installers: &[(&str, &str)],
    install: bool,
    sink: &dyn RenderSink,
) -> Result<bool, SessionError> {
    let mut probe = vec!["which", program];
    probe.extend(installers.iter().map(|(installer, _)| *installer));
    // `which` exits non-zero when anything is missing; only stdout matters.
    let output = endpoint.probe(&shell_join(&probe)).await?;
    let found: Vec<&str> = output
        .stdout
        .split_whitespace()
        .filter_map(|p| p.rsplit('/').next())
        .collect();
    if found.contains(&program) {
        return Ok(true);
    }

    let candidates: Vec<&str> = installers
        .iter()
        .filter(|(installer, _)| found.contains(installer))
        .map(|(_, cmd)| *cmd)
        .collect();

    match (install, candidates.first()) {
        (true, Some(cmd)) => {
            sink.activity(&format!("Installing {program}"));
            endpoint.run(&format!("srun {cmd}")).await?;
            Ok(true)
        }
        (_, None) => {
            sink.warn(&format!(
                "{program} is not installed and no installer ({}) is available",
                installers
                    .iter()
                    .map(|(installer, _)| *installer)
                    .collect::<Vec<_>>()
                    .join(", ")
            ));
            Ok(false)
        }
        (false, Some(_)) => {
            sink.warn(&format!("{program} is not installed in this environment"));
            for cmd in candidates {
                sink.hint("It can be installed with:", cmd, HintTone::Resume);
            }
            sink.hint(
                "Or rerun with --install to install it automatically.",
                "--install",
                HintTone::Resume,
            );
            Ok(false)
        }
    }
}
