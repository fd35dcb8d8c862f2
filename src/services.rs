//! Services that can be launched on a compute node and forwarded.

use crate::alloc::FIELD_NODE_NAME;
use crate::error::SessionError;
use crate::exec::shell_quote_path;
use crate::extract::ExtractionSpec;
use clap::ValueEnum;
use rand::Rng;

/// Printed before every server command so the node name can be harvested.
pub const NODE_BANNER_PRECOMMAND: &str = "echo '####' $(hostname)";
pub const NODE_BANNER_PATTERN: &str = "#### ([A-Za-z0-9_-]+)";

pub const FIELD_PORT: &str = "port";
pub const FIELD_TOKEN: &str = "token";

const AIM_PORT_RANGE: std::ops::Range<u16> = 10000..60000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ServiceKind {
    /// JupyterLab
    Lab,
    /// Jupyter Notebook
    Notebook,
    Tensorboard,
    Mlflow,
    Aim,
}

/// Static description of one launchable service.
#[derive(Debug)]
pub struct ServiceDef {
    pub name: &'static str,
    /// Executable checked for before launching.
    pub program: &'static str,
    /// Install commands keyed by installer program.
    pub installers: &'static [(&'static str, &'static str)],
    /// Template with `{path}`, `{sock}` and `{port}` placeholders.
    pub command: &'static str,
    pub port_pattern: Option<&'static str>,
    pub token_pattern: Option<&'static str>,
    /// Jupyter front-ends open a directory and default to the home dir.
    pub directory_only: bool,
}

const JUPYTER_TOKEN: &str = r"\?token=([a-f0-9]+)";

static LAB: ServiceDef = ServiceDef {
    name: "lab",
    program: "jupyter-lab",
    installers: &[
        ("conda", "conda install -y jupyterlab"),
        ("pip", "pip install jupyterlab"),
    ],
    command: "jupyter lab --sock {sock} {path}",
    port_pattern: None,
    token_pattern: Some(JUPYTER_TOKEN),
    directory_only: true,
};

static NOTEBOOK: ServiceDef = ServiceDef {
    name: "notebook",
    program: "jupyter-notebook",
    installers: &[
        ("conda", "conda install -y jupyter"),
        ("pip", "pip install jupyter"),
    ],
    command: "jupyter notebook --sock {sock} {path}",
    port_pattern: None,
    token_pattern: Some(JUPYTER_TOKEN),
    directory_only: true,
};

static TENSORBOARD: ServiceDef = ServiceDef {
    name: "tensorboard",
    program: "tensorboard",
    installers: &[
        ("conda", "conda install -y tensorboard"),
        ("pip", "pip install tensorboard"),
    ],
    command: "tensorboard --logdir {path} --port 0",
    port_pattern: Some("TensorBoard [^ ]+ at http://localhost:([0-9]+)/"),
    token_pattern: None,
    directory_only: false,
};

static MLFLOW: ServiceDef = ServiceDef {
    name: "mlflow",
    program: "mlflow",
    installers: &[("pip", "pip install mlflow")],
    command: "mlflow ui --backend-store-uri {path} --port 0",
    port_pattern: Some("Listening at: http://127.0.0.1:([0-9]+)"),
    token_pattern: None,
    directory_only: false,
};

static AIM: ServiceDef = ServiceDef {
    name: "aim",
    program: "aim",
    installers: &[("pip", "pip install aim")],
    command: "aim up --repo {path} --port {port}",
    port_pattern: Some("Open http://127.0.0.1:([0-9]+)"),
    token_pattern: None,
    directory_only: false,
};

impl ServiceKind {
    pub fn definition(self) -> &'static ServiceDef {
        match self {
            Self::Lab => &LAB,
            Self::Notebook => &NOTEBOOK,
            Self::Tensorboard => &TENSORBOARD,
            Self::Mlflow => &MLFLOW,
            Self::Aim => &AIM,
        }
    }
}

/// A concrete command ready to launch, with the fields to harvest from it.
#[derive(Debug, Clone)]
pub struct ServiceLaunch {
    pub path: String,
    pub command: String,
    pub patterns: ExtractionSpec,
    /// No port is reported; the service listens on a per-node socket.
    pub uses_socket: bool,
    pub reports_token: bool,
}

impl ServiceDef {
    /// Fill in the command template for `path` and build the extraction
    /// patterns (always `node_name`, plus `port` / `token` when reported).
    pub fn launch(
        &self,
        path: Option<&str>,
        remote_port: Option<u16>,
        remote_root: &str,
    ) -> Result<ServiceLaunch, SessionError> {
        let path = match (path, self.directory_only) {
            (Some(p), true) if p.ends_with(".ipynb") => {
                return Err(SessionError::Configuration(format!(
                    "only directories can be given to `serve {}`",
                    self.name
                )))
            }
            (Some(p), _) => p.to_string(),
            (None, true) => "~".to_string(),
            (None, false) => {
                return Err(SessionError::Configuration(format!(
                    "`serve {}` requires a path",
                    self.name
                )))
            }
        };

        if remote_port.is_some() && !self.command.contains("{port}") {
            return Err(SessionError::Configuration(format!(
                "`serve {}` does not take --remote-port",
                self.name
            )));
        }
        let port = remote_port.unwrap_or_else(|| rand::thread_rng().gen_range(AIM_PORT_RANGE));
        let sock = format!(
            "~/{}/sockets/$(hostname).sock",
            remote_root.trim_end_matches('/')
        );
        let command = self
            .command
            .replace("{path}", &shell_quote_path(&path))
            .replace("{sock}", &sock)
            .replace("{port}", &port.to_string());

        let mut patterns = ExtractionSpec::new().field(FIELD_NODE_NAME, NODE_BANNER_PATTERN)?;
        if let Some(pattern) = self.port_pattern {
            patterns = patterns.field(FIELD_PORT, pattern)?;
        }
        if let Some(pattern) = self.token_pattern {
            patterns = patterns.field(FIELD_TOKEN, pattern)?;
        }

        Ok(ServiceLaunch {
            path,
            command,
            patterns,
            uses_socket: self.port_pattern.is_none(),
            reports_token: self.token_pattern.is_some(),
        })
    }

    /// Install commands whose installer is among `available` programs.
    pub fn install_commands<'a>(&'a self, available: &[String]) -> Vec<&'a str> {
        self.installers
            .iter()
            .filter(|(installer, _)| available.iter().any(|p| p == installer))
            .map(|(_, cmd)| *cmd)
            .collect()
    }
}

/// Socket path a socket-based service listens on, as seen from the login node.
pub fn socket_path(remote_home: &str, remote_root: &str, node_name: &str) -> String {
    format!(
        "{}/{}/sockets/{node_name}.sock",
        remote_home.trim_end_matches('/'),
        remote_root.trim_end_matches('/')
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lab_defaults_to_home_and_uses_a_socket() {
        let launch = ServiceKind::Lab
            .definition()
            .launch(None, None, ".slurmtap")
            .expect("launch");
        assert_eq!(launch.path, "~");
        assert_eq!(
            launch.command,
            "jupyter lab --sock ~/.slurmtap/sockets/$(hostname).sock ~"
        );
        assert!(launch.uses_socket);
        assert!(launch.reports_token);
        assert!(launch.patterns.contains("node_name"));
        assert!(launch.patterns.contains("token"));
        assert!(!launch.patterns.contains("port"));
    }

    #[test]
    fn notebook_files_are_refused() {
        let err = ServiceKind::Notebook
            .definition()
            .launch(Some("work/analysis.ipynb"), None, ".slurmtap")
            .expect_err("must refuse");
        assert!(matches!(err, SessionError::Configuration(_)));
    }

    #[test]
    fn log_viewers_require_a_path() {
        for kind in [ServiceKind::Tensorboard, ServiceKind::Mlflow, ServiceKind::Aim] {
            assert!(matches!(
                kind.definition().launch(None, None, ".slurmtap"),
                Err(SessionError::Configuration(_))
            ));
        }
    }

    #[test]
    fn port_services_harvest_the_port() {
        let launch = ServiceKind::Mlflow
            .definition()
            .launch(Some("runs"), None, ".slurmtap")
            .expect("launch");
        assert_eq!(launch.command, "mlflow ui --backend-store-uri runs --port 0");
        assert!(!launch.uses_socket);
        assert!(launch.patterns.contains("port"));
    }

    #[test]
    fn aim_uses_given_or_random_port() {
        let def = ServiceKind::Aim.definition();
        let fixed = def.launch(Some("repo"), Some(12345), ".slurmtap").expect("launch");
        assert_eq!(fixed.command, "aim up --repo repo --port 12345");

        let random = def.launch(Some("repo"), None, ".slurmtap").expect("launch");
        let port: u16 = random
            .command
            .rsplit(' ')
            .next()
            .and_then(|p| p.parse().ok())
            .expect("numeric port");
        assert!(AIM_PORT_RANGE.contains(&port));
    }

    #[test]
    fn remote_port_is_refused_where_the_service_cannot_use_it() {
        for kind in [ServiceKind::Lab, ServiceKind::Tensorboard, ServiceKind::Mlflow] {
            let err = kind
                .definition()
                .launch(Some("runs"), Some(8080), ".slurmtap")
                .expect_err("no {port} placeholder");
            assert!(err.to_string().contains("--remote-port"), "got: {err}");
        }
    }

    #[test]
    fn paths_are_quoted_but_keep_the_home_prefix() {
        let launch = ServiceKind::Tensorboard
            .definition()
            .launch(Some("~/exp runs/$(id)"), None, ".slurmtap")
            .expect("launch");
        assert_eq!(
            launch.command,
            "tensorboard --logdir ~/'exp runs/$(id)' --port 0"
        );
        assert_eq!(launch.path, "~/exp runs/$(id)");
    }

    #[test]
    fn install_commands_follow_available_installers() {
        let def = ServiceKind::Tensorboard.definition();
        assert_eq!(
            def.install_commands(&["pip".to_string()]),
            vec!["pip install tensorboard"]
        );
        assert!(def.install_commands(&[]).is_empty());
    }

    #[test]
    fn socket_path_is_absolute_under_home() {
        assert_eq!(
            socket_path("/home/ada/", ".slurmtap", "cn-a001"),
            "/home/ada/.slurmtap/sockets/cn-a001.sock"
        );
    }
}
