//! Local port forwarding to a remote port or socket.

use crate::error::SessionError;
use crate::exec::{LocalLauncher, ProcessHandle};
use std::collections::BTreeMap;
use std::net::{Ipv4Addr, TcpListener};
use std::sync::Arc;

/// Where the tunnel delivers traffic on the remote side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteTarget {
    /// Port on the remote host's loopback interface.
    Port(u16),
    /// Explicit `host:port` reachable from the remote host.
    Address(String),
    /// Unix socket path on the remote host.
    Socket(String),
}

impl RemoteTarget {
    /// Interpret a raw target: digits are a port, paths are sockets,
    /// anything else with a colon is an address.
    pub fn parse(raw: &str) -> Result<Self, SessionError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(SessionError::Configuration(
                "forward target cannot be empty".to_string(),
            ));
        }
        if raw.chars().all(|ch| ch.is_ascii_digit()) {
            return raw
                .parse::<u16>()
                .map(Self::Port)
                .map_err(|_| SessionError::Configuration(format!("invalid port `{raw}`")));
        }
        if raw.starts_with('/') || raw.starts_with('~') {
            return Ok(Self::Socket(raw.to_string()));
        }
        if raw.contains(':') {
            return Ok(Self::Address(raw.to_string()));
        }
        Ok(Self::Socket(raw.to_string()))
    }

    /// Target as handed to `ssh -L`.
    pub fn normalized(&self) -> String {
        match self {
            Self::Port(port) => format!("localhost:{port}"),
            Self::Address(addr) => addr.clone(),
            Self::Socket(path) => path.clone(),
        }
    }
}

/// Parameters of one tunnel plus the page to show once it is up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardSpec {
    pub local_port: Option<u16>,
    pub remote_target: RemoteTarget,
    pub browser_path: Option<String>,
    pub browser_query: BTreeMap<String, Option<String>>,
}

impl ForwardSpec {
    pub fn new(remote_target: RemoteTarget) -> Self {
        Self {
            local_port: None,
            remote_target,
            browser_path: None,
            browser_query: BTreeMap::new(),
        }
    }

    pub fn with_local_port(mut self, port: Option<u16>) -> Self {
        self.local_port = port;
        self
    }

    pub fn with_browser_path(mut self, path: Option<String>) -> Self {
        self.browser_path = path;
        self
    }

    pub fn with_query(mut self, key: &str, value: Option<String>) -> Self {
        self.browser_query.insert(key.to_string(), value);
        self
    }
}

/// A running tunnel. The owner must terminate it on every exit path.
#[derive(Debug)]
pub struct TunnelHandle {
    pub local_port: u16,
    pub remote_target: String,
    pub process: ProcessHandle,
}

impl TunnelHandle {
    pub async fn terminate(&mut self) {
        self.process.terminate().await;
    }
}

/// Spawns `ssh -L` tunnels through a local launcher.
pub struct PortForwardManager {
    launcher: Arc<dyn LocalLauncher>,
    ssh_program: String,
    tunnel_options: Vec<String>,
}

impl PortForwardManager {
    pub fn new(
        launcher: Arc<dyn LocalLauncher>,
        ssh_program: impl Into<String>,
        tunnel_options: Vec<String>,
    ) -> Self {
        Self {
            launcher,
            ssh_program: ssh_program.into(),
            tunnel_options,
        }
    }

    /// Start a tunnel from a local port to `spec.remote_target` via `host`.
    ///
    /// Without a preferred port a free one is probed and released before the
    /// tunnel binds it; another process may grab it in between.
    pub async fn open(&self, host: &str, spec: &ForwardSpec) -> Result<TunnelHandle, SessionError> {
        let local_port = match spec.local_port {
            Some(port) => port,
            None => probe_free_port()?,
        };
        let remote_target = spec.remote_target.normalized();
        let argv = self.tunnel_argv(host, local_port, &remote_target);
        let process = self
            .launcher
            .popen(&argv)
            .await
            .map_err(|e| SessionError::Tunnel(format!("failed to start tunnel to {host}: {e}")))?;
        tracing::info!(%host, local_port, target = %remote_target, "tunnel started");
        Ok(TunnelHandle {
            local_port,
            remote_target,
            process,
        })
    }

    fn tunnel_argv(&self, host: &str, local_port: u16, remote_target: &str) -> Vec<String> {
        let mut argv = Vec::with_capacity(self.tunnel_options.len() + 6);
        argv.push(self.ssh_program.clone());
        // A forward that cannot bind must end ssh instead of idling.
        argv.push("-o".to_string());
        argv.push("ExitOnForwardFailure=yes".to_string());
        argv.extend(self.tunnel_options.iter().cloned());
        argv.push("-nNL".to_string());
        argv.push(format!("localhost:{local_port}:{remote_target}"));
        argv.push(host.to_string());
        argv
    }
}

/// Ask the OS for a currently free loopback port.
pub fn probe_free_port() -> Result<u16, SessionError> {
    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0))
        .map_err(|e| SessionError::Tunnel(format!("failed to probe a local port: {e}")))?;
    let port = listener
        .local_addr()
        .map_err(|e| SessionError::Tunnel(format!("failed to read probed port: {e}")))?
        .port();
    tracing::debug!(port, "probed free local port");
    Ok(port)
}

/// `http://localhost:<port>[/<path>][?<query>]`; empty query values are dropped.
pub fn build_url(local_port: u16, spec: &ForwardSpec) -> String {
    let mut url = format!("http://localhost:{local_port}");
    if let Some(path) = spec.browser_path.as_deref() {
        let path = path.trim_start_matches('/');
        if !path.is_empty() {
            url.push('/');
            url.push_str(path);
        }
    }
    let query = spec
        .browser_query
        .iter()
        .filter_map(|(key, value)| match value.as_deref() {
            Some(v) if !v.is_empty() => Some(format!(
                "{}={}",
                urlencoding::encode(key),
                urlencoding::encode(v)
            )),
            _ => None,
        })
        .collect::<Vec<_>>();
    if !query.is_empty() {
        url.push('?');
        url.push_str(&query.join("&"));
    }
    url
}
