//! Session orchestration: serve, reconnect, kill, forward and code flows.
//!
//! A serve session moves through
//! `Resolving → Launching → Extracting → Forwarding → Active` and ends
//! `Detached` (persisted and interrupted) or `Terminated`. Every process a
//! flow starts is parked in [`HeldProcesses`] and terminated once the flow
//! returns, whichever way it returns.

use crate::alloc::{AllocationRequest, AllocationResolver, FIELD_NODE_NAME};
use crate::browser::UrlOpener;
use crate::control::{
    ControlFileStore, KEY_JOBID, KEY_LOCAL_PORT, KEY_NODE_NAME, KEY_TO_FORWARD, KEY_TOKEN,
};
use crate::error::SessionError;
use crate::exec::{LocalLauncher, ProcessHandle, RemoteEndpoint};
use crate::forward::{build_url, ForwardSpec, PortForwardManager, RemoteTarget, TunnelHandle};
use crate::profile::{ensure_program, setup_profile};
use crate::services::{
    socket_path, ServiceKind, FIELD_PORT, FIELD_TOKEN, NODE_BANNER_PRECOMMAND,
};
use crate::ui::render::{HintTone, RenderSink};
use std::sync::Arc;
use tokio::sync::watch;

/// Name used in printed follow-up commands.
pub const PROGRAM_NAME: &str = env!("CARGO_PKG_NAME");

/// Lifecycle of one serve session, logged on every transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Resolving,
    Launching,
    Extracting,
    Forwarding,
    Active,
    Detached,
    Terminated,
}

/// How a flow ended when it did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
    /// Interrupted while persisted: the job keeps running under `identifier`.
    Detached { identifier: String },
    Interrupted,
    /// The remote command (or the local editor) exited on its own.
    RemoteExited(Option<i32>),
    TunnelExited(Option<i32>),
    /// A one-shot flow such as `kill` completed.
    Done,
}

/// User interrupt, observed by every blocking wait.
#[derive(Debug, Clone)]
pub struct Interrupt {
    rx: watch::Receiver<bool>,
}

impl Interrupt {
    /// Trigger side plus an observer.
    pub fn channel() -> (watch::Sender<bool>, Self) {
        let (tx, rx) = watch::channel(false);
        (tx, Self { rx })
    }

    /// An interrupt that never fires.
    pub fn never() -> Self {
        let (_tx, rx) = watch::channel(false);
        Self { rx }
    }

    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once triggered. A dropped trigger side never fires.
    pub async fn triggered(&mut self) {
        if self.rx.wait_for(|fired| *fired).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Everything `serve` needs to know.
#[derive(Debug, Clone)]
pub struct ServeRequest {
    pub service: ServiceKind,
    pub path: Option<String>,
    pub profile: Option<String>,
    pub persist: bool,
    pub install: bool,
    pub local_port: Option<u16>,
    pub remote_port: Option<u16>,
    pub allocation: AllocationRequest,
}

/// Processes started by the current flow.
#[derive(Debug, Default)]
struct HeldProcesses {
    server: Option<ProcessHandle>,
    tunnel: Option<TunnelHandle>,
    editor: Option<ProcessHandle>,
}

impl HeldProcesses {
    async fn release(&mut self) {
        if let Some(mut editor) = self.editor.take() {
            editor.terminate().await;
        }
        if let Some(mut tunnel) = self.tunnel.take() {
            tunnel.terminate().await;
        }
        if let Some(mut server) = self.server.take() {
            server.terminate().await;
        }
    }
}

enum ActiveEnd {
    Interrupted,
    RemoteExited(Option<i32>),
    TunnelExited(Option<i32>),
}

/// Composes allocation, extraction, forwarding and control records.
pub struct SessionOrchestrator {
    login: RemoteEndpoint,
    resolver: AllocationResolver,
    forwarder: PortForwardManager,
    store: ControlFileStore,
    launcher: Arc<dyn LocalLauncher>,
    opener: Arc<dyn UrlOpener>,
    sink: Arc<dyn RenderSink>,
    remote_root: String,
}

impl SessionOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        login: RemoteEndpoint,
        resolver: AllocationResolver,
        forwarder: PortForwardManager,
        store: ControlFileStore,
        launcher: Arc<dyn LocalLauncher>,
        opener: Arc<dyn UrlOpener>,
        sink: Arc<dyn RenderSink>,
        remote_root: impl Into<String>,
    ) -> Self {
        Self {
            login,
            resolver,
            forwarder,
            store,
            launcher,
            opener,
            sink,
            remote_root: remote_root.into(),
        }
    }

    fn enter(&self, state: SessionState) {
        tracing::info!(?state, "session state");
    }

    // -----------------------------------------------------------------------
    // serve
    // -----------------------------------------------------------------------

    /// Launch a service on a compute node and forward it locally.
    pub async fn start_and_serve(
        &self,
        request: ServeRequest,
        interrupt: Interrupt,
    ) -> Result<SessionOutcome, SessionError> {
        let mut held = HeldProcesses::default();
        let result = self.serve_inner(&request, interrupt, &mut held).await;
        held.release().await;
        match &result {
            Ok(SessionOutcome::Detached { .. }) => self.enter(SessionState::Detached),
            _ => self.enter(SessionState::Terminated),
        }
        result
    }

    async fn serve_inner(
        &self,
        request: &ServeRequest,
        mut interrupt: Interrupt,
        held: &mut HeldProcesses,
    ) -> Result<SessionOutcome, SessionError> {
        let service = request.service.definition();
        let launch = service.launch(
            request.path.as_deref(),
            request.remote_port,
            &self.remote_root,
        )?;
        if request.persist && !request.allocation.is_fresh_allocation() {
            return Err(SessionError::Configuration(
                "--persist cannot be combined with --node or --job".to_string(),
            ));
        }

        self.enter(SessionState::Resolving);
        let profile = setup_profile(
            &self.login,
            &launch.path,
            request.profile.as_deref(),
            &self.remote_root,
        )
        .await?;
        let checked = match &profile {
            Some(p) => self.login.with_profile(p.as_str()),
            None => self.login.clone(),
        };
        if !ensure_program(
            &checked,
            service.program,
            service.installers,
            request.install,
            self.sink.as_ref(),
        )
        .await?
        {
            return Err(SessionError::Configuration(format!(
                "{} is not installed",
                service.program
            )));
        }

        let mut resolved = self.resolver.resolve(&self.login, &request.allocation).await?;
        if request.persist {
            resolved = resolved.persist()?;
        }
        if launch.uses_socket {
            self.login
                .run_quiet(&format!("mkdir -p ~/{}/sockets", self.root()))
                .await?;
        }

        let identifier = if request.persist {
            let id = self.store.create()?;
            self.sink.field("identifier", &id);
            Some(id)
        } else {
            None
        };

        self.enter(SessionState::Launching);
        // `<banner> && source <profile> && <service>`
        let server = match &profile {
            Some(p) => resolved.with_profile(p.as_str()),
            None => resolved,
        }
        .with_precommand(NODE_BANNER_PRECOMMAND);
        let launched = server
            .extract(&launch.command, launch.patterns.clone())
            .await?;
        held.server = Some(launched.process);
        // A submitted job is recorded before any output is awaited.
        let cancellable = match (&identifier, launched.jobid) {
            (Some(id), Some(jobid)) => {
                self.store.append(id, KEY_JOBID, &jobid)?;
                self.sink.field("jobid", &jobid);
                Some(id.clone())
            }
            _ => None,
        };

        self.enter(SessionState::Extracting);
        let fields = tokio::select! {
            result = launched.pending.wait() => match result {
                Ok(fields) => fields,
                Err(e) => {
                    if let Some(id) = &cancellable {
                        self.print_kill_hint(id);
                    }
                    return Err(e);
                }
            },
            _ = interrupt.triggered() => {
                self.sink.activity("Interrupted before the server reported in.");
                if let Some(id) = &cancellable {
                    self.print_kill_hint(id);
                }
                return Ok(SessionOutcome::Interrupted);
            }
        };

        let node_name = fields.require(FIELD_NODE_NAME)?.to_string();
        let to_forward = if launch.uses_socket {
            let home = self.login.home().await?;
            socket_path(&home, &self.remote_root, &node_name)
        } else {
            fields.require(FIELD_PORT)?.to_string()
        };
        let token = fields.get(FIELD_TOKEN).map(str::to_string);
        self.sink.field("node", &node_name);

        if let Some(id) = &identifier {
            self.record_fields(id, &node_name, &to_forward, token.as_deref())?;
        }

        self.enter(SessionState::Forwarding);
        let spec = ForwardSpec::new(RemoteTarget::parse(&to_forward)?)
            .with_local_port(request.local_port)
            .with_query(FIELD_TOKEN, token);
        let tunnel = self
            .forwarder
            .open(&self.resolver.node_host(&node_name), &spec)
            .await?;
        let local_port = tunnel.local_port;
        held.tunnel = Some(tunnel);
        if let Some(id) = &identifier {
            self.store
                .append(id, KEY_LOCAL_PORT, &local_port.to_string())?;
        }
        self.show_url(local_port, &spec);

        self.enter(SessionState::Active);
        let end = wait_active(
            held.server.as_mut(),
            held.tunnel.as_mut().map(|t| &mut t.process),
            &mut interrupt,
        )
        .await;
        match end {
            ActiveEnd::Interrupted => {
                self.sink.activity("Terminated by user.");
                Ok(match identifier {
                    Some(id) => {
                        self.print_resume_hints(&id);
                        SessionOutcome::Detached { identifier: id }
                    }
                    None => SessionOutcome::Interrupted,
                })
            }
            ActiveEnd::RemoteExited(status) => {
                self.sink.activity("The remote server exited.");
                Ok(SessionOutcome::RemoteExited(status))
            }
            ActiveEnd::TunnelExited(status) => {
                if status != Some(0) {
                    if let Some(id) = &identifier {
                        self.print_resume_hints(id);
                    }
                }
                self.tunnel_exited(status)
            }
        }
    }

    /// Append what was learned; the job id is already recorded at launch.
    fn record_fields(
        &self,
        identifier: &str,
        node_name: &str,
        to_forward: &str,
        token: Option<&str>,
    ) -> Result<(), SessionError> {
        self.store.append(identifier, KEY_NODE_NAME, node_name)?;
        self.store.append(identifier, KEY_TO_FORWARD, to_forward)?;
        if let Some(token) = token {
            self.store.append(identifier, KEY_TOKEN, token)?;
        }
        Ok(())
    }

    fn print_resume_hints(&self, identifier: &str) {
        self.sink.hint(
            "To reconnect to this server, use the command:",
            &format!("{PROGRAM_NAME} reconnect {identifier}"),
            HintTone::Resume,
        );
        self.print_kill_hint(identifier);
    }

    fn print_kill_hint(&self, identifier: &str) {
        self.sink.hint(
            "To kill this server, use the command:",
            &format!("{PROGRAM_NAME} kill {identifier}"),
            HintTone::Destructive,
        );
    }

    // -----------------------------------------------------------------------
    // reconnect / kill
    // -----------------------------------------------------------------------

    /// Reopen the tunnel of a persisted session.
    pub async fn reconnect(
        &self,
        identifier: &str,
        local_port: Option<u16>,
        interrupt: Interrupt,
    ) -> Result<SessionOutcome, SessionError> {
        let record = self.store.read_all(identifier)?;
        let node_name = record.node_name.ok_or_else(|| {
            SessionError::Configuration(format!("control record `{identifier}` has no node_name"))
        })?;
        let to_forward = record.to_forward.ok_or_else(|| {
            SessionError::Configuration(format!("control record `{identifier}` has no to_forward"))
        })?;
        let spec = ForwardSpec::new(RemoteTarget::parse(&to_forward)?)
            .with_local_port(local_port.or(record.local_port))
            .with_query(FIELD_TOKEN, record.token);

        let mut held = HeldProcesses::default();
        let result = self
            .forward_inner(&node_name, &spec, interrupt, &mut held)
            .await;
        held.release().await;
        self.enter(SessionState::Terminated);
        result
    }

    async fn forward_inner(
        &self,
        node_name: &str,
        spec: &ForwardSpec,
        mut interrupt: Interrupt,
        held: &mut HeldProcesses,
    ) -> Result<SessionOutcome, SessionError> {
        self.enter(SessionState::Forwarding);
        let tunnel = self
            .forwarder
            .open(&self.resolver.node_host(node_name), spec)
            .await?;
        let port = tunnel.local_port;
        held.tunnel = Some(tunnel);
        self.show_url(port, spec);

        self.enter(SessionState::Active);
        let end = wait_active(
            None,
            held.tunnel.as_mut().map(|t| &mut t.process),
            &mut interrupt,
        )
        .await;
        self.finish_forward(end)
    }

    /// Cancel a persisted session's job and delete its record.
    pub async fn kill(&self, identifier: &str) -> Result<SessionOutcome, SessionError> {
        let record = self.store.read_all(identifier)?;
        let jobid = record.jobid.ok_or_else(|| {
            SessionError::Configuration(format!(
                "control record `{identifier}` has no jobid; nothing to cancel"
            ))
        })?;
        self.login.run(&format!("scancel {jobid}")).await?;
        self.store.delete(identifier)?;
        self.sink.activity(&format!("Cancelled job {jobid}."));
        Ok(SessionOutcome::Done)
    }

    // -----------------------------------------------------------------------
    // forward / code
    // -----------------------------------------------------------------------

    /// Forward `NODE:PORT` or `NODE:SOCKET` to a local port.
    pub async fn forward(
        &self,
        target: &str,
        page: Option<String>,
        local_port: Option<u16>,
        interrupt: Interrupt,
    ) -> Result<SessionOutcome, SessionError> {
        let (node, remote) = match target.split_once(':') {
            Some((node, remote)) if !node.is_empty() && !remote.is_empty() => (node, remote),
            _ => {
                return Err(SessionError::Configuration(format!(
                    "expected NODE:PORT or NODE:SOCKET, got `{target}`"
                )))
            }
        };
        let spec = ForwardSpec::new(RemoteTarget::parse(remote)?)
            .with_local_port(local_port)
            .with_browser_path(page);

        let mut held = HeldProcesses::default();
        let result = self.forward_inner(node, &spec, interrupt, &mut held).await;
        held.release().await;
        result
    }

    /// Open a local editor on a compute node through its ssh remote.
    pub async fn code(
        &self,
        path: &str,
        allocation: &AllocationRequest,
        interrupt: Interrupt,
    ) -> Result<SessionOutcome, SessionError> {
        let mut held = HeldProcesses::default();
        let result = self.code_inner(path, allocation, interrupt, &mut held).await;
        held.release().await;
        result
    }

    async fn code_inner(
        &self,
        path: &str,
        allocation: &AllocationRequest,
        mut interrupt: Interrupt,
        held: &mut HeldProcesses,
    ) -> Result<SessionOutcome, SessionError> {
        let home = self.login.home().await?;
        let path = absolute_remote_path(&home, path);
        let resolved = self.resolver.resolve(&self.login, allocation).await?;

        let (node_name, holder) = tokio::select! {
            granted = resolved.ensure_allocation() => granted?,
            _ = interrupt.triggered() => return Ok(SessionOutcome::Interrupted),
        };
        held.server = holder.map(|allocation| allocation.process);

        let argv = vec![
            "code".to_string(),
            "-nw".to_string(),
            "--remote".to_string(),
            format!("ssh-remote+{}", self.resolver.node_host(&node_name)),
            path,
        ];
        held.editor = Some(self.launcher.popen(&argv).await?);
        let outcome = tokio::select! {
            status = wait_or_log(held.editor.as_mut()) => SessionOutcome::RemoteExited(status),
            _ = interrupt.triggered() => SessionOutcome::Interrupted,
        };
        self.sink.activity(&format!("Ended session on '{node_name}'"));
        Ok(outcome)
    }

    // -----------------------------------------------------------------------
    // helpers
    // -----------------------------------------------------------------------

    fn finish_forward(&self, end: ActiveEnd) -> Result<SessionOutcome, SessionError> {
        match end {
            ActiveEnd::Interrupted => {
                self.sink.activity("Terminated by user.");
                Ok(SessionOutcome::Interrupted)
            }
            ActiveEnd::TunnelExited(status) => self.tunnel_exited(status),
            ActiveEnd::RemoteExited(status) => Ok(SessionOutcome::RemoteExited(status)),
        }
    }

    /// Only a clean tunnel exit ends a flow without an error.
    fn tunnel_exited(&self, status: Option<i32>) -> Result<SessionOutcome, SessionError> {
        match status {
            Some(0) => {
                self.sink.warn("The tunnel exited.");
                Ok(SessionOutcome::TunnelExited(status))
            }
            Some(code) => Err(SessionError::Tunnel(format!(
                "ssh tunnel exited with status {code}"
            ))),
            None => Err(SessionError::Tunnel(
                "ssh tunnel was terminated by a signal".to_string(),
            )),
        }
    }

    fn show_url(&self, local_port: u16, spec: &ForwardSpec) {
        let url = build_url(local_port, spec);
        self.sink.field("url", &url);
        if !self.opener.open(&url) {
            tracing::debug!(%url, "browser not opened");
        }
    }

    fn root(&self) -> &str {
        self.remote_root.trim_end_matches('/')
    }
}

async fn wait_or_log(process: Option<&mut ProcessHandle>) -> Option<i32> {
    let Some(process) = process else {
        return std::future::pending().await;
    };
    match process.wait().await {
        Ok(status) => status,
        Err(e) => {
            tracing::warn!(process = %process.label(), "wait failed: {e}");
            None
        }
    }
}

/// Block in the Active state until a held process exits or the user interrupts.
async fn wait_active(
    server: Option<&mut ProcessHandle>,
    tunnel: Option<&mut ProcessHandle>,
    interrupt: &mut Interrupt,
) -> ActiveEnd {
    tokio::select! {
        status = wait_or_log(server) => ActiveEnd::RemoteExited(status),
        status = wait_or_log(tunnel) => ActiveEnd::TunnelExited(status),
        _ = interrupt.triggered() => ActiveEnd::Interrupted,
    }
}

/// Resolve `path` against the remote home directory.
fn absolute_remote_path(home: &str, path: &str) -> String {
    let home = home.trim_end_matches('/');
    if path.starts_with('/') {
        path.to_string()
    } else if path == "~" {
        home.to_string()
    } else if let Some(rest) = path.strip_prefix("~/") {
        format!("{home}/{rest}")
    } else {
        format!("{home}/{path}")
    }
}
