//! CLI entry point for slurmtap.

mod cli;

use clap::Parser;
use cli::{AllocationArgs, Args, Command};
use slurmtap::alloc::{AllocationRequest, AllocationResolver};
use slurmtap::browser::{NoBrowser, SystemBrowser, UrlOpener};
use slurmtap::config::{load_config, Config};
use slurmtap::control::ControlFileStore;
use slurmtap::error::SessionError;
use slurmtap::exec::{RemoteEndpoint, SshTransport, SystemLauncher};
use slurmtap::forward::PortForwardManager;
use slurmtap::logging;
use slurmtap::session::{Interrupt, ServeRequest, SessionOrchestrator, SessionOutcome};
use slurmtap::ui::render::{RenderSink, Renderer};
use std::process::ExitCode;
use std::sync::Arc;

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    logging::init(args.verbose);

    let mut config = match load_config(args.config.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            Renderer::new(!args.no_color).error(&e.to_string());
            return ExitCode::FAILURE;
        }
    };
    if args.no_color {
        config.display.color = false;
    }
    if args.no_browser {
        config.display.open_browser = false;
    }

    let renderer = Renderer::new(config.display.color);
    let interrupt = install_interrupt_handler();

    match run(args.command, &config, Arc::new(renderer), interrupt).await {
        Ok(outcome) => {
            tracing::debug!(?outcome, "finished");
            ExitCode::SUCCESS
        }
        Err(e) => {
            renderer.error(&e.to_string());
            ExitCode::FAILURE
        }
    }
}

/// Ctrl-C flips the shared interrupt; flows decide what it means.
fn install_interrupt_handler() -> Interrupt {
    let (tx, interrupt) = Interrupt::channel();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::debug!("interrupt received");
            let _ = tx.send(true);
        }
    });
    interrupt
}

fn build_orchestrator(config: &Config, sink: Arc<dyn RenderSink>) -> SessionOrchestrator {
    let transport = Arc::new(SshTransport::new(config.ssh.program.clone(), sink.clone()));
    let login = RemoteEndpoint::new(config.cluster.login_host.clone(), transport)
        .with_output_sink(sink.clone());
    let launcher = Arc::new(SystemLauncher::new(sink.clone()));
    let forwarder = PortForwardManager::new(
        launcher.clone(),
        config.ssh.program.clone(),
        config.ssh.tunnel_options.clone(),
    );
    let opener: Arc<dyn UrlOpener> = if config.display.open_browser {
        Arc::new(SystemBrowser)
    } else {
        Arc::new(NoBrowser)
    };
    SessionOrchestrator::new(
        login,
        AllocationResolver::new(
            config.cluster.node_host_suffix.clone(),
            config.paths.remote_root.clone(),
        ),
        forwarder,
        ControlFileStore::new(&config.paths.control_dir),
        launcher,
        opener,
        sink,
        config.paths.remote_root.clone(),
    )
}

fn allocation_request(args: AllocationArgs) -> Result<AllocationRequest, SessionError> {
    AllocationRequest::from_options(args.node, args.job, args.alloc)
}

async fn run(
    command: Command,
    config: &Config,
    sink: Arc<dyn RenderSink>,
    interrupt: Interrupt,
) -> Result<SessionOutcome, SessionError> {
    let orchestrator = build_orchestrator(config, sink);
    match command {
        Command::Serve {
            service,
            path,
            profile,
            persist,
            install,
            port,
            remote_port,
            allocation,
        } => {
            let request = ServeRequest {
                service,
                path,
                profile,
                persist,
                install,
                local_port: port,
                remote_port,
                allocation: allocation_request(allocation)?,
            };
            orchestrator.start_and_serve(request, interrupt).await
        }
        Command::Reconnect { id, port } => orchestrator.reconnect(&id, port, interrupt).await,
        Command::Kill { id } => orchestrator.kill(&id).await,
        Command::Forward { target, page, port } => {
            orchestrator.forward(&target, page, port, interrupt).await
        }
        Command::Code { path, allocation } => {
            let request = allocation_request(allocation)?;
            orchestrator.code(&path, &request, interrupt).await
        }
    }
}
