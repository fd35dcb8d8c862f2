//! CLI argument parsing via clap.

use clap::{Parser, Subcommand};
use slurmtap::build_info::LONG_VERSION;
use slurmtap::services::ServiceKind;

/// Run services on Slurm compute nodes and forward them to this machine.
#[derive(Debug, Parser)]
#[command(name = "slurmtap", version, long_version = LONG_VERSION)]
pub struct Args {
    /// Path to config file (default: ./slurmtap.toml or ~/.config/slurmtap/slurmtap.toml).
    #[arg(short = 'c', long = "config", global = true)]
    pub config: Option<String>,

    /// Increase diagnostic logging (-v info, -vv debug, -vvv trace).
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Disable color output.
    #[arg(long = "no-color", global = true)]
    pub no_color: bool,

    /// Print URLs without opening a browser.
    #[arg(long = "no-browser", global = true)]
    pub no_browser: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// Where a command should run. Exclusivity is checked when resolving.
#[derive(Debug, Clone, Default, clap::Args)]
pub struct AllocationArgs {
    /// Run directly on an already allocated node.
    #[arg(long = "node")]
    pub node: Option<String>,

    /// Run on the node of a running job.
    #[arg(long = "job")]
    pub job: Option<String>,

    /// Arguments for a fresh allocation, e.g. `--alloc --gres=gpu:1 -t 2:00:00`.
    #[arg(long = "alloc", num_args = 1.., allow_hyphen_values = true, value_name = "ARGS")]
    pub alloc: Vec<String>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Launch a service on a compute node and forward it locally.
    Serve {
        service: ServiceKind,

        /// Directory (or log/repo path) the service opens.
        path: Option<String>,

        /// Profile script under the remote profiles directory.
        #[arg(long = "profile", value_name = "NAME")]
        profile: Option<String>,

        /// Keep the service running as a batch job after disconnecting.
        #[arg(long = "persist")]
        persist: bool,

        /// Install the service program when it is missing.
        #[arg(long = "install")]
        install: bool,

        /// Local port for the tunnel.
        #[arg(long = "port", value_name = "LOCAL")]
        port: Option<u16>,

        /// Remote port for services that listen on a chosen port (aim);
        /// other services reject it.
        #[arg(long = "remote-port", value_name = "PORT")]
        remote_port: Option<u16>,

        #[command(flatten)]
        allocation: AllocationArgs,
    },

    /// Reopen the tunnel of a persisted session.
    Reconnect {
        id: String,

        /// Local port for the tunnel (default: the one used last time).
        #[arg(long = "port", value_name = "LOCAL")]
        port: Option<u16>,
    },

    /// Cancel a persisted session and delete its record.
    Kill { id: String },

    /// Forward NODE:PORT or NODE:SOCKET to a local port.
    Forward {
        target: String,

        /// Path to open in the browser.
        #[arg(long = "page", value_name = "PATH")]
        page: Option<String>,

        /// Local port for the tunnel.
        #[arg(long = "port", value_name = "LOCAL")]
        port: Option<u16>,
    },

    /// Open a local editor on a compute node.
    Code {
        path: String,

        #[command(flatten)]
        allocation: AllocationArgs,
    },
}
