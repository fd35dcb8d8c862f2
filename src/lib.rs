//! slurmtap: run interactive services on Slurm compute nodes and reach them
//! through ssh tunnels.
//!
//! A session resolves where to run (an existing node, a running job, or a
//! fresh allocation), launches a service there, harvests the node name, port
//! and token from the service output, and forwards the remote endpoint to a
//! local port. Persisted sessions leave a control record behind so they can
//! be reconnected to or cancelled later.
//!
//! # Quick start
//!
//! ```no_run
//! use slurmtap::control::ControlFileStore;
//!
//! let store = ControlFileStore::new("/tmp/slurmtap-control");
//! let id = store.create().unwrap();
//! store.append(&id, "node_name", "cn-a001").unwrap();
//! assert_eq!(store.read_all(&id).unwrap().node_name.as_deref(), Some("cn-a001"));
//! ```

pub mod alloc;
pub mod browser;
pub mod build_info;
pub mod config;
pub mod control;
pub mod error;
pub mod exec;
pub mod extract;
pub mod forward;
pub mod logging;
pub mod profile;
pub mod services;
pub mod session;
#[cfg(test)]
pub mod testsupport;
pub mod ui;
