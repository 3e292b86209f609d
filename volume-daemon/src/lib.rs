//! Volume daemon: exposes the host's volume and mute state over HTTP.
//!
//! The daemon is a one-shot HTTP/1.1 server. Each connection carries a single
//! request, is answered with a JSON body and is then closed. Requests are
//! handled on independent tasks; the host mixer behind [`VolumeBackend`] is the
//! only shared resource and serializes its own access.
//!
//! # Overview
//!
//! - [`VolumeServer`]: binds the listening socket, runs the accept loop and
//!   hands every connection its own task.
//! - [`Router`]: maps `(method, path, body)` to a [`Reply`](volume_protocol::Reply).
//! - [`VolumeBackend`]: the host capability, already on the 0-100 scale.
//!   [`MixerBackend`] adapts a step-based [`Mixer`] onto it.
//! - [`DaemonConfig`]: bind address, port, instance name and per-connection
//!   limits.
//!
//! Protocol-level failures never produce a non-200 status; they are reported
//! in-band through an `error` field. Malformed or truncated request lines are
//! answered by closing the connection.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use volume_daemon::{DaemonConfig, SoftwareBackend, VolumeServer};
//!
//! # async fn run() -> Result<(), volume_daemon::DaemonError> {
//! let config = DaemonConfig::local();
//! let server = VolumeServer::start(&config, Arc::new(SoftwareBackend::with_volume(30))).await?;
//! println!("curl http://{}/", server.local_addr());
//! server.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod config;
pub mod error;
pub mod router;
pub mod server;

pub use backend::{
    BackendError, Mixer, MixerBackend, SoftwareBackend, SoftwareMixer, StepScale, VolumeBackend,
};
pub use config::{default_instance_name, DaemonConfig};
pub use error::{DaemonError, Result};
pub use router::Router;
pub use server::VolumeServer;
