use std::net::SocketAddr;

use thiserror::Error;

/// Errors that can stop the daemon from starting or running
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, DaemonError>;
