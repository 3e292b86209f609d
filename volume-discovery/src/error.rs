//! Error types for advertisement and browsing.

use thiserror::Error;

/// Error type for discovery operations
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// The mDNS responder could not be created or refused a request
    #[error("mDNS error: {0}")]
    Mdns(String),

    /// `start` was called while a session is still running
    #[error("A discovery session is already running")]
    AlreadyBrowsing,

    /// A service or instance name that does not fit DNS-SD
    #[error("Invalid service name: {0}")]
    InvalidName(String),
}

impl From<mdns_sd::Error> for DiscoveryError {
    fn from(e: mdns_sd::Error) -> Self {
        DiscoveryError::Mdns(e.to_string())
    }
}

/// Convenience Result type alias for discovery operations.
pub type Result<T> = std::result::Result<T, DiscoveryError>;
