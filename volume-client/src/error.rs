//! Error types for the volume client

use thiserror::Error;

/// Every way a call to a daemon can fail.
///
/// The `Display` text is what a controller shows next to the device, so each
/// variant renders as one self-contained message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    /// Connection refused, reset, DNS failure and the like
    #[error("Connection failed: {0}")]
    Transport(String),

    /// Connect or read deadline exceeded
    #[error("Request timed out")]
    Timeout,

    /// The peer answered with something other than `200 OK`
    #[error("Unexpected HTTP status {0}")]
    Http(u16),

    /// The reply body was not a usable status payload
    #[error("Invalid response: {0}")]
    Decode(String),

    /// The daemon reported an error in-band
    #[error("{0}")]
    Remote(String),
}

impl From<reqwest::Error> for ApiError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ApiError::Timeout
        } else if let Some(status) = e.status() {
            ApiError::Http(status.as_u16())
        } else {
            ApiError::Transport(e.to_string())
        }
    }
}

impl From<volume_protocol::ProtocolError> for ApiError {
    fn from(e: volume_protocol::ProtocolError) -> Self {
        ApiError::Decode(e.to_string())
    }
}
