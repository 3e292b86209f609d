use thiserror::Error;

/// Errors raised while encoding or decoding protocol messages
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The HTTP request line did not contain a method and a path
    #[error("Malformed request line: {0:?}")]
    MalformedRequestLine(String),

    /// A request body could not be decoded as a status update
    #[error("Invalid request body: {0}")]
    InvalidBody(String),

    /// A reply body was not valid JSON or lacked the expected fields
    #[error("Invalid reply: {0}")]
    InvalidReply(String),
}

/// Type alias for results that can return a ProtocolError
pub type Result<T> = std::result::Result<T, ProtocolError>;
