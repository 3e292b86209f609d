//! Error types for volume-state

use thiserror::Error;

use crate::model::DeviceId;

/// Result type for volume-state operations
pub type Result<T> = std::result::Result<T, StateError>;

/// Errors that can occur while managing the device list
#[derive(Debug, Error)]
pub enum StateError {
    /// The device list could not be read or written
    #[error("Device store error: {0}")]
    Store(#[from] StoreError),

    /// No known device has this id
    #[error("Device not found: {0}")]
    DeviceNotFound(DeviceId),

    /// A device record failed validation
    #[error("Invalid device: {0}")]
    InvalidDevice(String),

    /// A daemon call failed; the error is also recorded on the device
    #[error(transparent)]
    Api(#[from] volume_client::ApiError),

    /// Invalid engine configuration
    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// Failures of a [`DeviceStore`](crate::DeviceStore) backend
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed device list: {0}")]
    Serialization(#[from] serde_json::Error),

    /// No per-user configuration directory on this platform
    #[error("No configuration directory available")]
    NoConfigDir,

    /// The backend refused the operation
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}
