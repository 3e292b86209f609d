//! Device record as persisted by the store

use serde::{Deserialize, Serialize};
use volume_client::Endpoint;
use volume_protocol::DEFAULT_PORT;

use super::DeviceId;
use crate::error::{Result, StateError};

fn default_port() -> u16 {
    DEFAULT_PORT
}

/// A daemon the controller knows about
///
/// `host:port` pairs are not required to be unique; two records may point at
/// the same daemon.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Device {
    pub id: DeviceId,
    pub name: String,
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Device {
    /// Creates a device with a freshly generated id
    pub fn new(name: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self::with_id(DeviceId::generate(), name, host, port)
    }

    /// Name and host are trimmed of surrounding whitespace
    pub fn with_id(
        id: DeviceId,
        name: impl Into<String>,
        host: impl Into<String>,
        port: u16,
    ) -> Self {
        Self {
            id,
            name: name.into().trim().to_string(),
            host: host.into().trim().to_string(),
            port,
        }
    }

    pub fn endpoint(&self) -> Endpoint {
        Endpoint::new(self.host.clone(), self.port)
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(StateError::InvalidDevice("name must not be empty".to_string()));
        }
        if self.host.trim().is_empty() {
            return Err(StateError::InvalidDevice("host must not be empty".to_string()));
        }
        if self.host.chars().any(char::is_whitespace) {
            return Err(StateError::InvalidDevice(format!(
                "host '{}' contains whitespace",
                self.host
            )));
        }
        if self.port == 0 {
            return Err(StateError::InvalidDevice("port must be greater than 0".to_string()));
        }
        Ok(())
    }
}
