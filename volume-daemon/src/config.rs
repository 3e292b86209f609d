//! Configuration for the volume daemon

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use volume_protocol::{DEFAULT_PORT, MAX_VOLUME};

use crate::{DaemonError, Result};

/// Instance name used when the host name cannot be determined
pub const FALLBACK_INSTANCE_NAME: &str = "volumectl";

/// Configuration for [`VolumeServer`](crate::VolumeServer) and the advertiser
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    /// Address to listen on
    /// Default: 0.0.0.0
    pub bind_address: IpAddr,

    /// Port to listen on; 0 lets the OS pick one
    /// Default: 8888
    pub port: u16,

    /// DNS-SD instance name
    /// Default: the host name
    pub instance_name: String,

    /// Advertise the daemon over DNS-SD
    /// Default: true
    pub advertise: bool,

    /// Serve the volume-only `/volume` resource alongside `/`
    /// Default: true
    pub legacy_volume_endpoint: bool,

    /// Deadline for reading a request and writing its reply
    /// Default: 10 seconds
    pub request_timeout: Duration,

    /// Maximum size of the request line plus headers
    /// Default: 8 KiB
    pub max_head_bytes: usize,

    /// Maximum accepted `Content-Length`
    /// Default: 64 KiB
    pub max_body_bytes: usize,

    /// Starting volume of the software backend
    /// Default: 50
    pub initial_volume: u8,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
            instance_name: default_instance_name(),
            advertise: true,
            legacy_volume_endpoint: true,
            request_timeout: Duration::from_secs(10),
            max_head_bytes: 8 * 1024,
            max_body_bytes: 64 * 1024,
            initial_volume: 50,
        }
    }
}

impl DaemonConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loopback-only, OS-assigned port, no advertisement
    pub fn local() -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 0,
            advertise: false,
            ..Default::default()
        }
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.port)
    }

    pub fn validate(&self) -> Result<()> {
        if self.instance_name.trim().is_empty() {
            return Err(DaemonError::Config(
                "Instance name must not be empty".to_string(),
            ));
        }

        if self.request_timeout == Duration::ZERO {
            return Err(DaemonError::Config(
                "Request timeout must be greater than 0".to_string(),
            ));
        }

        if self.max_head_bytes == 0 {
            return Err(DaemonError::Config(
                "Max head size must be greater than 0".to_string(),
            ));
        }

        if self.initial_volume > MAX_VOLUME {
            return Err(DaemonError::Config(format!(
                "Initial volume must be at most {}",
                MAX_VOLUME
            )));
        }

        if self.advertise && self.port == 0 {
            return Err(DaemonError::Config(
                "An advertised daemon needs a fixed port".to_string(),
            ));
        }

        Ok(())
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_instance_name(mut self, name: impl Into<String>) -> Self {
        self.instance_name = name.into();
        self
    }

    pub fn with_legacy_volume_endpoint(mut self, enabled: bool) -> Self {
        self.legacy_volume_endpoint = enabled;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

/// Host name from the environment, or [`FALLBACK_INSTANCE_NAME`]
pub fn default_instance_name() -> String {
    ["HOSTNAME", "COMPUTERNAME"]
        .iter()
        .filter_map(|key| std::env::var(key).ok())
        .map(|name| name.trim().to_string())
        .find(|name| !name.is_empty())
        .unwrap_or_else(|| FALLBACK_INSTANCE_NAME.to_string())
}
