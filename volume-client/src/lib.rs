//! HTTP client for volume daemons
//!
//! [`VolumeClient`] speaks the daemon's JSON-over-HTTP protocol with bounded
//! connect and read timeouts. Every failure, whether transport, protocol or an
//! in-band `error` reply, surfaces as a single [`ApiError`].
//!
//! Controllers depend on the [`StatusApi`] trait rather than on the client
//! itself, so they can be driven by fakes in tests.
//!
//! # Example
//!
//! ```no_run
//! use volume_client::{Endpoint, StatusApi, VolumeClient};
//!
//! # async fn run() -> Result<(), volume_client::ApiError> {
//! let client = VolumeClient::new(Default::default())?;
//! let den = Endpoint::new("192.168.1.20", 8888);
//!
//! let status = client.get_status(&den).await?;
//! println!("volume {} muted {}", status.volume, status.muted);
//!
//! client.set_volume(&den, 40).await?;
//! # Ok(())
//! # }
//! ```

mod error;

pub use error::ApiError;

use std::fmt;
use std::net::Ipv6Addr;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time;
use tracing::debug;
use volume_protocol::{
    ReplyEnvelope, StatusPayload, StatusUpdate, LEGACY_VOLUME_PATH, STATUS_PATH,
};

pub type Result<T> = std::result::Result<T, ApiError>;

/// Address of one daemon
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// `http://host:port`, with IPv6 literals bracketed
    pub fn base_url(&self) -> String {
        let host = self.host.trim();
        if host.parse::<Ipv6Addr>().is_ok() {
            format!("http://[{}]:{}", host, self.port)
        } else {
            format!("http://{}:{}", host, self.port)
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url(), path)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.parse::<Ipv6Addr>().is_ok() {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// Timeouts for [`VolumeClient`]
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Deadline for establishing the TCP connection
    /// Default: 5 seconds
    pub connect_timeout: Duration,

    /// Deadline for the reply once connected
    /// Default: 5 seconds
    pub read_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            read_timeout: Duration::from_secs(5),
        }
    }
}

impl ClientConfig {
    pub fn validate(&self) -> Result<()> {
        if self.connect_timeout == Duration::ZERO || self.read_timeout == Duration::ZERO {
            return Err(ApiError::Transport(
                "Timeouts must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// The status operations a controller needs from a daemon
#[async_trait]
pub trait StatusApi: Send + Sync + 'static {
    /// `GET /`
    async fn get_status(&self, endpoint: &Endpoint) -> Result<StatusPayload>;

    /// `POST /` with a partial update; returns the resulting status
    async fn set_status(&self, endpoint: &Endpoint, update: &StatusUpdate) -> Result<StatusPayload>;

    async fn set_volume(&self, endpoint: &Endpoint, volume: u8) -> Result<StatusPayload> {
        self.set_status(endpoint, &StatusUpdate::volume(volume)).await
    }

    async fn set_muted(&self, endpoint: &Endpoint, muted: bool) -> Result<StatusPayload> {
        self.set_status(endpoint, &StatusUpdate::muted(muted)).await
    }
}

/// Client for the daemon's HTTP protocol
#[derive(Debug, Clone)]
pub struct VolumeClient {
    http: reqwest::Client,
    config: ClientConfig,
}

impl VolumeClient {
    pub fn new(config: ClientConfig) -> Result<Self> {
        config.validate()?;

        // The read deadline is applied per phase in `send`
        let http = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .no_proxy()
            .user_agent(concat!("volumectl/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ApiError::Transport(e.to_string()))?;

        Ok(Self { http, config })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// `GET /volume` on daemons that still serve the volume-only resource
    pub async fn get_volume(&self, endpoint: &Endpoint) -> Result<u8> {
        let envelope = self
            .send(self.http.get(endpoint.url(LEGACY_VOLUME_PATH)))
            .await?;
        Ok(envelope.volume()?)
    }

    /// `POST /volume`; returns the volume the daemon applied
    pub async fn set_legacy_volume(&self, endpoint: &Endpoint, volume: u8) -> Result<u8> {
        let body = StatusUpdate::volume(volume).to_body();
        let envelope = self
            .send(self.post(endpoint, LEGACY_VOLUME_PATH, body))
            .await?;
        Ok(envelope.volume()?)
    }

    fn post(&self, endpoint: &Endpoint, path: &str, body: String) -> reqwest::RequestBuilder {
        self.http
            .post(endpoint.url(path))
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body)
    }

    /// Send a request and decode the reply, turning in-band errors into [`ApiError::Remote`]
    ///
    /// Waiting for the reply head and reading the body are each bounded by
    /// `read_timeout`. The head wait includes connecting, which `connect_timeout`
    /// caps on its own.
    async fn send(&self, request: reqwest::RequestBuilder) -> Result<ReplyEnvelope> {
        let read_timeout = self.config.read_timeout;

        let response = time::timeout(read_timeout, request.send())
            .await
            .map_err(|_| ApiError::Timeout)??;
        let status = response.status();
        if !status.is_success() {
            return Err(ApiError::Http(status.as_u16()));
        }

        let body = time::timeout(read_timeout, response.bytes())
            .await
            .map_err(|_| ApiError::Timeout)??;
        let envelope = ReplyEnvelope::decode(&body)?;
        if let Some(message) = envelope.error() {
            return Err(ApiError::Remote(message.to_string()));
        }
        Ok(envelope)
    }
}

#[async_trait]
impl StatusApi for VolumeClient {
    async fn get_status(&self, endpoint: &Endpoint) -> Result<StatusPayload> {
        debug!("GET {}", endpoint);
        let envelope = self.send(self.http.get(endpoint.url(STATUS_PATH))).await?;
        Ok(envelope.status()?)
    }

    async fn set_status(&self, endpoint: &Endpoint, update: &StatusUpdate) -> Result<StatusPayload> {
        debug!("POST {} {}", endpoint, update.to_body());
        let envelope = self
            .send(self.post(endpoint, STATUS_PATH, update.to_body()))
            .await?;
        Ok(envelope.status()?)
    }
}
