//! Request routing.
//!
//! This module provides the `Router` which maps a parsed request onto the
//! volume backend and produces the reply body. It knows nothing about sockets,
//! so it can be exercised directly in tests.

use std::sync::Arc;

use tracing::{debug, warn};
use volume_protocol::{
    Method, Reply, StatusPayload, StatusUpdate, VolumeOnly, LEGACY_VOLUME_PATH, STATUS_PATH,
};

use crate::backend::{BackendError, VolumeBackend};

/// Routes requests to the volume backend.
///
/// `GET /` and `POST /` serve the combined status resource. The legacy
/// volume-only resource at `/volume` is served when enabled. Everything else
/// gets the in-band `"Not found"` error.
#[derive(Clone)]
pub struct Router {
    backend: Arc<dyn VolumeBackend>,
    legacy_volume_endpoint: bool,
}

impl Router {
    pub fn new(backend: Arc<dyn VolumeBackend>, legacy_volume_endpoint: bool) -> Self {
        Self {
            backend,
            legacy_volume_endpoint,
        }
    }

    /// Produce the reply for one request
    pub async fn route(&self, method: &Method, path: &str, body: &[u8]) -> Reply {
        match (method, path) {
            (Method::Get, STATUS_PATH) => self.status_reply(self.get().await),
            (Method::Post, STATUS_PATH) => match StatusUpdate::from_body(body) {
                Ok(update) => {
                    let reply = self.set(update.clamped_volume(), update.muted).await;
                    self.status_reply(reply)
                }
                Err(e) => {
                    debug!("Rejecting status update: {}", e);
                    Reply::invalid_request()
                }
            },
            (Method::Get, LEGACY_VOLUME_PATH) if self.legacy_volume_endpoint => {
                self.volume_reply(self.get().await)
            }
            (Method::Post, LEGACY_VOLUME_PATH) if self.legacy_volume_endpoint => {
                match StatusUpdate::from_body(body).map(|u| u.clamped_volume()) {
                    Ok(Some(volume)) => self.volume_reply(self.set(Some(volume), None).await),
                    Ok(None) => Reply::invalid_request(),
                    Err(e) => {
                        debug!("Rejecting legacy volume update: {}", e);
                        Reply::invalid_request()
                    }
                }
            }
            _ => Reply::not_found(),
        }
    }

    async fn get(&self) -> Result<StatusPayload, BackendError> {
        let backend = Arc::clone(&self.backend);
        Self::blocking(move || backend.get()).await
    }

    async fn set(
        &self,
        volume: Option<u8>,
        muted: Option<bool>,
    ) -> Result<StatusPayload, BackendError> {
        let backend = Arc::clone(&self.backend);
        Self::blocking(move || backend.set(volume, muted)).await
    }

    /// Backends may shell out or hit OS audio APIs, so keep them off the reactor
    async fn blocking<F>(f: F) -> Result<StatusPayload, BackendError>
    where
        F: FnOnce() -> Result<StatusPayload, BackendError> + Send + 'static,
    {
        tokio::task::spawn_blocking(f)
            .await
            .map_err(|e| BackendError::Unavailable(e.to_string()))?
    }

    fn status_reply(&self, result: Result<StatusPayload, BackendError>) -> Reply {
        match result {
            Ok(status) => Reply::Status(status),
            Err(e) => {
                warn!("Volume backend failed: {}", e);
                Reply::error(e.to_string())
            }
        }
    }

    fn volume_reply(&self, result: Result<StatusPayload, BackendError>) -> Reply {
        match result {
            Ok(status) => Reply::Volume(VolumeOnly {
                volume: status.volume,
            }),
            Err(e) => {
                warn!("Volume backend failed: {}", e);
                Reply::error(e.to_string())
            }
        }
    }
}
