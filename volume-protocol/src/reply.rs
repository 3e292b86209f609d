//! Reply bodies produced by the daemon and decoded by controllers

use serde::{Deserialize, Serialize};

use crate::status::clamp_volume;
use crate::{ProtocolError, Result, StatusPayload, VolumeOnly};

/// A reply body as sent by the daemon
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Reply {
    /// Full status, for `/`
    Status(StatusPayload),
    /// Volume only, for the legacy `/volume` resource
    Volume(VolumeOnly),
    /// In-band failure
    Error { error: String },
}

impl Reply {
    /// Error reply for an unknown method/path combination
    pub fn not_found() -> Self {
        Self::error("Not found")
    }

    /// Error reply for a body that could not be decoded
    pub fn invalid_request() -> Self {
        Self::error("Invalid request")
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            error: message.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }

    /// Serialized JSON followed by the trailing newline
    pub fn to_body(&self) -> String {
        let mut body = serde_json::to_string(self)
            .unwrap_or_else(|_| String::from(r#"{"error":"Internal error"}"#));
        body.push('\n');
        body
    }
}

/// Tolerant view over any reply body
///
/// Controllers decode every reply into this shape first, then check for an
/// in-band `error` before extracting the fields they need.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ReplyEnvelope {
    #[serde(default)]
    pub volume: Option<i64>,
    #[serde(default)]
    pub muted: Option<bool>,
    #[serde(default)]
    pub error: Option<String>,
}

impl ReplyEnvelope {
    /// Decode a reply body
    pub fn decode(body: &[u8]) -> Result<Self> {
        serde_json::from_slice(body).map_err(|e| ProtocolError::InvalidReply(e.to_string()))
    }

    /// The daemon-reported error, if any
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Extract a full status; both fields must be present
    pub fn status(&self) -> Result<StatusPayload> {
        match (self.volume, self.muted) {
            (Some(volume), Some(muted)) => Ok(StatusPayload::new(volume, muted)),
            (None, _) => Err(ProtocolError::InvalidReply("missing volume".to_string())),
            (_, None) => Err(ProtocolError::InvalidReply("missing muted".to_string())),
        }
    }

    /// Extract only the volume, as returned by the legacy resource
    pub fn volume(&self) -> Result<u8> {
        self.volume
            .map(clamp_volume)
            .ok_or_else(|| ProtocolError::InvalidReply("missing volume".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_body() {
        let reply = Reply::Status(StatusPayload::new(35, true));
        assert_eq!(reply.to_body(), "{\"volume\":35,\"muted\":true}\n");
    }

    #[test]
    fn test_volume_only_body() {
        let reply = Reply::Volume(VolumeOnly { volume: 12 });
        assert_eq!(reply.to_body(), "{\"volume\":12}\n");
    }

    #[test]
    fn test_not_found_body() {
        assert_eq!(Reply::not_found().to_body(), "{\"error\":\"Not found\"}\n");
        assert!(Reply::not_found().is_error());
    }

    #[test]
    fn test_envelope_status() {
        let envelope = ReplyEnvelope::decode(br#"{"volume": 80, "muted": false}"#).unwrap();
        assert_eq!(envelope.error(), None);
        assert_eq!(envelope.status().unwrap(), StatusPayload::new(80, false));
    }

    #[test]
    fn test_envelope_error() {
        let envelope = ReplyEnvelope::decode(br#"{"error": "Not found"}"#).unwrap();
        assert_eq!(envelope.error(), Some("Not found"));
        assert!(envelope.status().is_err());
    }

    #[test]
    fn test_envelope_clamps_misbehaving_daemon() {
        let envelope = ReplyEnvelope::decode(br#"{"volume": 140, "muted": true}"#).unwrap();
        assert_eq!(envelope.status().unwrap().volume, 100);
    }

    #[test]
    fn test_envelope_legacy_volume() {
        let envelope = ReplyEnvelope::decode(b"{\"volume\": 9}\n").unwrap();
        assert_eq!(envelope.volume().unwrap(), 9);
        assert!(envelope.status().is_err());
    }

    #[test]
    fn test_envelope_rejects_garbage() {
        assert!(matches!(
            ReplyEnvelope::decode(b"<html>"),
            Err(ProtocolError::InvalidReply(_))
        ));
    }
}
