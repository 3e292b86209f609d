//! Status value objects carried on the wire

use serde::{Deserialize, Serialize};

use crate::{ProtocolError, Result, MAX_VOLUME};

/// Clamp an arbitrary integer onto the `0..=100` volume scale
pub fn clamp_volume(volume: i64) -> u8 {
    // Bounded by the clamp, the cast cannot truncate
    volume.clamp(0, i64::from(MAX_VOLUME)) as u8
}

/// Current volume and mute state of a host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StatusPayload {
    pub volume: u8,
    pub muted: bool,
}

impl StatusPayload {
    /// Creates a payload, clamping `volume` onto the valid scale
    pub fn new(volume: i64, muted: bool) -> Self {
        Self {
            volume: clamp_volume(volume),
            muted,
        }
    }
}

/// Partial update sent with `POST /`
///
/// Either field may be absent (or `null`), in which case that part of the
/// host state is left untouched. Unknown fields are ignored. The volume is
/// kept as a raw integer so out-of-range requests can be clamped rather than
/// rejected.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub muted: Option<bool>,
}

impl StatusUpdate {
    /// Update that only changes the volume
    pub fn volume(volume: impl Into<i64>) -> Self {
        Self {
            volume: Some(volume.into()),
            muted: None,
        }
    }

    /// Update that only changes the mute state
    pub fn muted(muted: bool) -> Self {
        Self {
            volume: None,
            muted: Some(muted),
        }
    }

    /// True when applying this update would change nothing
    pub fn is_empty(&self) -> bool {
        self.volume.is_none() && self.muted.is_none()
    }

    /// Requested volume clamped onto `0..=100`
    pub fn clamped_volume(&self) -> Option<u8> {
        self.volume.map(clamp_volume)
    }

    /// Decode a request body.
    ///
    /// An empty (or whitespace-only) body is an empty update, so a bare
    /// `POST /` behaves like `GET /`.
    pub fn from_body(body: &[u8]) -> Result<Self> {
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self::default());
        }
        serde_json::from_slice(body).map_err(|e| ProtocolError::InvalidBody(e.to_string()))
    }

    /// Encode as a request body
    pub fn to_body(&self) -> String {
        // Two optional scalars always serialize
        serde_json::to_string(self).unwrap_or_else(|_| String::from("{}"))
    }
}

/// Volume-only payload of the legacy `/volume` resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeOnly {
    pub volume: u8,
}
