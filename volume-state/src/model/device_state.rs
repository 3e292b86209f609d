//! Live state of one device as seen by the controller

use serde::Serialize;
use std::fmt;

use super::Device;

/// Where a device is in its refresh cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Phase {
    /// Never fetched and no local intent yet
    Unknown,
    Loading,
    Ready,
    /// The last request failed; the volume shown is the last known one
    Errored,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::Unknown => "unknown",
            Phase::Loading => "loading",
            Phase::Ready => "ready",
            Phase::Errored => "error",
        };
        f.write_str(s)
    }
}

/// A known device together with its last-known volume and mute state
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceState {
    pub device: Device,
    /// `None` until a status has been fetched or a volume set locally
    pub volume: Option<u8>,
    pub muted: bool,
    pub loading: bool,
    pub error: Option<String>,
}

impl DeviceState {
    pub fn new(device: Device) -> Self {
        Self {
            device,
            volume: None,
            muted: false,
            loading: false,
            error: None,
        }
    }

    /// Loading and errors take precedence over the volume
    ///
    /// A volume set locally counts as known: a device that was never fetched
    /// but carries an optimistic volume is [`Phase::Ready`] until its write or
    /// a refresh says otherwise.
    pub fn phase(&self) -> Phase {
        if self.loading {
            Phase::Loading
        } else if self.error.is_some() {
            Phase::Errored
        } else if self.volume.is_some() {
            Phase::Ready
        } else {
            Phase::Unknown
        }
    }
}
