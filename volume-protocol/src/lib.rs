//! Wire protocol shared by the volume daemon and its controllers
//!
//! The protocol is a deliberately tiny HTTP/1.1 surface carrying JSON:
//!
//! ```text
//! GET  /        -> {"volume": 42, "muted": false}
//! POST /        <- {"volume"?: int, "muted"?: bool}
//!               -> {"volume": 42, "muted": false}
//! GET  /volume  -> {"volume": 42}                     (legacy)
//! POST /volume  <- {"volume": int} -> {"volume": 42}  (legacy)
//! *             -> {"error": "Not found"}
//! ```
//!
//! Every reply uses status `200 OK`; failures are reported in-band through the
//! `error` field. Bodies always end with a single newline that is counted in
//! `Content-Length`.
//!
//! # Example
//!
//! ```
//! use volume_protocol::{Reply, StatusPayload, StatusUpdate};
//!
//! let update = StatusUpdate::from_body(br#"{"volume": 150, "extra": true}"#).unwrap();
//! assert_eq!(update.clamped_volume(), Some(100));
//!
//! let reply = Reply::Status(StatusPayload::new(100, false));
//! assert_eq!(reply.to_body(), "{\"volume\":100,\"muted\":false}\n");
//! ```

pub mod error;
pub mod http;
pub mod reply;
pub mod status;

pub use error::{ProtocolError, Result};
pub use http::{build_response, content_length, Method, RequestLine};
pub use reply::{Reply, ReplyEnvelope};
pub use status::{clamp_volume, StatusPayload, StatusUpdate, VolumeOnly};

/// Port the daemon listens on unless configured otherwise
pub const DEFAULT_PORT: u16 = 8888;

/// DNS-SD service type daemons advertise and controllers browse for
pub const SERVICE_TYPE: &str = "_volumecontrol._tcp.local.";

/// Path of the combined volume/mute resource
pub const STATUS_PATH: &str = "/";

/// Path of the volume-only resource kept for older controllers
pub const LEGACY_VOLUME_PATH: &str = "/volume";

/// Upper bound of the normalized volume scale
pub const MAX_VOLUME: u8 = 100;
