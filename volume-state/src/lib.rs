//! Controller-side device state for volumectl
//!
//! Keeps the list of known volume daemons and their live volume/mute state in
//! sync with reality, despite latency, failures and continuous user input.
//!
//! # Architecture
//!
//! ```text
//! DeviceStore ──load/save──► SyncEngine ──StatusApi──► daemons
//!                               │
//!                               └── watch::Receiver<Vec<DeviceState>> ──► UI
//! ```
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use volume_client::VolumeClient;
//! use volume_state::{JsonFileStore, SyncConfig, SyncEngine};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(JsonFileStore::open_default()?);
//! let client = VolumeClient::new(Default::default())?;
//! let engine = SyncEngine::new(client, store, SyncConfig::default())?;
//!
//! engine.load_devices().await?;
//! for state in engine.snapshot() {
//!     println!("{}: {:?} ({})", state.device.name, state.volume, state.phase());
//! }
//!
//! // Slider movement: shown at once, sent after 500ms of quiet
//! if let Some(den) = engine.resolve("Den") {
//!     engine.set_volume(&den.device.id, 40)?;
//! }
//! # Ok(())
//! # }
//! ```

mod config;
mod engine;
mod error;
pub mod logging;
pub mod model;
mod store;

pub use config::SyncConfig;
pub use engine::SyncEngine;
pub use error::{Result, StateError, StoreError};
pub use model::{Device, DeviceId, DeviceState, Phase};
pub use store::{DeviceStore, JsonFileStore, MemoryStore, StoreResult};
