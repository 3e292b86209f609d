//! Persistence for the controller's device list
//!
//! The list is stored as an ordered JSON array of `{id, name, host, port}`
//! records. [`JsonFileStore`] keeps it in a file under the user's
//! configuration directory; [`MemoryStore`] keeps it in memory for tests and
//! embedding.

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tracing::debug;

use crate::error::StoreError;
use crate::model::Device;

/// Result type for store backends
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Backing storage for the device list
///
/// Calls are short and synchronous; implementations must be safe to share
/// between threads.
pub trait DeviceStore: Send + Sync + 'static {
    /// Returns the stored devices in order; an absent list is empty
    fn load(&self) -> StoreResult<Vec<Device>>;

    /// Replaces the stored list
    fn save(&self, devices: &[Device]) -> StoreResult<()>;
}

/// Device list kept in a JSON file
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `<config dir>/volumectl/devices.json`
    pub fn default_path() -> StoreResult<PathBuf> {
        dirs::config_dir()
            .map(|dir| dir.join("volumectl").join("devices.json"))
            .ok_or(StoreError::NoConfigDir)
    }

    pub fn open_default() -> StoreResult<Self> {
        Ok(Self::new(Self::default_path()?))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    fn io_error(&self, source: std::io::Error) -> StoreError {
        StoreError::Io {
            path: self.path.display().to_string(),
            source,
        }
    }
}

impl DeviceStore for JsonFileStore {
    fn load(&self) -> StoreResult<Vec<Device>> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("No device list at {}", self.path.display());
                return Ok(Vec::new());
            }
            Err(e) => return Err(self.io_error(e)),
        };

        if contents.trim().is_empty() {
            return Ok(Vec::new());
        }
        Ok(serde_json::from_str(&contents)?)
    }

    fn save(&self, devices: &[Device]) -> StoreResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| self.io_error(e))?;
            }
        }

        let json = serde_json::to_string_pretty(devices)?;
        let temp = self.temp_path();

        // Write the whole list next to the target, then swap it in
        let mut file = fs::File::create(&temp).map_err(|e| self.io_error(e))?;
        file.write_all(json.as_bytes())
            .and_then(|_| file.write_all(b"\n"))
            .and_then(|_| file.sync_all())
            .map_err(|e| self.io_error(e))?;
        drop(file);

        fs::rename(&temp, &self.path).map_err(|e| self.io_error(e))?;
        debug!("Saved {} devices to {}", devices.len(), self.path.display());
        Ok(())
    }
}

/// In-memory device list
#[derive(Debug, Default)]
pub struct MemoryStore {
    devices: Mutex<Vec<Device>>,
    read_only: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_devices(devices: Vec<Device>) -> Self {
        Self {
            devices: Mutex::new(devices),
            read_only: AtomicBool::new(false),
        }
    }

    /// While set, every `save` fails with [`StoreError::Unavailable`]
    pub fn set_read_only(&self, read_only: bool) {
        self.read_only.store(read_only, Ordering::SeqCst);
    }

    pub fn devices(&self) -> Vec<Device> {
        self.devices.lock().clone()
    }
}

impl DeviceStore for MemoryStore {
    fn load(&self) -> StoreResult<Vec<Device>> {
        Ok(self.devices.lock().clone())
    }

    fn save(&self, devices: &[Device]) -> StoreResult<()> {
        if self.read_only.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("store is read-only".to_string()));
        }
        *self.devices.lock() = devices.to_vec();
        Ok(())
    }
}
