//! Configuration for the sync engine

use std::time::Duration;

use crate::error::{Result, StateError};

/// Tuning for [`SyncEngine`](crate::SyncEngine)
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Quiet period after the last volume intent before the write is sent
    /// Default: 500 milliseconds
    pub debounce: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(500),
        }
    }
}

impl SyncConfig {
    /// Longest accepted debounce window
    pub const MAX_DEBOUNCE: Duration = Duration::from_secs(10);

    pub fn new() -> Self {
        Self::default()
    }

    /// Writes go out as soon as they are requested
    pub fn immediate() -> Self {
        Self {
            debounce: Duration::ZERO,
        }
    }

    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.debounce > Self::MAX_DEBOUNCE {
            return Err(StateError::Config(format!(
                "debounce must be at most {:?}",
                Self::MAX_DEBOUNCE
            )));
        }
        Ok(())
    }
}
