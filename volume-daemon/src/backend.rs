//! Volume backends.
//!
//! The daemon talks to the host through [`VolumeBackend`], which already works
//! on the normalized 0-100 scale. Host mixers usually expose a coarser step
//! range (`0..=max_steps`), so [`MixerBackend`] adapts any [`Mixer`] onto that
//! scale and serializes concurrent read-modify-write access.

use parking_lot::Mutex;
use thiserror::Error;
use volume_protocol::{StatusPayload, MAX_VOLUME};

/// Errors reported by a volume backend
#[derive(Debug, Error)]
pub enum BackendError {
    /// The host mixer could not be reached or refused the operation
    #[error("Volume backend unavailable: {0}")]
    Unavailable(String),

    /// The mixer reported a value outside its own range
    #[error("Volume backend returned an invalid value: {0}")]
    InvalidValue(String),
}

/// Host-local volume capability on the normalized 0-100 scale.
///
/// Implementations must be safe to call from many connections at once.
pub trait VolumeBackend: Send + Sync + 'static {
    /// Current volume and mute state
    fn get(&self) -> Result<StatusPayload, BackendError>;

    /// Apply whichever fields are present and return the resulting state.
    ///
    /// `volume` has already been clamped onto `0..=100`.
    fn set(&self, volume: Option<u8>, muted: Option<bool>) -> Result<StatusPayload, BackendError>;
}

/// Raw host mixer working in device steps
pub trait Mixer: Send + Sync + 'static {
    /// Highest step the mixer accepts
    fn max_steps(&self) -> u32;

    fn steps(&self) -> Result<u32, BackendError>;

    fn set_steps(&self, steps: u32) -> Result<(), BackendError>;

    fn is_muted(&self) -> Result<bool, BackendError>;

    fn set_muted(&self, muted: bool) -> Result<(), BackendError>;
}

/// Conversion between device steps and the 0-100 scale
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepScale {
    max_steps: u32,
}

impl StepScale {
    pub fn new(max_steps: u32) -> Self {
        Self { max_steps }
    }

    pub fn max_steps(&self) -> u32 {
        self.max_steps
    }

    /// Device steps to percent, rounded to nearest
    pub fn to_percent(&self, steps: u32) -> u8 {
        if self.max_steps == 0 {
            return 0;
        }
        let steps = u64::from(steps.min(self.max_steps));
        let max = u64::from(self.max_steps);
        let percent = (steps * u64::from(MAX_VOLUME) + max / 2) / max;
        // At most MAX_VOLUME by construction
        percent as u8
    }

    /// Percent to device steps, rounded to nearest
    pub fn to_steps(&self, percent: u8) -> u32 {
        let percent = u64::from(percent.min(MAX_VOLUME));
        let max = u64::from(self.max_steps);
        let steps = (percent * max + u64::from(MAX_VOLUME) / 2) / u64::from(MAX_VOLUME);
        // At most max_steps by construction
        steps as u32
    }
}

/// Last volume written through the backend, in both scales
#[derive(Debug, Clone, Copy)]
struct Requested {
    percent: u8,
    steps: u32,
}

/// [`VolumeBackend`] over a step-based [`Mixer`].
///
/// While the mixer still sits on the step that a request mapped to, the
/// requested percent is reported back instead of the re-derived one, so a
/// coarse mixer does not make `set(30)` read back as `33`.
pub struct MixerBackend<M> {
    mixer: M,
    scale: StepScale,
    requested: Mutex<Option<Requested>>,
}

impl<M: Mixer> MixerBackend<M> {
    pub fn new(mixer: M) -> Self {
        let scale = StepScale::new(mixer.max_steps());
        Self {
            mixer,
            scale,
            requested: Mutex::new(None),
        }
    }

    pub fn mixer(&self) -> &M {
        &self.mixer
    }

    fn read(&self, requested: Option<Requested>) -> Result<StatusPayload, BackendError> {
        let steps = self.mixer.steps()?;
        if steps > self.scale.max_steps() {
            return Err(BackendError::InvalidValue(format!(
                "step {} above maximum {}",
                steps,
                self.scale.max_steps()
            )));
        }
        let volume = match requested {
            Some(r) if r.steps == steps => r.percent,
            _ => self.scale.to_percent(steps),
        };
        Ok(StatusPayload {
            volume,
            muted: self.mixer.is_muted()?,
        })
    }
}

impl<M: Mixer> VolumeBackend for MixerBackend<M> {
    fn get(&self) -> Result<StatusPayload, BackendError> {
        let requested = self.requested.lock();
        self.read(*requested)
    }

    fn set(&self, volume: Option<u8>, muted: Option<bool>) -> Result<StatusPayload, BackendError> {
        let mut requested = self.requested.lock();

        if let Some(percent) = volume {
            let steps = self.scale.to_steps(percent);
            self.mixer.set_steps(steps)?;
            *requested = Some(Requested { percent, steps });
        }
        if let Some(muted) = muted {
            self.mixer.set_muted(muted)?;
        }

        self.read(*requested)
    }
}

/// In-memory mixer.
///
/// Used when the daemon runs without an OS mixer, and by tests.
#[derive(Debug)]
pub struct SoftwareMixer {
    max_steps: u32,
    state: Mutex<(u32, bool)>,
}

impl SoftwareMixer {
    pub fn new(max_steps: u32, initial_steps: u32) -> Self {
        Self {
            max_steps,
            state: Mutex::new((initial_steps.min(max_steps), false)),
        }
    }

    /// Mixer with a 0-100 step range, starting at `initial` percent
    pub fn percent(initial: u8) -> Self {
        Self::new(u32::from(MAX_VOLUME), u32::from(initial.min(MAX_VOLUME)))
    }

    /// Change the volume behind the daemon's back, as another app on the host would
    pub fn nudge(&self, steps: u32) {
        self.state.lock().0 = steps.min(self.max_steps);
    }
}

impl Mixer for SoftwareMixer {
    fn max_steps(&self) -> u32 {
        self.max_steps
    }

    fn steps(&self) -> Result<u32, BackendError> {
        Ok(self.state.lock().0)
    }

    fn set_steps(&self, steps: u32) -> Result<(), BackendError> {
        self.state.lock().0 = steps.min(self.max_steps);
        Ok(())
    }

    fn is_muted(&self) -> Result<bool, BackendError> {
        Ok(self.state.lock().1)
    }

    fn set_muted(&self, muted: bool) -> Result<(), BackendError> {
        self.state.lock().1 = muted;
        Ok(())
    }
}

/// Backend used by the daemon binary and tests: a software mixer on the 0-100 scale
pub type SoftwareBackend = MixerBackend<SoftwareMixer>;

impl SoftwareBackend {
    pub fn with_volume(initial: u8) -> Self {
        MixerBackend::new(SoftwareMixer::percent(initial))
    }
}
