//! Model types for volume-state

mod device;
mod device_id;
mod device_state;

pub use device::Device;
pub use device_id::DeviceId;
pub use device_state::{DeviceState, Phase};
