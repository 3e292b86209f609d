//! Finding the device a command refers to.

use thiserror::Error;
use volume_state::DeviceState;

/// Errors that can occur while resolving a device argument
#[derive(Error, Debug, PartialEq, Eq)]
pub enum SelectionError {
    #[error("Device '{query}' not found. Known devices:\n{available}")]
    DeviceNotFound { query: String, available: String },

    #[error("No devices configured. Add one with `volumectl add` or `volumectl discover --add`")]
    NoDevices,

    /// More than one device carries the name
    #[error("'{query}' matches several devices, use an id instead:\n{matches}")]
    Ambiguous { query: String, matches: String },
}

/// Picks the device whose id equals `query`, or else the single device whose
/// name matches it case-insensitively.
pub fn select<'a>(states: &'a [DeviceState], query: &str) -> Result<&'a DeviceState, SelectionError> {
    if states.is_empty() {
        return Err(SelectionError::NoDevices);
    }

    if let Some(state) = states.iter().find(|s| s.device.id.as_str() == query) {
        return Ok(state);
    }

    let query = query.trim();
    let named: Vec<&DeviceState> = states
        .iter()
        .filter(|s| s.device.name.eq_ignore_ascii_case(query))
        .collect();

    match named.as_slice() {
        [state] => Ok(*state),
        [] => Err(SelectionError::DeviceNotFound {
            query: query.to_string(),
            available: listing(states.iter()),
        }),
        several => Err(SelectionError::Ambiguous {
            query: query.to_string(),
            matches: listing(several.iter().copied()),
        }),
    }
}

fn listing<'a>(states: impl Iterator<Item = &'a DeviceState>) -> String {
    states
        .map(|s| {
            format!(
                "  - {} ({}, {}:{})",
                s.device.name, s.device.id, s.device.host, s.device.port
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}
