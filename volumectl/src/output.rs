//! Rendering command results for the terminal or as JSON.

use serde::Serialize;
use volume_discovery::DiscoveredCandidate;
use volume_state::{Device, DeviceState, Phase};

/// Formats device state as one line per device
pub fn status_line(state: &DeviceState) -> String {
    let volume = match state.volume {
        Some(volume) => format!("{:>3}%", volume),
        None => "  --".to_string(),
    };
    let muted = if state.muted { "muted" } else { "" };

    let mut line = format!(
        "{:<20} {} {:<5} {:<7}",
        state.device.name,
        volume,
        muted,
        state.phase()
    );
    if let (Phase::Errored, Some(error)) = (state.phase(), &state.error) {
        line.push_str(&format!(" {}", error));
    }
    line.trim_end().to_string()
}

pub fn device_line(device: &Device) -> String {
    format!(
        "{:<36} {:<20} {}:{}",
        device.id, device.name, device.host, device.port
    )
}

pub fn candidate_line(candidate: &DiscoveredCandidate) -> String {
    format!("{:<30} {}:{}", candidate.name, candidate.host, candidate.port)
}

/// Prints `value` as pretty JSON or each rendered line as text
pub fn print<T: Serialize>(
    json: bool,
    value: &[T],
    render: impl Fn(&T) -> String,
) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(value)?);
    } else {
        for item in value {
            println!("{}", render(item));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use volume_state::DeviceId;

    fn state() -> DeviceState {
        DeviceState::new(Device::with_id(DeviceId::from("a1"), "Den", "10.0.0.5", 8888))
    }

    #[test]
    fn test_unknown_status_line() {
        assert_eq!(status_line(&state()), format!("{:<20}   -- {:<5} unknown", "Den", ""));
    }

    #[test]
    fn test_ready_status_line() {
        let mut s = state();
        s.volume = Some(7);
        s.muted = true;
        assert_eq!(status_line(&s), format!("{:<20}   7% muted ready", "Den"));
    }

    #[test]
    fn test_error_is_appended() {
        let mut s = state();
        s.volume = Some(40);
        s.error = Some("Request timed out".to_string());
        assert!(status_line(&s).ends_with("error   Request timed out"));
    }

    #[test]
    fn test_device_line() {
        let device = Device::with_id(DeviceId::from("a1"), "Den", "10.0.0.5", 8888);
        assert!(device_line(&device).ends_with("Den                  10.0.0.5:8888"));
    }
}
