//! Subcommand handlers.

use std::time::Duration;

use anyhow::{bail, Result};
use tracing::info;
use volume_client::VolumeClient;
use volume_state::{Device, DeviceId, SyncEngine};

use crate::output;
use crate::selection::select;
use crate::Command;

type Engine = SyncEngine<VolumeClient>;

pub async fn run(engine: &Engine, command: Command, json: bool) -> Result<()> {
    match command {
        Command::List => {
            engine.load_stored().await?;
            let devices: Vec<Device> = engine.snapshot().into_iter().map(|s| s.device).collect();
            if devices.is_empty() && !json {
                println!("No devices configured");
            }
            output::print(json, &devices, output::device_line)
        }

        Command::Status { device: None } => {
            engine.load_devices().await?;
            output::print(json, &engine.snapshot(), output::status_line)
        }

        Command::Status {
            device: Some(query),
        } => {
            let id = target(engine, &query).await?;
            engine.refresh_device(&id).await?;
            show(engine, &id, json)
        }

        Command::Add { name, host, port } => {
            let id = engine.add_device(name, host, port).await?;
            show(engine, &id, json)
        }

        Command::Edit {
            device,
            name,
            host,
            port,
        } => {
            let id = target(engine, &device).await?;
            let current = engine
                .device_state(&id)
                .map(|s| s.device)
                .ok_or_else(|| anyhow::anyhow!("Device '{}' disappeared", device))?;

            engine
                .edit_device(
                    &id,
                    name.unwrap_or(current.name),
                    host.unwrap_or(current.host),
                    port.unwrap_or(current.port),
                )
                .await?;
            show(engine, &id, json)
        }

        Command::Remove { device } => {
            let id = target(engine, &device).await?;
            engine.delete_device(&id).await?;
            if !json {
                println!("Removed {}", device);
            }
            Ok(())
        }

        Command::Clear => {
            engine.remove_all().await?;
            if !json {
                println!("Removed all devices");
            }
            Ok(())
        }

        Command::Set { device, volume } => {
            let id = target(engine, &device).await?;
            engine.write_volume(&id, volume).await?;
            show(engine, &id, json)
        }

        Command::Mute { device } => {
            let id = target(engine, &device).await?;
            engine.set_muted(&id, true).await?;
            show(engine, &id, json)
        }

        Command::Unmute { device } => {
            let id = target(engine, &device).await?;
            engine.set_muted(&id, false).await?;
            show(engine, &id, json)
        }

        Command::Toggle { device } => {
            let id = target(engine, &device).await?;
            engine.toggle_mute(&id).await?;
            show(engine, &id, json)
        }

        Command::MuteAll => set_muted_all(engine, true, json).await,

        Command::UnmuteAll => set_muted_all(engine, false, json).await,

        Command::Discover { timeout, add } => discover(engine, timeout, add, json).await,
    }
}

/// Loads the stored list and resolves `query` against it
async fn target(engine: &Engine, query: &str) -> Result<DeviceId> {
    engine.load_stored().await?;
    let states = engine.snapshot();
    Ok(select(&states, query)?.device.id.clone())
}

fn show(engine: &Engine, id: &DeviceId, json: bool) -> Result<()> {
    match engine.device_state(id) {
        Some(state) => output::print(json, &[state], output::status_line),
        None => Ok(()),
    }
}

async fn set_muted_all(engine: &Engine, muted: bool, json: bool) -> Result<()> {
    engine.load_stored().await?;
    let failures = if muted {
        engine.mute_all().await
    } else {
        engine.unmute_all().await
    };

    output::print(json, &engine.snapshot(), output::status_line)?;

    if !failures.is_empty() {
        let names: Vec<String> = failures
            .iter()
            .map(|(id, error)| {
                let name = engine
                    .device_state(id)
                    .map(|s| s.device.name)
                    .unwrap_or_else(|| id.to_string());
                format!("{}: {}", name, error)
            })
            .collect();
        bail!("{} device(s) failed:\n{}", failures.len(), names.join("\n"));
    }
    Ok(())
}

async fn discover(engine: &Engine, timeout: u64, add: bool, json: bool) -> Result<()> {
    if !json {
        println!("Browsing for {}s...", timeout);
    }
    let candidates = volume_discovery::browse_for(Duration::from_secs(timeout)).await?;
    info!("Discovery found {} daemons", candidates.len());

    if !add {
        if candidates.is_empty() && !json {
            println!("No daemons found");
        }
        return output::print(json, &candidates, output::candidate_line);
    }

    engine.load_stored().await?;
    let known = engine.snapshot();
    let mut added = Vec::new();
    for candidate in &candidates {
        let already_known = known
            .iter()
            .any(|s| s.device.host == candidate.host && s.device.port == candidate.port);
        if already_known {
            continue;
        }
        let id = engine.add_candidate(candidate).await?;
        if let Some(state) = engine.device_state(&id) {
            added.push(state);
        }
    }

    if added.is_empty() && !json {
        println!("No new daemons found");
    }
    output::print(json, &added, output::status_line)
}
