//! volumectl: manage and control volume daemons from the command line.

mod commands;
mod output;
mod selection;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use volume_client::{ClientConfig, VolumeClient};
use volume_protocol::DEFAULT_PORT;
use volume_state::logging::{self, LoggingMode};
use volume_state::{JsonFileStore, SyncConfig, SyncEngine};

/// Volume daemon controller
///
/// Keeps a list of known daemons and reads or changes their volume and mute
/// state over the local network.
#[derive(Parser, Debug)]
#[command(name = "volumectl")]
#[command(about = "Control volume daemons on the local network")]
#[command(version)]
struct Args {
    /// Device list file (defaults to volumectl/devices.json in the config directory)
    #[arg(long, global = true, env = "VOLUMECTL_STORE")]
    store: Option<PathBuf>,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Connect and read timeout per request, in milliseconds
    #[arg(long, global = true, env = "VOLUMECTL_TIMEOUT_MS", default_value = "5000")]
    timeout_ms: u64,

    /// Diagnostics on stderr: silent, development or debug
    #[arg(long, global = true, env = "VOLUMECTL_LOG_MODE", default_value = "silent")]
    log_mode: LoggingMode,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Command {
    /// List stored devices without contacting them
    List,

    /// Fetch and show the state of every device, or of one
    Status {
        /// Device id or name
        device: Option<String>,
    },

    /// Add a device by address
    Add {
        name: String,
        host: String,
        #[arg(short, long, default_value_t = DEFAULT_PORT)]
        port: u16,
    },

    /// Rename a device or change its address
    Edit {
        /// Device id or name
        device: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        host: Option<String>,
        #[arg(long)]
        port: Option<u16>,
    },

    /// Forget a device
    Remove {
        /// Device id or name
        device: String,
    },

    /// Forget every device
    Clear,

    /// Set a device's volume
    Set {
        /// Device id or name
        device: String,
        /// 0 to 100
        #[arg(value_parser = clap::value_parser!(u8).range(0..=100))]
        volume: u8,
    },

    /// Mute a device
    Mute { device: String },

    /// Unmute a device
    Unmute { device: String },

    /// Flip a device's mute state
    Toggle { device: String },

    /// Mute every device
    MuteAll,

    /// Unmute every device
    UnmuteAll,

    /// Browse the local network for daemons
    Discover {
        /// Seconds to browse for
        #[arg(short, long, default_value = "3")]
        timeout: u64,

        /// Add every daemon found that is not yet known
        #[arg(long)]
        add: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    logging::init_logging(args.log_mode).context("Failed to initialize logging")?;

    let store = match &args.store {
        Some(path) => JsonFileStore::new(path),
        None => JsonFileStore::open_default().context("Cannot locate the device list")?,
    };

    let timeout = Duration::from_millis(args.timeout_ms);
    let client = VolumeClient::new(ClientConfig {
        connect_timeout: timeout,
        read_timeout: timeout,
    })
    .context("Failed to create HTTP client")?;

    let engine = SyncEngine::new(client, Arc::new(store), SyncConfig::default())?;
    commands::run(&engine, args.command, args.json).await
}
