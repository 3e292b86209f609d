use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use volume_daemon::{default_instance_name, DaemonConfig, SoftwareBackend, VolumeServer};
use volume_discovery::Advertiser;

/// Volume control daemon
///
/// Serves this host's volume and mute state on a fixed TCP port and
/// advertises it on the local network.
#[derive(Parser, Debug)]
#[command(name = "volumectld")]
#[command(about = "Expose this host's volume over the local network")]
#[command(version)]
struct Args {
    /// Address to listen on
    #[arg(long, env = "VOLUMECTL_BIND", default_value = "0.0.0.0")]
    bind: IpAddr,

    /// Port to listen on
    #[arg(short, long, env = "VOLUMECTL_PORT", default_value_t = volume_protocol::DEFAULT_PORT)]
    port: u16,

    /// Advertised instance name (defaults to the host name)
    #[arg(short, long, env = "VOLUMECTL_NAME")]
    name: Option<String>,

    /// Do not advertise over DNS-SD
    #[arg(long, env = "VOLUMECTL_NO_ADVERTISE")]
    no_advertise: bool,

    /// Stop serving the volume-only /volume resource
    #[arg(long, env = "VOLUMECTL_NO_LEGACY")]
    no_legacy: bool,

    /// Per-connection deadline in seconds
    #[arg(long, env = "VOLUMECTL_REQUEST_TIMEOUT", default_value = "10")]
    request_timeout: u64,

    /// Starting volume of the software mixer
    #[arg(long, env = "VOLUMECTL_INITIAL_VOLUME", default_value = "50")]
    initial_volume: u8,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, env = "VOLUMECTL_LOG_LEVEL", default_value = "info")]
    log_level: String,
}

impl From<Args> for DaemonConfig {
    fn from(args: Args) -> Self {
        Self {
            bind_address: args.bind,
            port: args.port,
            instance_name: args.name.unwrap_or_else(default_instance_name),
            advertise: !args.no_advertise,
            legacy_volume_endpoint: !args.no_legacy,
            request_timeout: Duration::from_secs(args.request_timeout),
            initial_volume: args.initial_volume,
            ..Default::default()
        }
    }
}

fn init_tracing(log_level: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(&args.log_level);

    let config = DaemonConfig::from(args);
    config.validate().context("Invalid daemon configuration")?;

    let backend = Arc::new(SoftwareBackend::with_volume(config.initial_volume));
    let server = VolumeServer::start(&config, backend)
        .await
        .context("Failed to start volume server")?;

    // Clients that know the address keep working without an advertisement
    let advertiser = if config.advertise {
        match Advertiser::register(&config.instance_name, server.port()) {
            Ok(advertiser) => Some(advertiser),
            Err(e) => {
                warn!("Failed to advertise '{}': {}", config.instance_name, e);
                None
            }
        }
    } else {
        None
    };

    info!(
        "volumectld '{}' serving on {}",
        config.instance_name,
        server.local_addr()
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    info!("Shutting down");

    if let Some(advertiser) = advertiser {
        advertiser.unregister();
    }
    server.shutdown().await;

    Ok(())
}
