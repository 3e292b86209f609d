//! Daemon-side DNS-SD registration.

use std::collections::HashMap;

use mdns_sd::{ServiceDaemon, ServiceInfo};
use tracing::{debug, info, warn};
use volume_protocol::SERVICE_TYPE;

use crate::{DiscoveryError, Result};

/// Host label used when the instance name has no usable characters
const FALLBACK_HOST_LABEL: &str = "volumectl";

/// A registered DNS-SD service instance.
///
/// The registration is withdrawn by [`unregister`](Advertiser::unregister) or
/// when the advertiser is dropped. Withdrawal failures are logged only.
///
/// # Example
///
/// ```no_run
/// use volume_discovery::Advertiser;
///
/// let advertiser = Advertiser::register("Living Room", 8888)?;
/// println!("Advertised as {}", advertiser.fullname());
/// advertiser.unregister();
/// # Ok::<(), volume_discovery::DiscoveryError>(())
/// ```
pub struct Advertiser {
    mdns: ServiceDaemon,
    fullname: String,
    registered: bool,
}

impl Advertiser {
    /// Announce `instance_name` on `port` under the volume control service type
    pub fn register(instance_name: &str, port: u16) -> Result<Self> {
        let instance_name = instance_name.trim();
        if instance_name.is_empty() {
            return Err(DiscoveryError::InvalidName(
                "instance name must not be empty".to_string(),
            ));
        }

        let host_name = format!("{}.local.", host_label(instance_name));
        let info = ServiceInfo::new(
            SERVICE_TYPE,
            instance_name,
            &host_name,
            "",
            port,
            HashMap::<String, String>::new(),
        )?
        .enable_addr_auto();
        let fullname = info.get_fullname().to_string();

        let mdns = ServiceDaemon::new()?;
        mdns.register(info)?;
        info!("Advertising {} on port {}", fullname, port);

        Ok(Self {
            mdns,
            fullname,
            registered: true,
        })
    }

    /// Full DNS-SD name, e.g. `Living Room._volumecontrol._tcp.local.`
    pub fn fullname(&self) -> &str {
        &self.fullname
    }

    /// Withdraw the registration and stop the responder
    pub fn unregister(mut self) {
        self.withdraw();
    }

    fn withdraw(&mut self) {
        if !self.registered {
            return;
        }
        self.registered = false;

        match self.mdns.unregister(&self.fullname) {
            Ok(_) => info!("Withdrew {}", self.fullname),
            Err(e) => warn!("Failed to unregister {}: {}", self.fullname, e),
        }
        if let Err(e) = self.mdns.shutdown() {
            debug!("mDNS responder shutdown failed: {}", e);
        }
    }
}

impl Drop for Advertiser {
    fn drop(&mut self) {
        self.withdraw();
    }
}

/// Turn an instance name into a single DNS host label
pub(crate) fn host_label(instance_name: &str) -> String {
    let mut label = String::with_capacity(instance_name.len());
    for c in instance_name.chars() {
        if c.is_ascii_alphanumeric() {
            label.push(c.to_ascii_lowercase());
        } else if !label.ends_with('-') {
            label.push('-');
        }
    }

    let label = label.trim_matches('-');
    if label.is_empty() {
        FALLBACK_HOST_LABEL.to_string()
    } else {
        label.chars().take(63).collect()
    }
}
