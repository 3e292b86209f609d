//! Volume daemon discovery library
//!
//! Daemons announce themselves with DNS-SD under
//! [`SERVICE_TYPE`](volume_protocol::SERVICE_TYPE); controllers browse for
//! that type and collect the resolved `host:port` pairs as candidates.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::time::Duration;
//!
//! # async fn run() -> volume_discovery::Result<()> {
//! // Browse for three seconds and take whatever showed up
//! let candidates = volume_discovery::browse_for(Duration::from_secs(3)).await?;
//! for candidate in candidates {
//!     println!("Found {} at {}:{}", candidate.name, candidate.host, candidate.port);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Long-lived sessions
//!
//! For live updates use [`DiscoveryBrowser`] directly and watch its candidate
//! set with [`DiscoveryBrowser::subscribe`].

mod advertiser;
mod browser;
mod candidate;
mod error;

pub use advertiser::Advertiser;
pub use browser::{instance_name, DiscoveryBrowser};
pub use candidate::{CandidateSet, DiscoveredCandidate, DiscoveryEvent};
pub use error::{DiscoveryError, Result};

use std::time::Duration;

/// Browse with the default 3-second window
pub async fn browse() -> Result<Vec<DiscoveredCandidate>> {
    browse_for(Duration::from_secs(3)).await
}

/// Run one browsing session for `timeout` and return the final snapshot
pub async fn browse_for(timeout: Duration) -> Result<Vec<DiscoveredCandidate>> {
    let browser = DiscoveryBrowser::new();
    browser.start()?;
    tokio::time::sleep(timeout).await;
    browser.stop();
    Ok(browser.candidates())
}
