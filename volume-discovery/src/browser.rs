//! Controller-side browsing.
//!
//! A browsing session is a stream of [`DiscoveryEvent`]s folded into a
//! [`CandidateSet`] by a single task. The set lives in a watch channel, so
//! readers always see a complete snapshot.
//!
//! Every session carries a generation number. The fold task checks it under
//! the session lock before applying an event, and `stop` bumps it under the
//! same lock, so nothing from a stopped session lands after `stop` returns.

use std::net::IpAddr;
use std::sync::Arc;

use mdns_sd::{ServiceDaemon, ServiceEvent};
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace};
use volume_protocol::SERVICE_TYPE;

use crate::candidate::{CandidateSet, DiscoveredCandidate, DiscoveryEvent};
use crate::{DiscoveryError, Result};

/// Capacity of the channel between the mDNS receiver and the fold task
const EVENT_BUFFER: usize = 64;

/// Browses for volume daemons on the local network.
///
/// Must be used from within a Tokio runtime.
///
/// # Example
///
/// ```no_run
/// use volume_discovery::DiscoveryBrowser;
///
/// # async fn run() -> volume_discovery::Result<()> {
/// let browser = DiscoveryBrowser::new();
/// let mut updates = browser.subscribe();
/// browser.start()?;
///
/// while updates.changed().await.is_ok() {
///     for candidate in updates.borrow().iter() {
///         println!("{} at {}:{}", candidate.name, candidate.host, candidate.port);
///     }
/// }
/// # Ok(())
/// # }
/// ```
pub struct DiscoveryBrowser {
    inner: Arc<Inner>,
}

struct Inner {
    candidates: watch::Sender<CandidateSet>,
    session: Mutex<Session>,
}

#[derive(Default)]
struct Session {
    generation: u64,
    active: Option<ActiveSession>,
}

struct ActiveSession {
    fold: JoinHandle<()>,
    mdns: Option<MdnsSource>,
}

impl ActiveSession {
    fn is_running(&self) -> bool {
        !self.fold.is_finished()
    }

    fn cancel(self) {
        self.fold.abort();
        // MdnsSource stops browsing on drop
    }
}

/// The mDNS responder feeding a session, and the task pumping its events
struct MdnsSource {
    mdns: ServiceDaemon,
    pump: JoinHandle<()>,
}

impl Drop for MdnsSource {
    fn drop(&mut self) {
        self.pump.abort();
        if let Err(e) = self.mdns.stop_browse(SERVICE_TYPE) {
            debug!("Failed to stop mDNS browse: {}", e);
        }
        if let Err(e) = self.mdns.shutdown() {
            debug!("mDNS responder shutdown failed: {}", e);
        }
    }
}

impl DiscoveryBrowser {
    pub fn new() -> Self {
        let (candidates, _) = watch::channel(CandidateSet::new());
        Self {
            inner: Arc::new(Inner {
                candidates,
                session: Mutex::new(Session::default()),
            }),
        }
    }

    /// Start browsing the local network over mDNS.
    ///
    /// Clears the candidate set first.
    pub fn start(&self) -> Result<()> {
        if self.is_browsing() {
            return Err(DiscoveryError::AlreadyBrowsing);
        }

        let mdns = ServiceDaemon::new()?;
        let receiver = mdns.browse(SERVICE_TYPE)?;
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);

        let pump = tokio::spawn(async move {
            while let Ok(event) = receiver.recv_async().await {
                let Some(event) = translate(event) else {
                    continue;
                };
                if tx.send(event).await.is_err() {
                    break;
                }
            }
        });

        info!("Browsing for {}", SERVICE_TYPE);
        self.begin(rx, Some(MdnsSource { mdns, pump }))
    }

    /// Start a session fed by an arbitrary event stream.
    ///
    /// Clears the candidate set first. The session ends when the stream
    /// closes or [`stop`](Self::stop) is called.
    pub fn start_with_events(&self, events: mpsc::Receiver<DiscoveryEvent>) -> Result<()> {
        self.begin(events, None)
    }

    fn begin(
        &self,
        events: mpsc::Receiver<DiscoveryEvent>,
        mdns: Option<MdnsSource>,
    ) -> Result<()> {
        let mut session = self.inner.session.lock();
        if session.active.as_ref().is_some_and(ActiveSession::is_running) {
            return Err(DiscoveryError::AlreadyBrowsing);
        }

        session.generation += 1;
        self.inner.candidates.send_replace(CandidateSet::new());

        let fold = tokio::spawn(fold_events(
            Arc::clone(&self.inner),
            session.generation,
            events,
        ));
        if let Some(stale) = session.active.replace(ActiveSession { fold, mdns }) {
            stale.cancel();
        }
        Ok(())
    }

    /// End the current session.
    ///
    /// Events still in flight for it are discarded. The candidates found so
    /// far stay readable until the next `start`.
    pub fn stop(&self) {
        let stopped = {
            let mut session = self.inner.session.lock();
            session.generation += 1;
            session.active.take()
        };

        if let Some(active) = stopped {
            active.cancel();
            debug!("Discovery session stopped");
        }
    }

    pub fn is_browsing(&self) -> bool {
        self.inner
            .session
            .lock()
            .active
            .as_ref()
            .is_some_and(ActiveSession::is_running)
    }

    /// Snapshot of the current candidates
    pub fn candidates(&self) -> Vec<DiscoveredCandidate> {
        self.inner.candidates.borrow().to_vec()
    }

    /// Watch the candidate set; every update is a complete snapshot
    pub fn subscribe(&self) -> watch::Receiver<CandidateSet> {
        self.inner.candidates.subscribe()
    }
}

impl Default for DiscoveryBrowser {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for DiscoveryBrowser {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn fold_events(
    inner: Arc<Inner>,
    generation: u64,
    mut events: mpsc::Receiver<DiscoveryEvent>,
) {
    while let Some(event) = events.recv().await {
        let session = inner.session.lock();
        if session.generation != generation {
            trace!("Dropping event from stopped session: {:?}", event);
            break;
        }

        debug!("Discovery event: {:?}", event);
        inner.candidates.send_if_modified(|set| set.apply(event));
    }
}

/// Map an mDNS event onto a discovery event, if it is one we care about
pub(crate) fn translate(event: ServiceEvent) -> Option<DiscoveryEvent> {
    match event {
        ServiceEvent::ServiceResolved(info) => {
            let name = match instance_name(info.get_fullname()) {
                Ok(name) => name,
                Err(e) => {
                    debug!("Ignoring resolved service: {}", e);
                    return None;
                }
            };
            let Some(host) = preferred_address(info.get_addresses().iter().copied()) else {
                debug!("Resolved {} without an address", name);
                return None;
            };
            Some(DiscoveryEvent::Found {
                name,
                host: host.to_string(),
                port: info.get_port(),
            })
        }
        ServiceEvent::ServiceRemoved(_, fullname) => instance_name(&fullname)
            .ok()
            .map(|name| DiscoveryEvent::Lost { name }),
        other => {
            trace!("Unhandled mDNS event: {:?}", other);
            None
        }
    }
}

/// Extract the instance label from a full DNS-SD name
///
/// `Living Room._volumecontrol._tcp.local.` becomes `Living Room`.
pub fn instance_name(fullname: &str) -> Result<String> {
    fullname
        .strip_suffix(SERVICE_TYPE)
        .and_then(|rest| rest.strip_suffix('.'))
        .filter(|name| !name.is_empty())
        .map(|name| name.replace("\\.", ".").replace("\\\\", "\\"))
        .ok_or_else(|| DiscoveryError::InvalidName(fullname.to_string()))
}

/// Pick one address to connect to: IPv4 before IPv6, non-loopback first
fn preferred_address(addresses: impl IntoIterator<Item = IpAddr>) -> Option<IpAddr> {
    addresses
        .into_iter()
        .min_by_key(|addr| (addr.is_loopback(), addr.is_ipv6(), *addr))
}
