//! Discovery events and the candidate set they fold into.

use serde::Serialize;

/// A daemon seen during the current discovery session.
///
/// Candidates are never persisted; a controller promotes one to a device to
/// keep it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct DiscoveredCandidate {
    /// Advertised instance name
    pub name: String,
    /// Resolved address, as text
    pub host: String,
    pub port: u16,
}

impl DiscoveredCandidate {
    pub fn new(name: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            name: name.into(),
            host: host.into(),
            port,
        }
    }

    fn same_endpoint(&self, host: &str, port: u16) -> bool {
        self.host == host && self.port == port
    }
}

/// Events emitted while browsing
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryEvent {
    /// A service was resolved to a concrete address
    Found { name: String, host: String, port: u16 },
    /// A service with this instance name went away
    Lost { name: String },
}

impl DiscoveryEvent {
    pub fn found(name: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self::Found {
            name: name.into(),
            host: host.into(),
            port,
        }
    }

    pub fn lost(name: impl Into<String>) -> Self {
        Self::Lost { name: name.into() }
    }
}

/// Ordered set of candidates, keyed by `host:port` on insert and by name on removal
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CandidateSet {
    candidates: Vec<DiscoveredCandidate>,
}

impl CandidateSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one event into the set, returning whether it changed.
    ///
    /// `Found` appends unless an entry already has the same `host:port`.
    /// `Lost` removes every entry carrying that name.
    pub fn apply(&mut self, event: DiscoveryEvent) -> bool {
        match event {
            DiscoveryEvent::Found { name, host, port } => {
                if self.candidates.iter().any(|c| c.same_endpoint(&host, port)) {
                    return false;
                }
                self.candidates
                    .push(DiscoveredCandidate { name, host, port });
                true
            }
            DiscoveryEvent::Lost { name } => {
                let before = self.candidates.len();
                self.candidates.retain(|c| c.name != name);
                self.candidates.len() != before
            }
        }
    }

    pub fn clear(&mut self) {
        self.candidates.clear();
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &DiscoveredCandidate> {
        self.candidates.iter()
    }

    pub fn as_slice(&self) -> &[DiscoveredCandidate] {
        &self.candidates
    }

    pub fn to_vec(&self) -> Vec<DiscoveredCandidate> {
        self.candidates.clone()
    }
}

impl FromIterator<DiscoveryEvent> for CandidateSet {
    fn from_iter<I: IntoIterator<Item = DiscoveryEvent>>(events: I) -> Self {
        let mut set = Self::new();
        for event in events {
            set.apply(event);
        }
        set
    }
}
