//! Tracks known peers and their cached reachability.
//!
//! The registry never performs network I/O. Lookups read the cached health signal; when
//! that signal is older than the staleness window a re-probe is requested from the prober
//! over a channel, and its result arrives later as an ordinary reconcile event.

use ahash::AHashMap as HashMap;
use chrono::{DateTime, Utc};
use clusterlink_controller_core::{
    Error, Gateway, HealthSignal, ObjectKey, Peer, PeerStatus, Result,
};
use parking_lot::RwLock;
use std::{sync::Arc, time::Duration};
use tokio::sync::mpsc;

pub type SharedRegistry = Arc<RwLock<PeerRegistry>>;

#[derive(Debug)]
pub struct PeerRegistry {
    peers: HashMap<String, Entry>,
    staleness: chrono::Duration,
    probes: mpsc::UnboundedSender<String>,
}

#[derive(Debug)]
struct Entry {
    gateways: Vec<Gateway>,
    health: Option<HealthSignal>,
    /// Set while a re-probe has been requested and no newer signal has arrived.
    probe_requested: bool,
}

/// A change in a peer's reachability.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Transition {
    pub from: PeerStatus,
    pub to: PeerStatus,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PeerState {
    pub peer: Peer,
    pub status: PeerStatus,
    pub health: Option<HealthSignal>,
}

// === impl PeerRegistry ===

impl PeerRegistry {
    /// Creates a registry along with the receiver on which it requests probes.
    pub fn new(staleness: Duration) -> (Self, mpsc::UnboundedReceiver<String>) {
        let (probes, rx) = mpsc::unbounded_channel();
        let staleness = chrono::Duration::from_std(staleness).unwrap_or(chrono::Duration::MAX);
        let registry = Self {
            peers: HashMap::default(),
            staleness,
            probes,
        };
        (registry, rx)
    }

    pub fn shared(staleness: Duration) -> (SharedRegistry, mpsc::UnboundedReceiver<String>) {
        let (registry, rx) = Self::new(staleness);
        (Arc::new(RwLock::new(registry)), rx)
    }

    /// Adds or updates a peer.
    ///
    /// A peer whose gateways change loses its cached health and is re-probed. Returns true
    /// if the peer's reachability may have changed.
    pub fn register(&mut self, peer: Peer) -> bool {
        let Peer { name, gateways } = peer;
        match self.peers.get_mut(&name) {
            Some(entry) if entry.gateways == gateways => {
                tracing::trace!(peer = %name, "Unchanged");
                false
            }
            Some(entry) => {
                tracing::debug!(peer = %name, "Gateways changed");
                let was = entry.status();
                entry.gateways = gateways;
                entry.health = None;
                entry.probe_requested = false;
                self.request_probe(&name);
                was != PeerStatus::Unknown
            }
            None => {
                tracing::debug!(peer = %name, "Registered");
                self.peers.insert(
                    name.clone(),
                    Entry {
                        gateways,
                        health: None,
                        probe_requested: false,
                    },
                );
                self.request_probe(&name);
                true
            }
        }
    }

    /// Removes a peer. Returns true if it was registered.
    pub fn unregister(&mut self, name: &str) -> bool {
        let removed = self.peers.remove(name).is_some();
        if removed {
            tracing::debug!(peer = %name, "Unregistered");
        }
        removed
    }

    /// Returns the cached status of a peer, requesting a re-probe when the cached signal
    /// is missing or older than the staleness window. Never blocks.
    pub fn probe(&mut self, name: &str, now: DateTime<Utc>) -> Result<PeerStatus> {
        let staleness = self.staleness;
        let entry = self
            .peers
            .get_mut(name)
            .ok_or_else(|| Error::NotFound(ObjectKey::peer(name)))?;
        let stale = entry
            .health
            .map_or(true, |h| now.signed_duration_since(h.observed_at) > staleness);
        let status = entry.status();
        if stale && !entry.probe_requested {
            self.request_probe(name);
        }
        Ok(status)
    }

    /// Returns the cached status of a peer without scheduling any work.
    pub fn status(&self, name: &str) -> Option<PeerStatus> {
        self.peers.get(name).map(Entry::status)
    }

    /// Records a health observation.
    ///
    /// Observations older than the cached one are ignored. Returns the transition when the
    /// peer's status changed.
    pub fn record(&mut self, name: &str, signal: HealthSignal) -> Option<Transition> {
        let Some(entry) = self.peers.get_mut(name) else {
            tracing::debug!(peer = %name, "Ignoring health of unknown peer");
            return None;
        };
        if let Some(current) = entry.health {
            if signal.observed_at < current.observed_at {
                tracing::trace!(peer = %name, "Ignoring out-of-order health signal");
                return None;
            }
        }
        let from = entry.status();
        entry.health = Some(signal);
        entry.probe_requested = false;
        let to = entry.status();
        if from == to {
            return None;
        }
        tracing::info!(peer = %name, %from, %to, "Reachability changed");
        Some(Transition { from, to })
    }

    pub fn get(&self, name: &str) -> Option<PeerState> {
        self.peers.get(name).map(|e| e.state(name))
    }

    /// Lists peers ordered by name.
    pub fn list(&self) -> Vec<PeerState> {
        let mut peers = self
            .peers
            .iter()
            .map(|(name, e)| e.state(name))
            .collect::<Vec<_>>();
        peers.sort_by(|a, b| a.peer.name.cmp(&b.peer.name));
        peers
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.peers.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    fn request_probe(&mut self, name: &str) {
        if let Some(entry) = self.peers.get_mut(name) {
            entry.probe_requested = true;
        }
        if self.probes.send(name.to_string()).is_err() {
            tracing::debug!(peer = %name, "Prober is not running");
        }
    }
}

// === impl Entry ===

impl Entry {
    fn status(&self) -> PeerStatus {
        self.health.map_or(PeerStatus::Unknown, |h| h.status())
    }

    fn state(&self, name: &str) -> PeerState {
        PeerState {
            peer: Peer {
                name: name.to_string(),
                gateways: self.gateways.clone(),
            },
            status: self.status(),
            health: self.health,
        }
    }
}
