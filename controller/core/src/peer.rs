use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A remote gateway that imports may be bound to.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Peer {
    pub name: String,
    pub gateways: Vec<Gateway>,
}

/// A reachable endpoint of a peer's gateway.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Gateway {
    pub host: String,
    pub port: u16,
}

/// Last known reachability of a peer.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PeerStatus {
    Reachable,
    Unreachable,
    #[default]
    Unknown,
}

/// An observation of a peer's reachability.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthSignal {
    pub reachable: bool,
    pub observed_at: DateTime<Utc>,
}

/// Produces reachability observations for peers.
///
/// Implementations may perform network I/O; callers bound each probe with a timeout and
/// must never invoke this while holding index locks.
#[async_trait::async_trait]
pub trait ProbePeer {
    async fn probe(&self, peer: &Peer) -> bool;
}

// === impl Peer ===

impl Peer {
    pub fn new(name: impl ToString, gateways: impl IntoIterator<Item = (impl ToString, u16)>) -> Self {
        Self {
            name: name.to_string(),
            gateways: gateways
                .into_iter()
                .map(|(host, port)| Gateway {
                    host: host.to_string(),
                    port,
                })
                .collect(),
        }
    }
}

// === impl Gateway ===

impl fmt::Display for Gateway {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

// === impl PeerStatus ===

impl PeerStatus {
    pub fn is_reachable(&self) -> bool {
        matches!(self, Self::Reachable)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Reachable => "Reachable",
            Self::Unreachable => "Unreachable",
            Self::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for PeerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<bool> for PeerStatus {
    fn from(reachable: bool) -> Self {
        if reachable {
            Self::Reachable
        } else {
            Self::Unreachable
        }
    }
}

// === impl HealthSignal ===

impl HealthSignal {
    pub fn new(reachable: bool, observed_at: DateTime<Utc>) -> Self {
        Self {
            reachable,
            observed_at,
        }
    }

    pub fn now(reachable: bool) -> Self {
        Self::new(reachable, Utc::now())
    }

    pub fn status(&self) -> PeerStatus {
        self.reachable.into()
    }
}
