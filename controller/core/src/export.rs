use serde::{Deserialize, Serialize};

/// Declares that a local service is available to peers.
///
/// `host` and `port` are immutable once created; an update replaces the whole object.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Export {
    pub name: String,
    pub namespace: String,
    /// Target address inside the local cluster.
    pub host: String,
    pub port: u16,
}

impl Export {
    pub fn new(namespace: impl ToString, name: impl ToString, host: impl ToString, port: u16) -> Self {
        Self {
            name: name.to_string(),
            namespace: namespace.to_string(),
            host: host.to_string(),
            port,
        }
    }
}
