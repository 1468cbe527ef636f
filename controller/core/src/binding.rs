use crate::{
    import::{Import, ImportSource},
    object::ObjectKey,
    peer::PeerStatus,
};
use ahash::AHashSet as HashSet;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A resolved, live `(Import, Peer, Export)` triple.
///
/// Bindings are derived: they are only ever produced by [`resolve`].
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Binding {
    pub import: ObjectKey,
    /// Position of the source in the import's declared sources.
    pub source: usize,
    pub peer: String,
    pub export: ObjectKey,
    /// Reachability of the peer when the binding was resolved.
    pub peer_status: PeerStatus,
}

/// The lifecycle state of an import.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ImportStatus {
    #[default]
    Pending,
    Bound(BoundKind),
    Removed,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BoundKind {
    /// Every declared source is bound.
    Full,
    /// At least one, but not every, declared source is bound.
    Degraded,
}

/// Why a declared source did not produce a binding.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PendingReason {
    PeerNotFound,
    PeerNotReachable(PeerStatus),
    ExportNotFound,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingSource {
    pub source: ImportSource,
    pub reason: PendingReason,
}

/// The outcome of resolving an import's sources.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub status: ImportStatus,
    /// Live bindings, in declared source order.
    pub bindings: Vec<Binding>,
    pub pending: Vec<PendingSource>,
}

/// Answers the questions the binder asks about an import's sources.
pub trait SourceLookup {
    /// Returns `None` when the peer is not registered.
    fn peer_status(&self, peer: &str) -> Option<PeerStatus>;

    fn has_export(&self, namespace: &str, name: &str) -> bool;
}

/// Resolves an import's declared sources into bindings.
///
/// A source binds when its peer is registered and reachable and its export exists.
/// Unresolvable sources are reported as pending without failing the import; the import
/// is only `Pending` when no source binds. Resolution is a pure function of its inputs,
/// so re-running it with unchanged inputs yields an identical result.
pub fn resolve(import: &Import, lookup: &impl SourceLookup) -> Resolution {
    let key = ObjectKey::import(&import.namespace, &import.name);
    let mut seen = HashSet::new();
    let mut bindings = Vec::new();
    let mut pending = Vec::new();
    let mut declared = 0;

    for (idx, source) in import.sources.iter().enumerate() {
        let (export_ns, export_name) = source.export_ref(&import.namespace);
        if !seen.insert((source.peer.as_str(), export_ns, export_name)) {
            tracing::trace!(import = %key, peer = %source.peer, "Duplicate source");
            continue;
        }
        declared += 1;

        let reason = match lookup.peer_status(&source.peer) {
            None => Some(PendingReason::PeerNotFound),
            Some(status) if !status.is_reachable() => Some(PendingReason::PeerNotReachable(status)),
            Some(_) if !lookup.has_export(export_ns, export_name) => {
                Some(PendingReason::ExportNotFound)
            }
            Some(_) => None,
        };

        match reason {
            Some(reason) => {
                tracing::debug!(import = %key, peer = %source.peer, ?reason, "Source pending");
                pending.push(PendingSource {
                    source: source.clone(),
                    reason,
                });
            }
            None => bindings.push(Binding {
                import: key.clone(),
                source: idx,
                peer: source.peer.clone(),
                export: ObjectKey::export(export_ns, export_name),
                peer_status: PeerStatus::Reachable,
            }),
        }
    }

    let status = if bindings.is_empty() {
        ImportStatus::Pending
    } else if bindings.len() == declared {
        ImportStatus::Bound(BoundKind::Full)
    } else {
        ImportStatus::Bound(BoundKind::Degraded)
    };

    Resolution {
        status,
        bindings,
        pending,
    }
}

// === impl ImportStatus ===

impl ImportStatus {
    pub fn is_bound(&self) -> bool {
        matches!(self, Self::Bound(_))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::Bound(BoundKind::Full) => "Bound",
            Self::Bound(BoundKind::Degraded) => "Degraded",
            Self::Removed => "Removed",
        }
    }
}

impl fmt::Display for ImportStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// === impl Binding ===

impl fmt::Display for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ns = self.export.namespace().unwrap_or_default();
        write!(f, "{}/{}@{}", ns, self.export.name, self.peer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ahash::AHashMap as HashMap;
    use maplit::hashset;
    use pretty_assertions::assert_eq;

    #[derive(Default)]
    struct Lookup {
        peers: HashMap<&'static str, PeerStatus>,
        exports: std::collections::HashSet<(&'static str, &'static str)>,
    }

    impl SourceLookup for Lookup {
        fn peer_status(&self, peer: &str) -> Option<PeerStatus> {
            self.peers.get(peer).copied()
        }

        fn has_export(&self, namespace: &str, name: &str) -> bool {
            self.exports.iter().any(|(ns, n)| *ns == namespace && *n == name)
        }
    }

    fn mk_import(peers: &[&str]) -> Import {
        Import::new(
            "ns-0",
            "reviews",
            9080,
            peers.iter().map(|p| ImportSource::new(p, "reviews")),
        )
    }

    #[test]
    fn partial_binding_is_degraded() {
        let lookup = Lookup {
            peers: [
                ("p1", PeerStatus::Unreachable),
                ("p2", PeerStatus::Reachable),
                ("p3", PeerStatus::Unknown),
            ]
            .into_iter()
            .collect(),
            exports: hashset! { ("ns-0", "reviews") },
        };
        let res = resolve(&mk_import(&["p1", "p2", "p3"]), &lookup);
        assert_eq!(res.status, ImportStatus::Bound(BoundKind::Degraded));
        assert_eq!(res.bindings.len(), 1);
        assert_eq!(res.bindings[0].peer, "p2");
        assert_eq!(res.bindings[0].source, 1);
        assert_eq!(res.pending.len(), 2);
        assert_eq!(
            res.pending[0].reason,
            PendingReason::PeerNotReachable(PeerStatus::Unreachable)
        );
    }

    #[test]
    fn missing_exports_leave_import_pending() {
        let lookup = Lookup {
            peers: [("p1", PeerStatus::Reachable), ("p2", PeerStatus::Reachable)]
                .into_iter()
                .collect(),
            exports: hashset! {},
        };
        let res = resolve(&mk_import(&["p1", "p2"]), &lookup);
        assert_eq!(res.status, ImportStatus::Pending);
        assert!(res.bindings.is_empty());
        assert!(res
            .pending
            .iter()
            .all(|p| p.reason == PendingReason::ExportNotFound));
    }

    #[test]
    fn unknown_peer_is_pending() {
        let lookup = Lookup {
            exports: hashset! { ("ns-0", "reviews") },
            ..Default::default()
        };
        let res = resolve(&mk_import(&["nope"]), &lookup);
        assert_eq!(res.status, ImportStatus::Pending);
        assert_eq!(res.pending[0].reason, PendingReason::PeerNotFound);
    }

    #[test]
    fn resolution_is_idempotent_and_ordered() {
        let lookup = Lookup {
            peers: [
                ("p1", PeerStatus::Reachable),
                ("p2", PeerStatus::Reachable),
                ("p3", PeerStatus::Reachable),
            ]
            .into_iter()
            .collect(),
            exports: hashset! { ("ns-0", "reviews") },
        };
        let import = mk_import(&["p3", "p1", "p2"]);
        let first = resolve(&import, &lookup);
        let second = resolve(&import, &lookup);
        assert_eq!(first, second);
        assert_eq!(first.status, ImportStatus::Bound(BoundKind::Full));
        let peers = first.bindings.iter().map(|b| b.peer.as_str()).collect::<Vec<_>>();
        assert_eq!(peers, vec!["p3", "p1", "p2"]);
    }

    #[test]
    fn duplicate_sources_bind_once() {
        let lookup = Lookup {
            peers: [("p1", PeerStatus::Reachable)].into_iter().collect(),
            exports: hashset! { ("ns-0", "reviews") },
        };
        let mut import = mk_import(&["p1"]);
        import
            .sources
            .push(ImportSource::new("p1", "reviews").in_namespace("ns-0"));
        let res = resolve(&import, &lookup);
        assert_eq!(res.bindings.len(), 1);
        assert_eq!(res.status, ImportStatus::Bound(BoundKind::Full));
    }

    #[test]
    fn export_namespace_overrides_import_namespace() {
        let lookup = Lookup {
            peers: [("p1", PeerStatus::Reachable)].into_iter().collect(),
            exports: hashset! { ("ns-remote", "reviews") },
        };
        let import = Import::new(
            "ns-0",
            "reviews",
            9080,
            [ImportSource::new("p1", "reviews").in_namespace("ns-remote")],
        );
        let res = resolve(&import, &lookup);
        assert_eq!(res.bindings[0].export, ObjectKey::export("ns-remote", "reviews"));
    }
}
