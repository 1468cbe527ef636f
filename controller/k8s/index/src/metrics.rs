use clusterlink_controller_core::{BoundKind, ImportStatus, ObjectKind, PeerStatus};
use prometheus_client::{
    encoding::EncodeLabelSet,
    metrics::{counter::Counter, family::Family, gauge::Gauge},
    registry::Registry,
};

/// Counts watch events applied to the object store.
#[derive(Clone, Debug, Default)]
pub struct IndexMetrics {
    applies: Family<KindLabels, Counter>,
    deletes: Family<KindLabels, Counter>,
    invalid: Family<KindLabels, Counter>,
    resets: Family<KindLabels, Counter>,
}

#[derive(Clone, Debug, Default)]
pub struct ReconcileMetrics {
    passes: Counter,
    superseded: Counter,
    imports: Family<PhaseLabels, Gauge>,
    peers: Family<ReachabilityLabels, Gauge>,
}

#[derive(Clone, Debug, Default)]
pub struct ProbeMetrics {
    probes: Family<ProbeLabels, Counter>,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct KindLabels {
    kind: &'static str,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct PhaseLabels {
    phase: &'static str,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct ReachabilityLabels {
    reachability: &'static str,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct ProbeLabels {
    result: &'static str,
}

const PHASES: [ImportStatus; 3] = [
    ImportStatus::Pending,
    ImportStatus::Bound(BoundKind::Full),
    ImportStatus::Bound(BoundKind::Degraded),
];

const REACHABILITY: [PeerStatus; 3] = [
    PeerStatus::Reachable,
    PeerStatus::Unreachable,
    PeerStatus::Unknown,
];

// === impl IndexMetrics ===

impl IndexMetrics {
    pub fn register(prom: &mut Registry) -> Self {
        let metrics = Self::default();
        prom.register(
            "applies",
            "Count of resources applied to the object store",
            metrics.applies.clone(),
        );
        prom.register(
            "deletes",
            "Count of resources deleted from the object store",
            metrics.deletes.clone(),
        );
        prom.register(
            "invalid",
            "Count of resources ignored because they could not be converted",
            metrics.invalid.clone(),
        );
        prom.register(
            "resets",
            "Count of watch restarts that removed objects no longer in the cluster",
            metrics.resets.clone(),
        );
        metrics
    }

    pub(crate) fn applied(&self, kind: ObjectKind) {
        self.applies.get_or_create(&KindLabels::from(kind)).inc();
    }

    pub(crate) fn deleted(&self, kind: ObjectKind) {
        self.deletes.get_or_create(&KindLabels::from(kind)).inc();
    }

    pub(crate) fn invalid(&self, kind: ObjectKind) {
        self.invalid.get_or_create(&KindLabels::from(kind)).inc();
    }

    pub(crate) fn reset(&self, kind: ObjectKind) {
        self.resets.get_or_create(&KindLabels::from(kind)).inc();
    }
}

// === impl ReconcileMetrics ===

impl ReconcileMetrics {
    pub fn register(prom: &mut Registry) -> Self {
        let metrics = Self::default();
        prom.register(
            "passes",
            "Count of reconciliation passes",
            metrics.passes.clone(),
        );
        prom.register(
            "superseded",
            "Count of import results discarded because a newer result was already published",
            metrics.superseded.clone(),
        );
        prom.register(
            "imports",
            "Number of imports by phase",
            metrics.imports.clone(),
        );
        prom.register(
            "peers",
            "Number of registered peers by reachability",
            metrics.peers.clone(),
        );
        metrics
    }

    pub(crate) fn pass(&self) {
        self.passes.inc();
    }

    pub(crate) fn superseded(&self) {
        self.superseded.inc();
    }

    pub(crate) fn set_imports(&self, statuses: impl IntoIterator<Item = ImportStatus>) {
        let statuses = statuses.into_iter().collect::<Vec<_>>();
        for phase in PHASES {
            let n = statuses.iter().filter(|s| **s == phase).count();
            self.imports
                .get_or_create(&PhaseLabels {
                    phase: phase.as_str(),
                })
                .set(n as i64);
        }
    }

    pub(crate) fn set_peers(&self, statuses: impl IntoIterator<Item = PeerStatus>) {
        let statuses = statuses.into_iter().collect::<Vec<_>>();
        for reachability in REACHABILITY {
            let n = statuses.iter().filter(|s| **s == reachability).count();
            self.peers
                .get_or_create(&ReachabilityLabels {
                    reachability: reachability.as_str(),
                })
                .set(n as i64);
        }
    }

    #[cfg(test)]
    pub(crate) fn superseded_count(&self) -> u64 {
        self.superseded.get()
    }
}

// === impl ProbeMetrics ===

impl ProbeMetrics {
    pub fn register(prom: &mut Registry) -> Self {
        let metrics = Self::default();
        prom.register(
            "probes",
            "Count of peer reachability probes by result",
            metrics.probes.clone(),
        );
        metrics
    }

    pub(crate) fn observe(&self, reachable: bool) {
        let result = if reachable { "reachable" } else { "unreachable" };
        self.probes.get_or_create(&ProbeLabels { result }).inc();
    }
}

impl From<ObjectKind> for KindLabels {
    fn from(kind: ObjectKind) -> Self {
        Self {
            kind: kind.as_str(),
        }
    }
}
