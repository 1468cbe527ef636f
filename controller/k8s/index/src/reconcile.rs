//! Drives imports toward their declared sources.
//!
//! A single reconciler owns all derived state. Events are drained from a queue and
//! coalesced into one unit of work, so a burst of mutations produces a single pass over
//! the affected imports. Each import's result is published on its own watch; readers
//! take snapshots of it and never block the reconciler.

use crate::{
    lookup::{self, ImportPolicy, Reader},
    metrics::ReconcileMetrics,
    registry::{PeerRegistry, SharedRegistry},
    store::Store,
};
use ahash::{AHashMap as HashMap, AHashSet as HashSet};
use chrono::{DateTime, Utc};
use clusterlink_controller_core::{
    resolve, Binding, HealthSignal, Import, ImportStatus, LoadBalancer, Object, ObjectKey,
    ObjectKind, PeerStatus, PolicySet, Resolution, Revision, SourceLookup,
};
use parking_lot::RwLock;
use std::{collections::BTreeSet, sync::Arc};
use tokio::sync::{mpsc, watch};

/// Inputs to the reconciler.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Event {
    /// An object was created or updated in the store.
    Applied(ObjectKey),
    /// An object was removed from the store.
    Deleted(ObjectKey),
    /// A reachability observation for a peer.
    PeerHealth { name: String, signal: HealthSignal },
    /// Re-resolve every import.
    Resync,
}

/// Changes to be written back to resource status.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StatusUpdate {
    Import {
        namespace: String,
        name: String,
        status: ImportStatus,
        bindings: Vec<Binding>,
    },
    Peer {
        name: String,
        status: PeerStatus,
        observed_at: Option<DateTime<Utc>>,
    },
}

pub struct Reconciler {
    store: Arc<Store>,
    registry: SharedRegistry,
    lookups: lookup::Writer,

    imports: HashMap<ObjectKey, ImportState>,
    by_peer: HashMap<String, HashSet<ObjectKey>>,
    by_export: HashMap<ObjectKey, HashSet<ObjectKey>>,

    /// Revisions at which imports were removed, so that older results cannot revive them.
    tombstones: HashMap<ObjectKey, Revision>,
    /// Every import has been re-resolved at or after this revision.
    floor: Revision,

    status: Option<mpsc::UnboundedSender<StatusUpdate>>,
    metrics: ReconcileMetrics,
}

struct ImportState {
    tx: watch::Sender<Arc<ImportPolicy>>,
    /// The store revision observed by the pass that last published.
    published: Revision,
    peers: Vec<String>,
    exports: Vec<ObjectKey>,
}

/// The result of resolving one import, not yet published.
#[derive(Debug)]
pub struct Pass {
    key: ObjectKey,
    observed: Revision,
    outcome: Outcome,
}

#[derive(Debug)]
enum Outcome {
    Removed,
    Resolved {
        import: Import,
        resolution: Resolution,
    },
}

#[derive(Debug, Default)]
struct Work {
    imports: BTreeSet<ObjectKey>,
    peers: BTreeSet<String>,
    policies: bool,
    resync: bool,
}

/// Answers binder lookups from the registry and the store.
struct Sources<'a> {
    store: &'a Store,
    registry: &'a RwLock<PeerRegistry>,
    now: DateTime<Utc>,
}

// === impl Reconciler ===

impl Reconciler {
    pub fn new(
        store: Arc<Store>,
        registry: SharedRegistry,
        metrics: ReconcileMetrics,
    ) -> (Self, Reader) {
        let (lookups, reader) = lookup::pair();
        let reconciler = Self {
            store,
            registry,
            lookups,
            imports: HashMap::default(),
            by_peer: HashMap::default(),
            by_export: HashMap::default(),
            tombstones: HashMap::default(),
            floor: Revision::default(),
            status: None,
            metrics,
        };
        (reconciler, reader)
    }

    /// Sends status changes to the given channel.
    pub fn with_status(mut self, tx: mpsc::UnboundedSender<StatusUpdate>) -> Self {
        self.status = Some(tx);
        self
    }

    pub async fn run(mut self, mut events: mpsc::UnboundedReceiver<Event>) {
        while let Some(event) = events.recv().await {
            let mut work = Work::default();
            self.observe(event, &mut work);
            while let Ok(event) = events.try_recv() {
                self.observe(event, &mut work);
            }
            self.process(work);
        }
        tracing::debug!("Event stream closed");
    }

    /// Processes all queued events without waiting. Returns false if nothing was queued.
    pub fn drain(&mut self, events: &mut mpsc::UnboundedReceiver<Event>) -> bool {
        let mut work = Work::default();
        let mut observed = false;
        while let Ok(event) = events.try_recv() {
            observed = true;
            self.observe(event, &mut work);
        }
        if observed {
            self.process(work);
        }
        observed
    }

    /// Processes a batch of events as a single pass.
    pub fn handle(&mut self, events: impl IntoIterator<Item = Event>) {
        let mut work = Work::default();
        for event in events {
            self.observe(event, &mut work);
        }
        self.process(work);
    }

    /// Resolves an import against the current store and registry without publishing.
    pub fn resolve(&self, key: &ObjectKey) -> Pass {
        let observed = self.store.revision();
        let outcome = match self.store.get(key) {
            Ok(Object::Import(import)) => {
                let sources = Sources {
                    store: &self.store,
                    registry: &self.registry,
                    now: Utc::now(),
                };
                let resolution = resolve(&import, &sources);
                Outcome::Resolved { import, resolution }
            }
            Ok(_) | Err(_) => Outcome::Removed,
        };
        Pass {
            key: key.clone(),
            observed,
            outcome,
        }
    }

    /// Publishes a pass unless a result from a newer store revision has already been
    /// published for the same import. Returns false when the pass was discarded.
    pub fn apply(&mut self, pass: Pass) -> bool {
        let Pass {
            key,
            observed,
            outcome,
        } = pass;

        let published = self
            .imports
            .get(&key)
            .map(|s| s.published)
            .or_else(|| self.tombstones.get(&key).copied())
            .map_or(self.floor, |rev| rev.max(self.floor));
        if observed < published {
            tracing::debug!(import = %key, %observed, %published, "Discarding superseded result");
            self.metrics.superseded();
            return false;
        }

        match outcome {
            Outcome::Removed => self.remove(key, observed),
            Outcome::Resolved { import, resolution } => {
                self.publish(key, observed, import, resolution)
            }
        }
        true
    }

    fn observe(&mut self, event: Event, work: &mut Work) {
        tracing::trace!(?event);
        match event {
            Event::Applied(key) | Event::Deleted(key) => match key.kind {
                ObjectKind::Peer => {
                    if self.sync_peer(&key.name) {
                        work.affect_peer(&key.name, &self.by_peer);
                    }
                }
                ObjectKind::Export => {
                    if let Some(imports) = self.by_export.get(&key) {
                        work.imports.extend(imports.iter().cloned());
                    }
                }
                ObjectKind::Import => {
                    work.imports.insert(key);
                }
                ObjectKind::AccessPolicy | ObjectKind::PrivilegedAccessPolicy => {
                    work.policies = true;
                }
            },

            Event::PeerHealth { name, signal } => {
                if self.registry.write().record(&name, signal).is_some() {
                    work.affect_peer(&name, &self.by_peer);
                }
            }

            Event::Resync => work.resync = true,
        }
    }

    fn process(&mut self, mut work: Work) {
        if work.resync {
            self.floor = self.store.revision();
            self.tombstones.clear();
            self.sync_all_peers(&mut work);
            work.policies = true;
            work.imports.extend(
                self.store
                    .list(ObjectKind::Import, None)
                    .iter()
                    .map(Object::key),
            );
            work.imports.extend(self.imports.keys().cloned());
        }

        if work.policies {
            self.compile_policies();
        }

        for key in std::mem::take(&mut work.imports) {
            let pass = self.resolve(&key);
            self.apply(pass);
        }

        for name in work.peers {
            self.send_peer_status(&name);
        }

        self.metrics.pass();
        self.metrics
            .set_imports(self.imports.values().map(|s| s.tx.borrow().status));
        self.metrics
            .set_peers(self.registry.read().list().into_iter().map(|p| p.status));
    }

    /// Brings a peer's registration in line with the store. Returns true if its
    /// reachability may have changed.
    fn sync_peer(&mut self, name: &str) -> bool {
        match self.store.get(&ObjectKey::peer(name)) {
            Ok(Object::Peer(peer)) => self.registry.write().register(peer),
            Ok(_) | Err(_) => self.registry.write().unregister(name),
        }
    }

    fn sync_all_peers(&mut self, work: &mut Work) {
        let declared = self
            .store
            .list(ObjectKind::Peer, None)
            .into_iter()
            .filter_map(|o| match o {
                Object::Peer(peer) => Some(peer),
                _ => None,
            })
            .collect::<Vec<_>>();

        let mut registry = self.registry.write();
        let stale = registry
            .names()
            .filter(|n| !declared.iter().any(|p| p.name == *n))
            .map(String::from)
            .collect::<Vec<_>>();
        for name in stale {
            registry.unregister(&name);
            work.affect_peer(&name, &self.by_peer);
        }
        for peer in declared {
            let name = peer.name.clone();
            if registry.register(peer) {
                work.affect_peer(&name, &self.by_peer);
            }
        }
    }

    fn compile_policies(&mut self) {
        let policies = [ObjectKind::PrivilegedAccessPolicy, ObjectKind::AccessPolicy]
            .into_iter()
            .flat_map(|kind| self.store.list_stored(kind, None))
            .filter_map(|stored| {
                let (policy, privileged) = stored.object.as_policy()?;
                Some((policy.clone(), privileged, stored.created))
            });
        let set = PolicySet::compile(policies);
        tracing::debug!(rules = set.len(), "Compiled access policies");
        self.lookups.set_policies(set);
    }

    fn publish(&mut self, key: ObjectKey, observed: Revision, import: Import, resolution: Resolution) {
        self.tombstones.remove(&key);

        let peers = import
            .sources
            .iter()
            .map(|s| s.peer.clone())
            .collect::<Vec<_>>();
        let exports = import
            .sources
            .iter()
            .map(|s| {
                let (ns, name) = s.export_ref(&import.namespace);
                ObjectKey::export(ns, name)
            })
            .collect::<Vec<_>>();

        let Resolution {
            status,
            bindings,
            pending,
        } = resolution;

        let lookups = &mut self.lookups;
        let mut created = false;
        let state = self.imports.entry(key.clone()).or_insert_with(|| {
            created = true;
            let initial = ImportPolicy {
                status: ImportStatus::Pending,
                ..ImportPolicy::removed(key.clone(), import.port)
            };
            let (tx, rx) = watch::channel(Arc::new(initial));
            lookups.insert(key.clone(), rx);
            ImportState {
                tx,
                published: observed,
                peers: vec![],
                exports: vec![],
            }
        });
        state.published = observed;

        let current = state.tx.borrow().clone();
        let balancer = if current.balancer.bindings() == bindings.as_slice()
            && current.balancer.scheme() == import.lb_scheme.effective(bindings.len())
        {
            current.balancer.clone()
        } else {
            tracing::debug!(import = %key, bindings = bindings.len(), scheme = %import.lb_scheme, "Rebuilding load balancer");
            Arc::new(LoadBalancer::new(key.clone(), import.lb_scheme, bindings))
        };
        let policy = ImportPolicy {
            key: key.clone(),
            port: import.port,
            status,
            pending,
            balancer,
        };

        let old_peers = std::mem::replace(&mut state.peers, peers.clone());
        let old_exports = std::mem::replace(&mut state.exports, exports.clone());

        let changed = *current != policy;
        let status_changed = created
            || current.status != policy.status
            || current.bindings() != policy.bindings();
        if changed {
            if current.status != policy.status {
                tracing::info!(import = %key, from = current.status.as_str(), to = policy.status.as_str(), bindings = policy.bindings().len(), "Import status changed");
            }
            state.tx.send_replace(Arc::new(policy.clone()));
        } else {
            tracing::trace!(import = %key, "Unchanged");
        }

        self.unindex(&key, &old_peers, &old_exports);
        self.index(&key, &peers, &exports);

        if status_changed {
            self.send_status(StatusUpdate::Import {
                namespace: import.namespace,
                name: import.name,
                status: policy.status,
                bindings: policy.bindings().to_vec(),
            });
        }
    }

    fn remove(&mut self, key: ObjectKey, observed: Revision) {
        if let Some(state) = self.imports.remove(&key) {
            self.unindex(&key, &state.peers, &state.exports);
            self.lookups.remove(&key);
            let port = state.tx.borrow().port;
            state
                .tx
                .send_replace(Arc::new(ImportPolicy::removed(key.clone(), port)));
            tracing::info!(import = %key, "Import removed");
        }
        self.tombstones.insert(key, observed);
    }

    fn index(&mut self, key: &ObjectKey, peers: &[String], exports: &[ObjectKey]) {
        for peer in peers {
            self.by_peer
                .entry(peer.clone())
                .or_default()
                .insert(key.clone());
        }
        for export in exports {
            self.by_export
                .entry(export.clone())
                .or_default()
                .insert(key.clone());
        }
    }

    fn unindex(&mut self, key: &ObjectKey, peers: &[String], exports: &[ObjectKey]) {
        for peer in peers {
            if let Some(imports) = self.by_peer.get_mut(peer) {
                imports.remove(key);
                if imports.is_empty() {
                    self.by_peer.remove(peer);
                }
            }
        }
        for export in exports {
            if let Some(imports) = self.by_export.get_mut(export) {
                imports.remove(key);
                if imports.is_empty() {
                    self.by_export.remove(export);
                }
            }
        }
    }

    fn send_peer_status(&self, name: &str) {
        let Some(state) = self.registry.read().get(name) else {
            return;
        };
        self.send_status(StatusUpdate::Peer {
            name: name.to_string(),
            status: state.status,
            observed_at: state.health.map(|h| h.observed_at),
        });
    }

    fn send_status(&self, update: StatusUpdate) {
        if let Some(tx) = self.status.as_ref() {
            if tx.send(update).is_err() {
                tracing::debug!("Status controller is not running");
            }
        }
    }
}

// === impl Work ===

impl Work {
    fn affect_peer(&mut self, name: &str, by_peer: &HashMap<String, HashSet<ObjectKey>>) {
        self.peers.insert(name.to_string());
        if let Some(imports) = by_peer.get(name) {
            self.imports.extend(imports.iter().cloned());
        }
    }
}

// === impl Sources ===

impl SourceLookup for Sources<'_> {
    fn peer_status(&self, peer: &str) -> Option<PeerStatus> {
        self.registry.write().probe(peer, self.now).ok()
    }

    fn has_export(&self, namespace: &str, name: &str) -> bool {
        self.store.contains(&ObjectKey::export(namespace, name))
    }
}
