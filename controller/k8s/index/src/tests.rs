
use crate::{
    metrics::{IndexMetrics, ReconcileMetrics},
    *,
};
use chrono::{DateTime, Utc};
use clusterlink_controller_core::{
    AccessPolicy, Action, AttributeSelector, Export, HealthSignal, Import, ImportSource,
    ImportStatus, LbScheme, Object, ObjectKey, Peer,
};
use std::{sync::Arc, time::Duration};
use tokio::sync::mpsc;
use tracing::Level;

struct TestConfig {
    index: SharedIndex,
    store: Arc<Store>,
    registry: SharedRegistry,
    reconciler: Reconciler,
    reader: Reader,
    events: mpsc::UnboundedReceiver<Event>,
    status: mpsc::UnboundedReceiver<StatusUpdate>,
    _probes: mpsc::UnboundedReceiver<String>,
    clock: DateTime<Utc>,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self::with_store(Store::default())
    }
}

impl TestConfig {
    /// Starts from an existing store, as when state is restored on startup.
    fn with_store(store: Store) -> Self {
        tracing_subscriber::fmt()
            .with_max_level(Level::TRACE)
            .try_init()
            .ok();

        let store = Arc::new(store);
        let (registry, probes) = PeerRegistry::shared(Duration::from_secs(30));
        let (events_tx, events) = mpsc::unbounded_channel();
        let (status_tx, status) = mpsc::unbounded_channel();
        let index = Index::new(store.clone(), events_tx, IndexMetrics::default()).shared();
        let (reconciler, reader) =
            Reconciler::new(store.clone(), registry.clone(), ReconcileMetrics::default());
        Self {
            index,
            store,
            registry,
            reconciler: reconciler.with_status(status_tx),
            reader,
            events,
            status,
            _probes: probes,
            clock: Utc::now(),
        }
    }

    /// Writes an object and reconciles.
    fn put(&mut self, object: impl Into<Object>) {
        let object = object.into();
        let key = object.key();
        self.store.put(object);
        self.reconciler.handle([Event::Applied(key)]);
    }

    /// Deletes an object and reconciles.
    fn delete(&mut self, key: ObjectKey) {
        self.store.delete(&key).expect("object must exist");
        self.reconciler.handle([Event::Deleted(key)]);
    }

    /// Records a reachability observation and reconciles.
    fn health(&mut self, peer: &str, reachable: bool) {
        self.clock += chrono::Duration::seconds(1);
        self.reconciler.handle([Event::PeerHealth {
            name: peer.to_string(),
            signal: HealthSignal::new(reachable, self.clock),
        }]);
    }

    /// Processes events emitted by the index.
    fn reconcile(&mut self) -> bool {
        self.reconciler.drain(&mut self.events)
    }

    fn status(&self, name: &str) -> ImportStatus {
        self.reader
            .import_status("ns-0", name)
            .expect("import must be published")
    }

    fn bound_peers(&self, name: &str) -> Vec<String> {
        self.reader
            .import("ns-0", name)
            .expect("import must be published")
            .bindings()
            .iter()
            .map(|b| b.peer.clone())
            .collect()
    }

    fn selected_peer(&self, name: &str) -> String {
        self.reader
            .select("ns-0", name)
            .expect("import must have a live binding")
            .peer
    }

    fn status_updates(&mut self) -> Vec<StatusUpdate> {
        let mut updates = vec![];
        while let Ok(update) = self.status.try_recv() {
            updates.push(update);
        }
        updates
    }
}

fn mk_peer(name: &str) -> Peer {
    let host = format!("{name}.gateways.example.com");
    Peer::new(name, [(host, 443)])
}

/// Creates a reachable peer.
fn mk_reachable(test: &mut TestConfig, name: &str) {
    test.put(mk_peer(name));
    test.health(name, true);
}

fn mk_export(name: &str) -> Export {
    Export::new("ns-0", name, name, 9080)
}

fn mk_import(name: &str, peers: &[&str], scheme: LbScheme) -> Import {
    Import::new(
        "ns-0",
        name,
        9080,
        peers.iter().map(|peer| ImportSource::new(*peer, name)),
    )
    .with_scheme(scheme)
}

fn mk_policy(name: &str, action: Action, from: AttributeSelector, to: AttributeSelector) -> AccessPolicy {
    AccessPolicy {
        name: name.to_string(),
        namespace: "ns-0".to_string(),
        action,
        from: vec![from],
        to: vec![to],
        created: None,
    }
}
