use ahash::AHashMap as HashMap;
use clusterlink_controller_core::{
    Attributes, AuthorizeConnection, Binding, Decision, Error, ImportStatus, LoadBalancer,
    ObjectKey, PendingSource, PolicySet, Result, SelectBinding,
};
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::watch;

/// The published state of an import.
///
/// Policies are immutable once published; the reconciler replaces the whole value when
/// anything changes.
#[derive(Clone, Debug)]
pub struct ImportPolicy {
    pub key: ObjectKey,
    pub port: u16,
    pub status: ImportStatus,
    /// Declared sources that did not bind in the last pass.
    pub pending: Vec<PendingSource>,
    pub balancer: Arc<LoadBalancer>,
}

pub type ImportRx = watch::Receiver<Arc<ImportPolicy>>;

type ByKey = Arc<RwLock<HashMap<ObjectKey, ImportRx>>>;

#[derive(Debug)]
pub(crate) struct Writer {
    imports: ByKey,
    policies: watch::Sender<Arc<PolicySet>>,
}

/// Supports lookups from the dataplane.
///
/// Lookups clone the current snapshot out of the index; no lock is held once a lookup
/// returns.
#[derive(Clone, Debug)]
pub struct Reader {
    imports: ByKey,
    policies: watch::Receiver<Arc<PolicySet>>,
}

pub(crate) fn pair() -> (Writer, Reader) {
    let imports = ByKey::default();
    let (policies_tx, policies_rx) = watch::channel(Arc::new(PolicySet::default()));
    let w = Writer {
        imports: imports.clone(),
        policies: policies_tx,
    };
    let r = Reader {
        imports,
        policies: policies_rx,
    };
    (w, r)
}

// === impl ImportPolicy ===

impl ImportPolicy {
    pub(crate) fn removed(key: ObjectKey, port: u16) -> Self {
        Self {
            balancer: Arc::new(LoadBalancer::new(key.clone(), Default::default(), vec![])),
            key,
            port,
            status: ImportStatus::Removed,
            pending: vec![],
        }
    }

    pub fn bindings(&self) -> &[Binding] {
        self.balancer.bindings()
    }

    pub fn select(&self) -> Result<Binding> {
        self.balancer.select().cloned()
    }
}

/// Two policies are equal when they would route identically; the balancer's cursor is
/// not compared.
impl PartialEq for ImportPolicy {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
            && self.port == other.port
            && self.status == other.status
            && self.pending == other.pending
            && self.balancer.scheme() == other.balancer.scheme()
            && self.balancer.bindings() == other.balancer.bindings()
    }
}

// === impl Writer ===

impl Writer {
    pub(crate) fn insert(&mut self, key: ObjectKey, rx: ImportRx) {
        self.imports.write().insert(key, rx);
    }

    pub(crate) fn remove(&mut self, key: &ObjectKey) {
        self.imports.write().remove(key);
    }

    pub(crate) fn set_policies(&mut self, policies: PolicySet) {
        self.policies.send_replace(Arc::new(policies));
    }
}

// === impl Reader ===

impl Reader {
    #[inline]
    fn lookup(&self, key: &ObjectKey) -> Option<ImportRx> {
        self.imports.read().get(key).cloned()
    }

    /// Returns the current policy for an import.
    pub fn import(&self, namespace: &str, name: &str) -> Option<Arc<ImportPolicy>> {
        self.lookup(&ObjectKey::import(namespace, name))
            .map(|rx| rx.borrow().clone())
    }

    pub fn import_status(&self, namespace: &str, name: &str) -> Option<ImportStatus> {
        self.import(namespace, name).map(|p| p.status)
    }

    /// Returns a watch that is notified whenever the import's published policy changes.
    pub fn watch_import(&self, namespace: &str, name: &str) -> Option<ImportRx> {
        self.lookup(&ObjectKey::import(namespace, name))
    }

    /// Picks a binding for a new connection to an import.
    pub fn select(&self, namespace: &str, name: &str) -> Result<Binding> {
        SelectBinding::select(self, &ObjectKey::import(namespace, name))
    }

    pub fn policies(&self) -> Arc<PolicySet> {
        self.policies.borrow().clone()
    }

    pub fn authorize(&self, src: &Attributes, dst: &Attributes) -> Decision {
        AuthorizeConnection::authorize(self, src, dst)
    }
}

impl SelectBinding for Reader {
    fn select(&self, import: &ObjectKey) -> Result<Binding> {
        let policy = self
            .lookup(import)
            .map(|rx| rx.borrow().clone())
            .ok_or_else(|| Error::NotFound(import.clone()))?;
        policy.select()
    }
}

impl AuthorizeConnection for Reader {
    fn authorize(&self, src: &Attributes, dst: &Attributes) -> Decision {
        let decision = self.policies().evaluate(src, dst);
        if !decision.verdict.is_allowed() {
            match &decision.policy {
                Some(policy) => tracing::debug!(?src, ?dst, %policy, "PolicyDenied"),
                None => tracing::debug!(?src, ?dst, "PolicyDenied by default"),
            }
        }
        decision
    }
}
