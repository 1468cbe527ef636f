use crate::{metrics::IndexMetrics, reconcile::Event, store::Store};
use ahash::{AHashMap as HashMap, AHashSet as HashSet};
use chrono::{DateTime, Utc};
use clusterlink_controller_core::{Object, ObjectKey, ObjectKind, Result, Revision};
use clusterlink_controller_k8s_api::ObjectMeta;
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::mpsc;

pub type SharedIndex = Arc<RwLock<Index>>;

/// Receives watch events for all resource kinds, writes them to the object store and
/// notifies the reconciler.
///
/// The index only translates resources; it holds no derived state of its own.
#[derive(Debug)]
pub struct Index {
    store: Arc<Store>,
    events: mpsc::UnboundedSender<Event>,
    metrics: IndexMetrics,

    /// The revision at which this index last wrote each key.
    written: HashMap<ObjectKey, Revision>,
}

// === impl Index ===

impl Index {
    pub fn new(
        store: Arc<Store>,
        events: mpsc::UnboundedSender<Event>,
        metrics: IndexMetrics,
    ) -> Self {
        Self {
            store,
            events,
            metrics,
            written: HashMap::default(),
        }
    }

    pub fn shared(self) -> SharedIndex {
        Arc::new(RwLock::new(self))
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    /// Writes a converted resource to the store.
    ///
    /// A resource that cannot be converted no longer describes a usable object, so any
    /// previously stored version is removed.
    pub(crate) fn put(&mut self, key: ObjectKey, object: Result<Object>) {
        let object = match object {
            Ok(object) => object,
            Err(error) => {
                tracing::warn!(%key, %error, "Ignoring invalid resource");
                self.metrics.invalid(key.kind);
                self.remove(key);
                return;
            }
        };
        debug_assert_eq!(object.key(), key);

        self.metrics.applied(key.kind);
        let before = self.store.revision();
        let rev = match self.written.get(&key) {
            Some(base) => self.store.update(object, *base),
            None => self.store.put(object),
        };
        self.written.insert(key.clone(), rev);
        if rev <= before {
            tracing::trace!(%key, "Unchanged");
            return;
        }
        self.notify(Event::Applied(key));
    }

    pub(crate) fn remove(&mut self, key: ObjectKey) {
        self.written.remove(&key);
        match self.store.delete(&key) {
            Ok(_) => {
                self.metrics.deleted(key.kind);
                self.notify(Event::Deleted(key));
            }
            Err(error) if error.is_not_found() => {
                tracing::trace!(%key, "Already absent");
            }
            Err(error) => tracing::warn!(%key, %error, "Failed to delete"),
        }
    }

    /// Removes stored objects of a kind that a watch's initial listing no longer
    /// contains.
    ///
    /// Objects restored from a snapshot have no delete event of their own, so this is the
    /// only way they leave the store once the cluster has dropped them.
    pub(crate) fn retain(&mut self, kind: ObjectKind, present: &HashSet<ObjectKey>) {
        let stale = self
            .store
            .list_stored(kind, None)
            .into_iter()
            .map(|stored| stored.object.key())
            .filter(|key| !present.contains(key))
            .collect::<Vec<_>>();
        if !stale.is_empty() {
            self.metrics.reset(kind);
        }
        for key in stale {
            tracing::info!(%key, "Removing object absent from the cluster");
            self.remove(key);
        }
    }

    fn notify(&self, event: Event) {
        if self.events.send(event).is_err() {
            tracing::debug!("Reconciler is not running");
        }
    }
}

pub(crate) fn name(meta: &ObjectMeta) -> String {
    meta.name.clone().unwrap_or_default()
}

/// Reads a resource's creation timestamp.
///
/// The timestamp is read through its serialized RFC 3339 form so that it does not depend
/// on the date-time backend of the Kubernetes API types.
pub(crate) fn creation_time(meta: &ObjectMeta) -> Option<DateTime<Utc>> {
    let ts = meta.creation_timestamp.as_ref()?;
    let value = serde_json::to_value(ts).ok()?;
    DateTime::parse_from_rfc3339(value.as_str()?)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}
