//! The object store holds the canonical copy of every declarative object.
//!
//! Writes are last-writer-wins on whole objects. Keys are partitioned over a fixed set of
//! shards, each behind its own lock, so that writes to the same key serialize while writes
//! to unrelated keys do not contend. Every change bumps a store-wide [`Revision`].

use ahash::AHashMap as HashMap;
use anyhow::Context;
use clusterlink_controller_core::{Error, Object, ObjectKey, ObjectKind, Result, Revision};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::{
    hash::{BuildHasher, Hash, Hasher},
    io,
    path::Path,
    sync::atomic::{AtomicU64, Ordering},
};

const SHARDS: usize = 16;

#[derive(Debug)]
pub struct Store {
    revision: AtomicU64,
    shards: Box<[RwLock<HashMap<ObjectKey, Stored>>]>,
    hasher: ahash::RandomState,
}

/// An object along with the revisions at which it was created and last written.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stored {
    pub object: Object,
    pub created: Revision,
    pub updated: Revision,
}

/// The persisted form of a store.
#[derive(Debug, Default, Serialize, Deserialize)]
struct Snapshot {
    revision: Revision,
    objects: Vec<Stored>,
}

// === impl Store ===

impl Default for Store {
    fn default() -> Self {
        Self {
            revision: AtomicU64::new(0),
            shards: (0..SHARDS).map(|_| RwLock::default()).collect(),
            hasher: ahash::RandomState::with_seeds(0, 0, 0, 0),
        }
    }
}

impl Store {
    /// The revision of the most recent change.
    pub fn revision(&self) -> Revision {
        Revision(self.revision.load(Ordering::Acquire))
    }

    /// Creates or replaces an object.
    ///
    /// Writing an object identical to the stored one is a no-op and returns the stored
    /// revision.
    pub fn put(&self, object: Object) -> Revision {
        self.write(object, None)
    }

    /// Replaces an object that the caller last observed at `base`.
    ///
    /// If another writer got there first, this write still wins; the conflict is logged.
    pub fn update(&self, object: Object, base: Revision) -> Revision {
        self.write(object, Some(base))
    }

    pub fn get(&self, key: &ObjectKey) -> Result<Object> {
        self.get_stored(key).map(|s| s.object)
    }

    pub fn get_stored(&self, key: &ObjectKey) -> Result<Stored> {
        self.shard(key)
            .read()
            .get(key)
            .cloned()
            .ok_or_else(|| Error::NotFound(key.clone()))
    }

    pub fn contains(&self, key: &ObjectKey) -> bool {
        self.shard(key).read().contains_key(key)
    }

    /// Removes an object. Deletion is never blocked by objects that reference it.
    pub fn delete(&self, key: &ObjectKey) -> Result<Revision> {
        let mut shard = self.shard(key).write();
        if shard.remove(key).is_none() {
            return Err(Error::NotFound(key.clone()));
        }
        let rev = self.bump();
        tracing::debug!(%key, %rev, "Deleted");
        Ok(rev)
    }

    /// Lists objects of a kind, optionally within a namespace, ordered by key.
    pub fn list(&self, kind: ObjectKind, namespace: Option<&str>) -> Vec<Object> {
        self.list_stored(kind, namespace)
            .into_iter()
            .map(|s| s.object)
            .collect()
    }

    pub fn list_stored(&self, kind: ObjectKind, namespace: Option<&str>) -> Vec<Stored> {
        let mut items = self
            .shards
            .iter()
            .flat_map(|shard| {
                shard
                    .read()
                    .iter()
                    .filter(|(k, _)| {
                        k.kind == kind && namespace.map_or(true, |ns| k.namespace() == Some(ns))
                    })
                    .map(|(k, s)| (k.clone(), s.clone()))
                    .collect::<Vec<_>>()
            })
            .collect::<Vec<_>>();
        items.sort_by(|(a, _), (b, _)| a.cmp(b));
        items.into_iter().map(|(_, s)| s).collect()
    }

    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.read().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Loads a store from a snapshot file.
    ///
    /// A missing file yields an empty store. A file that cannot be read or parsed is
    /// reported as [`Error::Corrupt`]; callers must not continue with partial state.
    pub fn restore(path: &Path) -> Result<Self> {
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(error) if error.kind() == io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "No persisted state");
                return Ok(Self::default());
            }
            Err(error) => {
                return Err(Error::Corrupt(format!("{}: {error}", path.display())));
            }
        };
        let snapshot = serde_json::from_slice::<Snapshot>(&bytes)
            .map_err(|error| Error::Corrupt(format!("{}: {error}", path.display())))?;

        let store = Self::default();
        let mut max = snapshot.revision;
        for stored in snapshot.objects {
            max = max.max(stored.updated);
            let key = stored.object.key();
            if store.shard(&key).write().insert(key.clone(), stored).is_some() {
                return Err(Error::Corrupt(format!(
                    "{}: duplicate object {key}",
                    path.display()
                )));
            }
        }
        store.revision.store(max.0, Ordering::Release);
        tracing::info!(
            path = %path.display(),
            objects = store.len(),
            revision = %max,
            "Restored state"
        );
        Ok(store)
    }

    /// Writes a snapshot of the store, replacing the file atomically.
    pub fn persist(&self, path: &Path) -> anyhow::Result<Revision> {
        let snapshot = self.snapshot();
        let revision = snapshot.revision;
        let bytes = serde_json::to_vec(&snapshot)?;
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, bytes).with_context(|| format!("writing {}", tmp.display()))?;
        std::fs::rename(&tmp, path).with_context(|| format!("renaming {}", tmp.display()))?;
        tracing::debug!(path = %path.display(), %revision, "Persisted state");
        Ok(revision)
    }

    fn snapshot(&self) -> Snapshot {
        // Hold every shard's read lock so the snapshot is consistent with its revision.
        let shards = self.shards.iter().map(|s| s.read()).collect::<Vec<_>>();
        let revision = self.revision();
        let mut objects = shards
            .iter()
            .flat_map(|s| s.values().cloned())
            .collect::<Vec<_>>();
        objects.sort_by_key(|s| s.object.key());
        Snapshot { revision, objects }
    }

    fn write(&self, object: Object, base: Option<Revision>) -> Revision {
        let key = object.key();
        let mut shard = self.shard(&key).write();
        match shard.get_mut(&key) {
            None => {
                let rev = self.bump();
                tracing::debug!(%key, %rev, "Created");
                shard.insert(
                    key,
                    Stored {
                        object,
                        created: rev,
                        updated: rev,
                    },
                );
                rev
            }
            Some(stored) => {
                if let Some(base) = base {
                    if base != stored.updated {
                        tracing::warn!(
                            %key,
                            %base,
                            current = %stored.updated,
                            "Conflicting write; last writer wins"
                        );
                    }
                }
                if stored.object == object {
                    tracing::trace!(%key, "Unchanged");
                    return stored.updated;
                }
                let rev = self.bump();
                tracing::debug!(%key, %rev, "Updated");
                stored.object = object;
                stored.updated = rev;
                rev
            }
        }
    }

    /// Must be called while holding the shard lock for the key being changed so that
    /// revisions are ordered consistently with per-key writes.
    fn bump(&self) -> Revision {
        Revision(self.revision.fetch_add(1, Ordering::AcqRel) + 1)
    }

    fn shard(&self, key: &ObjectKey) -> &RwLock<HashMap<ObjectKey, Stored>> {
        let mut hasher = self.hasher.build_hasher();
        key.hash(&mut hasher);
        &self.shards[hasher.finish() as usize % SHARDS]
    }
}
