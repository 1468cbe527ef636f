use crate::{access::AccessPolicy, export::Export, import::Import, peer::Peer};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The closed set of declarative object kinds.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ObjectKind {
    Peer,
    Export,
    Import,
    AccessPolicy,
    PrivilegedAccessPolicy,
}

/// Identifies an object in the store. Peers are not namespaced.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectKey {
    pub kind: ObjectKind,
    pub namespace: Option<String>,
    pub name: String,
}

/// A declarative object, as held by the object store.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Object {
    Peer(Peer),
    Export(Export),
    Import(Import),
    AccessPolicy(AccessPolicy),
    PrivilegedAccessPolicy(AccessPolicy),
}

/// A store-wide, monotonically increasing mutation counter.
#[derive(
    Copy, Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct Revision(pub u64);

// === impl ObjectKind ===

impl ObjectKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Peer => "peer",
            Self::Export => "export",
            Self::Import => "import",
            Self::AccessPolicy => "accesspolicy",
            Self::PrivilegedAccessPolicy => "privilegedaccesspolicy",
        }
    }

    pub fn is_namespaced(&self) -> bool {
        !matches!(self, Self::Peer)
    }

    pub fn is_policy(&self) -> bool {
        matches!(self, Self::AccessPolicy | Self::PrivilegedAccessPolicy)
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// === impl ObjectKey ===

impl ObjectKey {
    pub fn peer(name: impl ToString) -> Self {
        Self {
            kind: ObjectKind::Peer,
            namespace: None,
            name: name.to_string(),
        }
    }

    pub fn namespaced(kind: ObjectKind, namespace: impl ToString, name: impl ToString) -> Self {
        debug_assert!(kind.is_namespaced(), "{kind} is not namespaced");
        Self {
            kind,
            namespace: Some(namespace.to_string()),
            name: name.to_string(),
        }
    }

    pub fn export(namespace: impl ToString, name: impl ToString) -> Self {
        Self::namespaced(ObjectKind::Export, namespace, name)
    }

    pub fn import(namespace: impl ToString, name: impl ToString) -> Self {
        Self::namespaced(ObjectKind::Import, namespace, name)
    }

    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{} {}/{}", self.kind, ns, self.name),
            None => write!(f, "{} {}", self.kind, self.name),
        }
    }
}

// === impl Object ===

impl Object {
    pub fn kind(&self) -> ObjectKind {
        match self {
            Self::Peer(_) => ObjectKind::Peer,
            Self::Export(_) => ObjectKind::Export,
            Self::Import(_) => ObjectKind::Import,
            Self::AccessPolicy(_) => ObjectKind::AccessPolicy,
            Self::PrivilegedAccessPolicy(_) => ObjectKind::PrivilegedAccessPolicy,
        }
    }

    pub fn key(&self) -> ObjectKey {
        match self {
            Self::Peer(p) => ObjectKey::peer(&p.name),
            Self::Export(e) => ObjectKey::export(&e.namespace, &e.name),
            Self::Import(i) => ObjectKey::import(&i.namespace, &i.name),
            Self::AccessPolicy(p) => {
                ObjectKey::namespaced(ObjectKind::AccessPolicy, &p.namespace, &p.name)
            }
            Self::PrivilegedAccessPolicy(p) => {
                ObjectKey::namespaced(ObjectKind::PrivilegedAccessPolicy, &p.namespace, &p.name)
            }
        }
    }

    pub fn as_peer(&self) -> Option<&Peer> {
        match self {
            Self::Peer(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_export(&self) -> Option<&Export> {
        match self {
            Self::Export(e) => Some(e),
            _ => None,
        }
    }

    pub fn as_import(&self) -> Option<&Import> {
        match self {
            Self::Import(i) => Some(i),
            _ => None,
        }
    }

    /// Returns the policy record and whether it is privileged.
    pub fn as_policy(&self) -> Option<(&AccessPolicy, bool)> {
        match self {
            Self::AccessPolicy(p) => Some((p, false)),
            Self::PrivilegedAccessPolicy(p) => Some((p, true)),
            _ => None,
        }
    }
}

impl From<Peer> for Object {
    fn from(peer: Peer) -> Self {
        Self::Peer(peer)
    }
}

impl From<Export> for Object {
    fn from(export: Export) -> Self {
        Self::Export(export)
    }
}

impl From<Import> for Object {
    fn from(import: Import) -> Self {
        Self::Import(import)
    }
}

// === impl Revision ===

impl Revision {
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}
