//! ClusterLink control-plane index
//!
//! Watches the cluster's `Peer`, `Export`, `Import`, `AccessPolicy` and
//! `PrivilegedAccessPolicy` resources and maintains the state the dataplane consults:
//!
//! - Every resource is converted into a control-model object and written to the object
//!   [`Store`]. The store is the only authoritative copy; everything else is derived.
//! - The [`PeerRegistry`] caches each peer's reachability. Probes run on a separate task
//!   ([`prober::Prober`]) and their results are fed back as events.
//! - The [`Reconciler`] resolves each import's sources into bindings, rebuilds its load
//!   balancer when the binding set changes, and compiles access policies. Results are
//!   published on per-import watches.
//!
//! ```text
//! [ watch ] -> [ Index ] -> [ Store ]
//!                  |            |
//!                  v            v
//!               [ Event ] -> [ Reconciler ] <- [ PeerRegistry ] <- [ Prober ]
//!                               |
//!                               v
//!                           [ Reader ] -> dataplane
//! ```
//!
//! Lookups through the [`Reader`] clone an immutable snapshot and never hold a lock across
//! a connection's lifetime.

#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

mod access_policy;
mod export;
mod import;
mod index;
mod lookup;
pub mod metrics;
mod peer;
pub mod prober;
mod reconcile;
pub mod registry;
pub mod store;

#[cfg(test)]
mod tests;

pub use self::{
    index::{Index, SharedIndex},
    lookup::{ImportPolicy, ImportRx, Reader},
    reconcile::{Event, Pass, Reconciler, StatusUpdate},
    registry::{PeerRegistry, SharedRegistry},
    store::Store,
};
