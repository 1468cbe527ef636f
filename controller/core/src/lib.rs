//! Core model for the ClusterLink control plane.
//!
//! The control plane decides how a service published in one gateway (a *peer*) becomes
//! consumable in another:
//!
//! ```text
//! [ Peer ] <- [ Import.sources ] -> [ Export ]
//!                  |
//!              [ Binding ] -> [ LoadBalancer ] -> connection
//!
//! [ PrivilegedAccessPolicy ] > [ AccessPolicy ] > default deny
//! ```
//!
//! This crate holds the closed set of declarative object types, the pure binding and
//! load-balancing algorithms, and the access policy engine. It has no knowledge of how
//! objects are stored or watched; see the index crate for that.

#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod access;
pub mod binding;
mod error;
pub mod export;
pub mod import;
pub mod lb;
pub mod object;
pub mod peer;
pub mod selector;

pub use self::{
    access::{
        AccessPolicy, Action, AuthorizeConnection, Decision, PolicyRef, PolicySet, Verdict,
    },
    binding::{
        resolve, Binding, BoundKind, ImportStatus, PendingReason, PendingSource, Resolution,
        SourceLookup,
    },
    error::{Error, Result},
    export::Export,
    import::{Import, ImportSource, LbScheme, UnknownScheme},
    lb::{LoadBalancer, SelectBinding},
    object::{Object, ObjectKey, ObjectKind, Revision},
    peer::{Gateway, HealthSignal, Peer, PeerStatus, ProbePeer},
    selector::{AttributeSelector, Attributes, Expression, Operator},
};

pub const CONTROLLER_NAME: &str = "clusterlink.net/controller";

/// Well-known attribute carrying a workload's service name.
pub const SERVICE_NAME_ATTR: &str = "clusterlink/metadata.serviceName";

/// Well-known attribute carrying a workload's service namespace.
pub const SERVICE_NAMESPACE_ATTR: &str = "clusterlink/metadata.serviceNamespace";

/// Well-known attribute carrying the name of the gateway (peer) a workload is reached through.
pub const GATEWAY_NAME_ATTR: &str = "clusterlink/metadata.gatewayName";
