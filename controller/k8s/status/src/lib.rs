//! Writes reconcile results back to resource status.
//!
//! The reconciler emits a [`StatusUpdate`] whenever an import's phase or bindings change,
//! or a peer's reachability changes. The [`Controller`] turns each update into a merge
//! patch against the resource's `status` subresource.

#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

mod controller;
mod patch;

pub use self::{
    controller::{Controller, ControllerMetrics},
    patch::{import_patch, peer_patch},
};
pub use clusterlink_controller_k8s_index::StatusUpdate;
