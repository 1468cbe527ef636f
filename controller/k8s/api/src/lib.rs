#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod labels;
pub mod multicluster;

pub use self::multicluster::{
    AccessPolicy, Export, Import, Peer, PrivilegedAccessPolicy, API_GROUP, API_VERSION,
};
pub use k8s_openapi::{
    api::{self, core::v1::Service},
    apimachinery::pkg::apis::meta::v1::Time,
};
pub use kube::{
    api::{Api, DeleteParams, ListParams, ObjectMeta, Patch, PatchParams, PostParams},
    error::ErrorResponse,
    runtime::watcher,
    Client, CustomResourceExt, Error, Resource, ResourceExt,
};
