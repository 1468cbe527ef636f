pub mod access_policy;
pub mod export;
pub mod import;
pub mod peer;

pub use self::{
    access_policy::{
        AccessPolicy, AccessPolicySpec, AccessRule, PolicyAction, PrivilegedAccessPolicy,
        PrivilegedAccessPolicySpec, WorkloadSetOrSelector,
    },
    export::{Export, ExportSpec},
    import::{BindingStatus, Import, ImportSource, ImportSpec, ImportStatus},
    peer::{Endpoint, Peer, PeerSpec, PeerStatus},
};

pub const API_GROUP: &str = "clusterlink.net";
pub const API_VERSION: &str = "clusterlink.net/v1alpha1";
