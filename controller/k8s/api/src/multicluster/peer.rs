use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A remote gateway that imports may be sourced from. Peers are cluster scoped.
#[derive(Clone, Debug, PartialEq, Eq, CustomResource, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "clusterlink.net",
    version = "v1alpha1",
    kind = "Peer",
    status = "PeerStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct PeerSpec {
    pub gateways: Vec<Endpoint>,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PeerStatus {
    /// One of `Reachable`, `Unreachable` or `Unknown`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reachability: Option<String>,

    /// RFC 3339 timestamp of the observation that produced `reachability`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_probe: Option<String>,
}
