use chrono::{DateTime, SecondsFormat, Utc};
use clusterlink_controller_core::{Binding, ImportStatus, PeerStatus};
use clusterlink_controller_k8s_api::{self as k8s, multicluster, API_VERSION};

pub fn import_patch(status: ImportStatus, bindings: &[Binding]) -> k8s::Patch<serde_json::Value> {
    let status = multicluster::ImportStatus {
        phase: Some(status.as_str().to_string()),
        bindings: bindings
            .iter()
            .map(|b| multicluster::BindingStatus {
                peer: b.peer.clone(),
                export_name: b.export.name.clone(),
                export_namespace: b.export.namespace().unwrap_or_default().to_string(),
            })
            .collect(),
    };
    make_patch("Import", status)
}

pub fn peer_patch(
    status: PeerStatus,
    observed_at: Option<DateTime<Utc>>,
) -> k8s::Patch<serde_json::Value> {
    let status = multicluster::PeerStatus {
        reachability: Some(status.as_str().to_string()),
        last_probe: observed_at.map(|t| t.to_rfc3339_opts(SecondsFormat::Secs, true)),
    };
    make_patch("Peer", status)
}

fn make_patch(kind: &str, status: impl serde::Serialize) -> k8s::Patch<serde_json::Value> {
    let value = serde_json::json!({
        "apiVersion": API_VERSION,
        "kind": kind,
        "status": status,
    });
    k8s::Patch::Merge(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clusterlink_controller_core::{BoundKind, ObjectKey};
    use pretty_assertions::assert_eq;

    #[test]
    fn import_status() {
        let bindings = vec![Binding {
            import: ObjectKey::import("ns-0", "reviews"),
            source: 0,
            peer: "mbg2".to_string(),
            export: ObjectKey::export("ns-1", "reviews"),
            peer_status: PeerStatus::Reachable,
        }];
        let k8s::Patch::Merge(value) =
            import_patch(ImportStatus::Bound(BoundKind::Degraded), &bindings)
        else {
            panic!("expected a merge patch");
        };
        assert_eq!(
            value,
            serde_json::json!({
                "apiVersion": "clusterlink.net/v1alpha1",
                "kind": "Import",
                "status": {
                    "phase": "Degraded",
                    "bindings": [{
                        "peer": "mbg2",
                        "exportName": "reviews",
                        "exportNamespace": "ns-1",
                    }],
                },
            })
        );
    }

    #[test]
    fn peer_status() {
        let observed_at = DateTime::<Utc>::UNIX_EPOCH + chrono::Duration::seconds(90);
        let k8s::Patch::Merge(value) = peer_patch(PeerStatus::Unreachable, Some(observed_at))
        else {
            panic!("expected a merge patch");
        };
        assert_eq!(
            value["status"],
            serde_json::json!({
                "reachability": "Unreachable",
                "lastProbe": "1970-01-01T00:01:30Z",
            })
        );

        let k8s::Patch::Merge(value) = peer_patch(PeerStatus::Unknown, None) else {
            panic!("expected a merge patch");
        };
        assert_eq!(
            value["status"],
            serde_json::json!({ "reachability": "Unknown" })
        );
    }
}
