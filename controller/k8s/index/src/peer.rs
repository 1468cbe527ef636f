use crate::index::{self, Index};
use ahash::AHashSet as HashSet;
use clusterlink_controller_core::{Error, Gateway, Object, ObjectKey, ObjectKind, Peer, Result};
use clusterlink_controller_k8s_api::{self as k8s, ResourceExt};
use kubert::index::{ClusterRemoved, IndexClusterResource};

impl IndexClusterResource<k8s::Peer> for Index {
    fn apply(&mut self, peer: k8s::Peer) {
        let key = ObjectKey::peer(peer.name_unchecked());
        self.put(key, convert(peer));
    }

    fn delete(&mut self, name: String) {
        self.remove(ObjectKey::peer(name));
    }

    // The removed set only covers objects seen by a previous listing, so it misses
    // anything restored from a snapshot. Sweep against the listing instead.
    fn reset(&mut self, peers: Vec<k8s::Peer>, _: ClusterRemoved) {
        let present = peers
            .iter()
            .map(|p| ObjectKey::peer(p.name_unchecked()))
            .collect::<HashSet<_>>();
        self.retain(ObjectKind::Peer, &present);
        for peer in peers {
            self.apply(peer);
        }
    }
}

pub(crate) fn convert(peer: k8s::Peer) -> Result<Object> {
    let name = index::name(&peer.metadata);
    if peer.spec.gateways.is_empty() {
        return Err(Error::invalid("peer", name, "no gateways"));
    }
    let gateways = peer
        .spec
        .gateways
        .into_iter()
        .map(|k8s::multicluster::Endpoint { host, port }| {
            if host.is_empty() || port == 0 {
                return Err(Error::invalid(
                    "peer",
                    &name,
                    format!("invalid gateway {host}:{port}"),
                ));
            }
            Ok(Gateway { host, port })
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(Peer { name, gateways }.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s::multicluster::{Endpoint, PeerSpec};

    fn mk_peer(name: &str, gateways: Vec<Endpoint>) -> k8s::Peer {
        k8s::Peer {
            metadata: k8s::ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            spec: PeerSpec { gateways },
            status: None,
        }
    }

    #[test]
    fn converts_gateways() {
        let peer = mk_peer(
            "mbg2",
            vec![Endpoint {
                host: "10.0.0.2".to_string(),
                port: 443,
            }],
        );
        assert_eq!(
            convert(peer).unwrap(),
            Object::Peer(Peer::new("mbg2", [("10.0.0.2", 443)]))
        );
    }

    #[test]
    fn rejects_unusable_gateways() {
        assert!(convert(mk_peer("mbg2", vec![])).is_err());
        assert!(convert(mk_peer(
            "mbg2",
            vec![Endpoint {
                host: "10.0.0.2".to_string(),
                port: 0,
            }]
        ))
        .is_err());
    }
}
