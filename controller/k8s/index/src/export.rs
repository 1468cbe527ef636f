use crate::index::{self, Index};
use ahash::AHashSet as HashSet;
use clusterlink_controller_core::{Error, Export, Object, ObjectKey, ObjectKind, Result};
use clusterlink_controller_k8s_api::{self as k8s, ResourceExt};
use kubert::index::{IndexNamespacedResource, NamespacedRemoved};

impl IndexNamespacedResource<k8s::Export> for Index {
    fn apply(&mut self, export: k8s::Export) {
        let ns = export.namespace().unwrap_or_default();
        let key = ObjectKey::export(&ns, export.name_unchecked());
        self.put(key, convert(ns, export));
    }

    fn delete(&mut self, namespace: String, name: String) {
        self.remove(ObjectKey::export(namespace, name));
    }

    fn reset(&mut self, exports: Vec<k8s::Export>, _: NamespacedRemoved) {
        let present = exports
            .iter()
            .map(|r| ObjectKey::export(r.namespace().unwrap_or_default(), r.name_unchecked()))
            .collect::<HashSet<_>>();
        self.retain(ObjectKind::Export, &present);
        for export in exports {
            self.apply(export);
        }
    }
}

/// An export without a host targets the service of the same name.
pub(crate) fn convert(namespace: String, export: k8s::Export) -> Result<Object> {
    let name = index::name(&export.metadata);
    let k8s::multicluster::ExportSpec { host, port } = export.spec;
    if port == 0 {
        return Err(Error::invalid("export", name, "port must be non-zero"));
    }
    let host = host.filter(|h| !h.is_empty()).unwrap_or_else(|| name.clone());
    Ok(Export {
        name,
        namespace,
        host,
        port,
    }
    .into())
}
