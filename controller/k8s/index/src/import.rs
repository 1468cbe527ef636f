use crate::index::{self, Index};
use ahash::AHashSet as HashSet;
use clusterlink_controller_core::{
    Error, Import, ImportSource, LbScheme, Object, ObjectKey, ObjectKind, Result,
};
use clusterlink_controller_k8s_api::{self as k8s, ResourceExt};
use kubert::index::{IndexNamespacedResource, NamespacedRemoved};

impl IndexNamespacedResource<k8s::Import> for Index {
    fn apply(&mut self, import: k8s::Import) {
        let ns = import.namespace().unwrap_or_default();
        let key = ObjectKey::import(&ns, import.name_unchecked());
        self.put(key, convert(ns, import));
    }

    fn delete(&mut self, namespace: String, name: String) {
        self.remove(ObjectKey::import(namespace, name));
    }

    fn reset(&mut self, imports: Vec<k8s::Import>, _: NamespacedRemoved) {
        let present = imports
            .iter()
            .map(|r| ObjectKey::import(r.namespace().unwrap_or_default(), r.name_unchecked()))
            .collect::<HashSet<_>>();
        self.retain(ObjectKind::Import, &present);
        for import in imports {
            self.apply(import);
        }
    }
}

/// Converts an Import resource.
///
/// An unknown load-balancing scheme does not invalidate the import; the default scheme
/// is used instead.
pub(crate) fn convert(namespace: String, import: k8s::Import) -> Result<Object> {
    let name = index::name(&import.metadata);
    let spec = import.spec;
    if spec.port == 0 {
        return Err(Error::invalid("import", name, "port must be non-zero"));
    }

    let sources = spec
        .sources
        .into_iter()
        .map(|s| {
            if s.peer.is_empty() || s.export_name.is_empty() {
                return Err(Error::invalid(
                    "import",
                    &name,
                    "sources must name a peer and an export",
                ));
            }
            Ok(ImportSource {
                peer: s.peer,
                export_name: s.export_name,
                export_namespace: s.export_namespace.filter(|ns| !ns.is_empty()),
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let lb_scheme = match spec.lb_scheme.as_deref().map(str::parse::<LbScheme>) {
        None => LbScheme::Default,
        Some(Ok(scheme)) => scheme,
        Some(Err(error)) => {
            tracing::warn!(%namespace, %name, %error, "Using the default load-balancing scheme");
            LbScheme::Default
        }
    };

    Ok(Import {
        name,
        namespace,
        port: spec.port,
        sources,
        lb_scheme,
    }
    .into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s::multicluster::ImportSpec;

    fn mk_import(sources: Vec<k8s::multicluster::ImportSource>, lb_scheme: Option<&str>) -> k8s::Import {
        k8s::Import {
            metadata: k8s::ObjectMeta {
                namespace: Some("ns-0".to_string()),
                name: Some("reviews".to_string()),
                ..Default::default()
            },
            spec: ImportSpec {
                port: 9080,
                sources,
                lb_scheme: lb_scheme.map(Into::into),
            },
            status: None,
        }
    }

    fn mk_source(peer: &str, export_ns: Option<&str>) -> k8s::multicluster::ImportSource {
        k8s::multicluster::ImportSource {
            peer: peer.to_string(),
            export_name: "reviews".to_string(),
            export_namespace: export_ns.map(Into::into),
        }
    }

    #[test]
    fn converts_sources_in_order() {
        let import = mk_import(
            vec![mk_source("mbg2", None), mk_source("mbg3", Some("other"))],
            Some("static"),
        );
        let expected = Import::new(
            "ns-0",
            "reviews",
            9080,
            [
                ImportSource::new("mbg2", "reviews"),
                ImportSource::new("mbg3", "reviews").in_namespace("other"),
            ],
        )
        .with_scheme(LbScheme::Static);
        assert_eq!(
            convert("ns-0".to_string(), import).unwrap(),
            Object::Import(expected)
        );
    }

    #[test]
    fn unknown_scheme_falls_back_to_default() {
        let import = mk_import(vec![mk_source("mbg2", Some(""))], Some("weighted"));
        let Object::Import(import) = convert("ns-0".to_string(), import).unwrap() else {
            panic!("expected an import");
        };
        assert_eq!(import.lb_scheme, LbScheme::Default);
        assert_eq!(import.sources[0].export_namespace, None);
    }

    #[test]
    fn zero_sources_is_valid() {
        let import = mk_import(vec![], None);
        assert!(convert("ns-0".to_string(), import).is_ok());
    }

    #[test]
    fn rejects_incomplete_sources() {
        let import = mk_import(vec![mk_source("", None)], None);
        assert!(convert("ns-0".to_string(), import).is_err());
    }
}
