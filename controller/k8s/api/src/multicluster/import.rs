use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Resolves a local name to one or more exports published by peers.
#[derive(Clone, Debug, PartialEq, Eq, CustomResource, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "clusterlink.net",
    version = "v1alpha1",
    kind = "Import",
    namespaced,
    status = "ImportStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct ImportSpec {
    /// The port at which local consumers reach the import.
    pub port: u16,

    #[serde(default)]
    pub sources: Vec<ImportSource>,

    /// One of `static`, `ecmp` (or `round-robin`) and `random`. Unset selects a default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lb_scheme: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ImportSource {
    pub peer: String,
    pub export_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub export_namespace: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ImportStatus {
    /// One of `Pending`, `Bound` or `Degraded`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,

    #[serde(default)]
    pub bindings: Vec<BindingStatus>,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BindingStatus {
    pub peer: String,
    pub export_name: String,
    pub export_namespace: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::CustomResourceExt;

    #[test]
    fn crd_schema_lists_spec_fields() {
        let crd = Import::crd();
        assert_eq!(crd.spec.group, "clusterlink.net");
        let version = &crd.spec.versions[0];
        assert!(version.subresources.as_ref().is_some_and(|s| s.status.is_some()));

        let schema = version
            .schema
            .as_ref()
            .and_then(|s| s.open_api_v3_schema.as_ref())
            .expect("CRD must carry a schema");
        let spec = &schema.properties.as_ref().expect("root properties")["spec"];
        let mut fields = spec
            .properties
            .as_ref()
            .expect("spec properties")
            .keys()
            .cloned()
            .collect::<Vec<_>>();
        fields.sort();
        assert_eq!(fields, ["lbScheme", "port", "sources"]);
        assert_eq!(spec.required.as_deref(), Some(&["port".to_string()][..]));
    }

    #[test]
    fn deserializes_sources() {
        let spec: ImportSpec = serde_yaml::from_str(
            r#"
port: 9080
sources:
  - peer: mbg2
    exportName: reviews
lbScheme: ecmp
"#,
        )
        .expect("import must parse");
        assert_eq!(spec.port, 9080);
        assert_eq!(
            spec.sources,
            vec![ImportSource {
                peer: "mbg2".to_string(),
                export_name: "reviews".to_string(),
                export_namespace: None,
            }]
        );
        assert_eq!(spec.lb_scheme.as_deref(), Some("ecmp"));
    }
}
