use crate::labels;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// An ordinary access rule, evaluated after all privileged rules.
#[derive(Clone, Debug, PartialEq, Eq, CustomResource, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "clusterlink.net",
    version = "v1alpha1",
    kind = "AccessPolicy",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct AccessPolicySpec {
    #[serde(flatten)]
    pub rule: AccessRule,
}

/// An access rule with override authority over every `AccessPolicy`.
#[derive(Clone, Debug, PartialEq, Eq, CustomResource, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "clusterlink.net",
    version = "v1alpha1",
    kind = "PrivilegedAccessPolicy",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct PrivilegedAccessPolicySpec {
    #[serde(flatten)]
    pub rule: AccessRule,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AccessRule {
    pub action: PolicyAction,
    pub from: Vec<WorkloadSetOrSelector>,
    pub to: Vec<WorkloadSetOrSelector>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub enum PolicyAction {
    #[serde(rename = "allow")]
    Allow,
    #[serde(rename = "deny")]
    Deny,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadSetOrSelector {
    #[serde(default)]
    pub workload_selector: labels::Selector,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_allow_all() {
        let spec: AccessPolicySpec = serde_yaml::from_str(
            r#"
action: allow
from:
  - workloadSelector: {}
to:
  - workloadSelector: {}
"#,
        )
        .expect("policy must parse");
        assert_eq!(spec.rule.action, PolicyAction::Allow);
        assert!(spec.rule.from[0].workload_selector.is_empty());
        assert!(spec.rule.to[0].workload_selector.is_empty());
    }
}
