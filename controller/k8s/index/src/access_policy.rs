use crate::index::{self, Index};
use ahash::AHashSet as HashSet;
use clusterlink_controller_core::{
    AccessPolicy, Action, AttributeSelector, Error, Expression, Object, ObjectKey, ObjectKind,
    Operator, Result,
};
use clusterlink_controller_k8s_api::{
    self as k8s,
    labels,
    multicluster::{AccessRule, PolicyAction, WorkloadSetOrSelector},
    ResourceExt,
};
use kubert::index::{IndexNamespacedResource, NamespacedRemoved};

impl IndexNamespacedResource<k8s::AccessPolicy> for Index {
    fn apply(&mut self, policy: k8s::AccessPolicy) {
        let ns = policy.namespace().unwrap_or_default();
        let key = ObjectKey::namespaced(ObjectKind::AccessPolicy, &ns, policy.name_unchecked());
        let object = convert(ns, &policy.metadata, policy.spec.rule).map(Object::AccessPolicy);
        self.put(key, object);
    }

    fn delete(&mut self, namespace: String, name: String) {
        self.remove(ObjectKey::namespaced(
            ObjectKind::AccessPolicy,
            namespace,
            name,
        ));
    }

    fn reset(&mut self, policies: Vec<k8s::AccessPolicy>, _: NamespacedRemoved) {
        let present = keys(ObjectKind::AccessPolicy, &policies);
        self.retain(ObjectKind::AccessPolicy, &present);
        for policy in policies {
            self.apply(policy);
        }
    }
}

impl IndexNamespacedResource<k8s::PrivilegedAccessPolicy> for Index {
    fn apply(&mut self, policy: k8s::PrivilegedAccessPolicy) {
        let ns = policy.namespace().unwrap_or_default();
        let key = ObjectKey::namespaced(
            ObjectKind::PrivilegedAccessPolicy,
            &ns,
            policy.name_unchecked(),
        );
        let object = convert(ns, &policy.metadata, policy.spec.rule)
            .map(Object::PrivilegedAccessPolicy);
        self.put(key, object);
    }

    fn delete(&mut self, namespace: String, name: String) {
        self.remove(ObjectKey::namespaced(
            ObjectKind::PrivilegedAccessPolicy,
            namespace,
            name,
        ));
    }

    fn reset(&mut self, policies: Vec<k8s::PrivilegedAccessPolicy>, _: NamespacedRemoved) {
        let present = keys(ObjectKind::PrivilegedAccessPolicy, &policies);
        self.retain(ObjectKind::PrivilegedAccessPolicy, &present);
        for policy in policies {
            self.apply(policy);
        }
    }
}

fn keys<T: ResourceExt>(kind: ObjectKind, policies: &[T]) -> HashSet<ObjectKey> {
    policies
        .iter()
        .map(|p| {
            let ns = p.namespace().unwrap_or_default();
            ObjectKey::namespaced(kind, ns, p.name_unchecked())
        })
        .collect()
}

pub(crate) fn convert(
    namespace: String,
    meta: &k8s::ObjectMeta,
    rule: AccessRule,
) -> Result<AccessPolicy> {
    let name = index::name(meta);
    let selectors = |list: Vec<WorkloadSetOrSelector>| {
        list.into_iter()
            .map(|w| selector(w.workload_selector).map_err(|e| Error::invalid("policy", &name, e)))
            .collect::<Result<Vec<_>>>()
    };
    let from = selectors(rule.from)?;
    let to = selectors(rule.to)?;
    let action = match rule.action {
        PolicyAction::Allow => Action::Allow,
        PolicyAction::Deny => Action::Deny,
    };
    Ok(AccessPolicy {
        created: index::creation_time(meta),
        name,
        namespace,
        action,
        from,
        to,
    })
}

fn selector(selector: labels::Selector) -> std::result::Result<AttributeSelector, String> {
    let match_expressions = selector
        .match_expressions
        .unwrap_or_default()
        .into_iter()
        .map(|labels::Expression { key, operator, values }| {
            let values = values.unwrap_or_default();
            let operator = match operator {
                labels::Operator::In => Operator::In,
                labels::Operator::NotIn => Operator::NotIn,
                labels::Operator::Exists => Operator::Exists,
                labels::Operator::DoesNotExist => Operator::DoesNotExist,
            };
            match operator {
                Operator::In | Operator::NotIn if values.is_empty() => {
                    Err(format!("{key}: {operator:?} requires values"))
                }
                Operator::Exists | Operator::DoesNotExist if !values.is_empty() => {
                    Err(format!("{key}: {operator:?} does not take values"))
                }
                _ => Ok(Expression {
                    key,
                    operator,
                    values,
                }),
            }
        })
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(AttributeSelector {
        match_labels: selector.match_labels.unwrap_or_default(),
        match_expressions,
    })
}
