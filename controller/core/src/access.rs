use crate::{
    object::Revision,
    selector::{AttributeSelector, Attributes},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{cmp::Ordering, fmt};

/// An access rule. Shared by ordinary and privileged policies; privilege is a property of
/// the object kind, not of the record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessPolicy {
    pub name: String,
    pub namespace: String,
    pub action: Action,
    /// Matches the connection's source. Selectors are OR-ed; an empty list matches nothing.
    pub from: Vec<AttributeSelector>,
    /// Matches the connection's destination. Selectors are OR-ed; an empty list matches nothing.
    pub to: Vec<AttributeSelector>,
    #[serde(default)]
    pub created: Option<DateTime<Utc>>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Action {
    Allow,
    Deny,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Verdict {
    Allow,
    Deny,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct PolicyRef {
    pub namespace: String,
    pub name: String,
    pub privileged: bool,
}

/// The outcome of evaluating a connection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Decision {
    pub verdict: Verdict,
    /// The deciding policy; `None` when the default-deny posture applied.
    pub policy: Option<PolicyRef>,
}

/// Decides whether a connection may proceed.
pub trait AuthorizeConnection {
    fn authorize(&self, src: &Attributes, dst: &Attributes) -> Decision;
}

/// A compiled, immutable set of access rules.
///
/// Evaluation has two phases. Privileged rules are consulted first: any matching deny
/// wins, then any matching allow. Only if no privileged rule matches are ordinary rules
/// consulted, first match wins. With no match the verdict is deny.
#[derive(Clone, Debug, Default)]
pub struct PolicySet {
    privileged: Vec<Rule>,
    ordinary: Vec<Rule>,
}

#[derive(Clone, Debug)]
struct Rule {
    reference: PolicyRef,
    action: Action,
    from: Vec<AttributeSelector>,
    to: Vec<AttributeSelector>,
    specificity: usize,
    created: Option<DateTime<Utc>>,
    revision: Revision,
}

// === impl PolicySet ===

impl PolicySet {
    /// Compiles policies into evaluation order.
    ///
    /// Each item is a policy, whether it is privileged, and the store revision at which it
    /// was created.
    pub fn compile(policies: impl IntoIterator<Item = (AccessPolicy, bool, Revision)>) -> Self {
        let mut privileged = Vec::new();
        let mut ordinary = Vec::new();
        for (policy, is_privileged, revision) in policies {
            if policy.from.is_empty() || policy.to.is_empty() {
                tracing::info!(
                    namespace = %policy.namespace,
                    name = %policy.name,
                    "Policy has an empty from or to list and never matches"
                );
            }
            let rule = Rule::new(policy, is_privileged, revision);
            if is_privileged {
                privileged.push(rule);
            } else {
                ordinary.push(rule);
            }
        }
        privileged.sort_by(Rule::cmp_precedence);
        ordinary.sort_by(Rule::cmp_precedence);
        Self {
            privileged,
            ordinary,
        }
    }

    pub fn evaluate(&self, src: &Attributes, dst: &Attributes) -> Decision {
        let mut privileged_allow = None;
        for rule in self.privileged.iter().filter(|r| r.matches(src, dst)) {
            match rule.action {
                Action::Deny => return rule.decision(),
                Action::Allow => {
                    privileged_allow.get_or_insert(rule);
                }
            }
        }
        if let Some(rule) = privileged_allow {
            return rule.decision();
        }

        if let Some(rule) = self.ordinary.iter().find(|r| r.matches(src, dst)) {
            return rule.decision();
        }

        Decision {
            verdict: Verdict::Deny,
            policy: None,
        }
    }

    pub fn len(&self) -> usize {
        self.privileged.len() + self.ordinary.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl AuthorizeConnection for PolicySet {
    fn authorize(&self, src: &Attributes, dst: &Attributes) -> Decision {
        self.evaluate(src, dst)
    }
}

// === impl Rule ===

impl Rule {
    fn new(policy: AccessPolicy, privileged: bool, revision: Revision) -> Self {
        let specificity = policy
            .from
            .iter()
            .chain(policy.to.iter())
            .map(AttributeSelector::specificity)
            .sum();
        Self {
            reference: PolicyRef {
                namespace: policy.namespace,
                name: policy.name,
                privileged,
            },
            action: policy.action,
            from: policy.from,
            to: policy.to,
            specificity,
            created: policy.created,
            revision,
        }
    }

    fn matches(&self, src: &Attributes, dst: &Attributes) -> bool {
        self.from.iter().any(|s| s.matches(src)) && self.to.iter().any(|s| s.matches(dst))
    }

    fn decision(&self) -> Decision {
        Decision {
            verdict: self.action.into(),
            policy: Some(self.reference.clone()),
        }
    }

    /// Most specific first, then oldest, then by name.
    fn cmp_precedence(a: &Self, b: &Self) -> Ordering {
        b.specificity
            .cmp(&a.specificity)
            .then_with(|| match (a.created, b.created) {
                (Some(a), Some(b)) => a.cmp(&b),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            })
            .then_with(|| a.revision.cmp(&b.revision))
            .then_with(|| a.reference.namespace.cmp(&b.reference.namespace))
            .then_with(|| a.reference.name.cmp(&b.reference.name))
    }
}

// === impl Action / Verdict ===

impl From<Action> for Verdict {
    fn from(action: Action) -> Self {
        match action {
            Action::Allow => Self::Allow,
            Action::Deny => Self::Deny,
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Allow => f.write_str("allow"),
            Self::Deny => f.write_str("deny"),
        }
    }
}

impl std::str::FromStr for Action {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "allow" => Ok(Self::Allow),
            "deny" => Ok(Self::Deny),
            _ => anyhow::bail!("invalid policy action: {s}"),
        }
    }
}

impl Verdict {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow)
    }
}

impl fmt::Display for PolicyRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.privileged {
            write!(f, "privileged:{}/{}", self.namespace, self.name)
        } else {
            write!(f, "{}/{}", self.namespace, self.name)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use maplit::btreemap;

    fn attrs(app: &str) -> Attributes {
        btreemap! { "app".to_string() => app.to_string() }
    }

    fn mk_policy(name: &str, action: Action, from: &[(&str, &str)], to: &[(&str, &str)]) -> AccessPolicy {
        AccessPolicy {
            name: name.to_string(),
            namespace: "ns-0".to_string(),
            action,
            from: vec![from.iter().copied().collect()],
            to: vec![to.iter().copied().collect()],
            created: None,
        }
    }

    #[test]
    fn default_deny() {
        let set = PolicySet::compile(None);
        let decision = set.evaluate(&attrs("a"), &attrs("b"));
        assert_eq!(decision.verdict, Verdict::Deny);
        assert_eq!(decision.policy, None);
    }

    #[test]
    fn allow_all_is_an_explicit_rule() {
        let set = PolicySet::compile([(
            mk_policy("allow-all", Action::Allow, &[], &[]),
            false,
            Revision(1),
        )]);
        let decision = set.evaluate(&attrs("a"), &Attributes::new());
        assert_eq!(decision.verdict, Verdict::Allow);
        assert_eq!(decision.policy.unwrap().name, "allow-all");
    }

    #[test]
    fn privileged_deny_overrides_ordinary_allow() {
        // Order of creation must not matter.
        for revisions in [(1, 2), (2, 1)] {
            let set = PolicySet::compile([
                (
                    mk_policy("allow", Action::Allow, &[("app", "a")], &[("app", "b")]),
                    false,
                    Revision(revisions.0),
                ),
                (
                    mk_policy("deny", Action::Deny, &[("app", "a")], &[("app", "b")]),
                    true,
                    Revision(revisions.1),
                ),
            ]);
            let decision = set.evaluate(&attrs("a"), &attrs("b"));
            assert_eq!(decision.verdict, Verdict::Deny);
            assert!(decision.policy.unwrap().privileged);
        }
    }

    #[test]
    fn privileged_deny_beats_privileged_allow() {
        let set = PolicySet::compile([
            (mk_policy("p-allow", Action::Allow, &[], &[]), true, Revision(1)),
            (
                mk_policy("p-deny", Action::Deny, &[("app", "a")], &[]),
                true,
                Revision(2),
            ),
        ]);
        assert_eq!(set.evaluate(&attrs("a"), &attrs("b")).verdict, Verdict::Deny);
        assert_eq!(set.evaluate(&attrs("c"), &attrs("b")).verdict, Verdict::Allow);
    }

    #[test]
    fn privileged_allow_overrides_ordinary_deny() {
        let set = PolicySet::compile([
            (
                mk_policy("deny", Action::Deny, &[("app", "a")], &[("app", "b")]),
                false,
                Revision(1),
            ),
            (mk_policy("p-allow", Action::Allow, &[], &[]), true, Revision(2)),
        ]);
        assert_eq!(set.evaluate(&attrs("a"), &attrs("b")).verdict, Verdict::Allow);
    }

    #[test]
    fn most_specific_ordinary_rule_wins() {
        let set = PolicySet::compile([
            (mk_policy("allow-all", Action::Allow, &[], &[]), false, Revision(1)),
            (
                mk_policy("deny-a", Action::Deny, &[("app", "a")], &[]),
                false,
                Revision(2),
            ),
        ]);
        let decision = set.evaluate(&attrs("a"), &attrs("b"));
        assert_eq!(decision.verdict, Verdict::Deny);
        assert_eq!(decision.policy.unwrap().name, "deny-a");
        assert_eq!(set.evaluate(&attrs("c"), &attrs("b")).verdict, Verdict::Allow);
    }

    #[test]
    fn ties_break_by_creation_order() {
        let set = PolicySet::compile([
            (mk_policy("second", Action::Deny, &[], &[]), false, Revision(2)),
            (mk_policy("first", Action::Allow, &[], &[]), false, Revision(1)),
        ]);
        let decision = set.evaluate(&attrs("a"), &attrs("b"));
        assert_eq!(decision.policy.unwrap().name, "first");
    }

    #[test]
    fn empty_selector_list_never_matches() {
        let mut policy = mk_policy("broken", Action::Allow, &[], &[]);
        policy.from.clear();
        let set = PolicySet::compile([(policy, false, Revision(1))]);
        assert_eq!(set.evaluate(&attrs("a"), &attrs("b")).verdict, Verdict::Deny);
    }
}
