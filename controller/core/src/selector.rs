use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Attributes describing one side of a connection (labels of a workload or service).
pub type Attributes = BTreeMap<String, String>;

/// Matches workload attributes. An empty selector matches everything.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AttributeSelector {
    #[serde(default)]
    pub match_labels: BTreeMap<String, String>,
    #[serde(default)]
    pub match_expressions: Vec<Expression>,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Expression {
    pub key: String,
    pub operator: Operator,
    #[serde(default)]
    pub values: BTreeSet<String>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operator {
    In,
    NotIn,
    Exists,
    DoesNotExist,
}

// === impl AttributeSelector ===

impl AttributeSelector {
    pub fn matches(&self, attrs: &Attributes) -> bool {
        self.match_labels
            .iter()
            .all(|(k, v)| attrs.get(k) == Some(v))
            && self.match_expressions.iter().all(|e| e.matches(attrs))
    }

    /// The number of constraints this selector declares.
    pub fn specificity(&self) -> usize {
        self.match_labels.len() + self.match_expressions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specificity() == 0
    }
}

impl<K: ToString, V: ToString> FromIterator<(K, V)> for AttributeSelector {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self {
            match_labels: iter
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            match_expressions: vec![],
        }
    }
}

// === impl Expression ===

impl Expression {
    pub fn new(
        key: impl ToString,
        operator: Operator,
        values: impl IntoIterator<Item = impl ToString>,
    ) -> Self {
        Self {
            key: key.to_string(),
            operator,
            values: values.into_iter().map(|v| v.to_string()).collect(),
        }
    }

    fn matches(&self, attrs: &Attributes) -> bool {
        let value = attrs.get(&self.key);
        match self.operator {
            Operator::In => value.is_some_and(|v| self.values.contains(v)),
            Operator::NotIn => !value.is_some_and(|v| self.values.contains(v)),
            Operator::Exists => value.is_some(),
            Operator::DoesNotExist => value.is_none(),
        }
    }
}
