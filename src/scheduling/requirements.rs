//! Node Selector Requirements
//!
//! Set algebra over node selector requirements. Every requirement is a value
//! set that may be complemented (`NotIn`, `Exists`) and optionally bounded by
//! integer `Gt`/`Lt` limits, which lets `In`/`NotIn`/`Exists`/`DoesNotExist`/
//! `Gt`/`Lt` all intersect with each other.

use crate::labels;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

// =============================================================================
// Operator
// =============================================================================

/// Node selector operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub enum Operator {
    In,
    NotIn,
    Exists,
    DoesNotExist,
    Gt,
    Lt,
}

impl std::fmt::Display for Operator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Operator::In => write!(f, "In"),
            Operator::NotIn => write!(f, "NotIn"),
            Operator::Exists => write!(f, "Exists"),
            Operator::DoesNotExist => write!(f, "DoesNotExist"),
            Operator::Gt => write!(f, "Gt"),
            Operator::Lt => write!(f, "Lt"),
        }
    }
}

/// Serialized form of a requirement, as it appears in Machine and Provisioner specs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NodeSelectorRequirement {
    pub key: String,
    pub operator: Operator,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub values: Vec<String>,
}

impl NodeSelectorRequirement {
    pub fn new(key: impl Into<String>, operator: Operator, values: &[&str]) -> Self {
        Self {
            key: key.into(),
            operator,
            values: values.iter().map(|v| v.to_string()).collect(),
        }
    }
}

// =============================================================================
// Requirement
// =============================================================================

/// A single requirement on one label key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requirement {
    pub key: String,
    complement: bool,
    values: BTreeSet<String>,
    greater_than: Option<i64>,
    less_than: Option<i64>,
}

impl Requirement {
    /// Build a requirement from an operator and its values
    pub fn new<I, S>(key: impl Into<String>, operator: Operator, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let key = key.into();
        let values: BTreeSet<String> = values.into_iter().map(Into::into).collect();
        let mut requirement = Self {
            key,
            complement: false,
            values: BTreeSet::new(),
            greater_than: None,
            less_than: None,
        };
        match operator {
            Operator::In => requirement.values = values,
            Operator::NotIn => {
                requirement.complement = true;
                requirement.values = values;
            }
            Operator::Exists => requirement.complement = true,
            Operator::DoesNotExist => {}
            Operator::Gt => {
                requirement.complement = true;
                // An unparseable bound admits nothing
                match first_int(&values) {
                    Some(bound) => requirement.greater_than = Some(bound),
                    None => requirement.complement = false,
                }
            }
            Operator::Lt => {
                requirement.complement = true;
                match first_int(&values) {
                    Some(bound) => requirement.less_than = Some(bound),
                    None => requirement.complement = false,
                }
            }
        }
        requirement
    }

    /// The operator that best describes this requirement
    pub fn operator(&self) -> Operator {
        match (self.complement, self.values.is_empty()) {
            (true, false) => Operator::NotIn,
            (true, true) => Operator::Exists,
            (false, false) => Operator::In,
            (false, true) => Operator::DoesNotExist,
        }
    }

    /// Number of admissible values; complemented sets are effectively unbounded
    pub fn len(&self) -> usize {
        if self.complement {
            usize::MAX - self.values.len()
        } else {
            self.values.len()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Check whether a value is admitted
    pub fn has(&self, value: &str) -> bool {
        if self.complement {
            !self.values.contains(value) && self.within_bounds(value)
        } else {
            self.values.contains(value) && self.within_bounds(value)
        }
    }

    /// Explicit values, sorted
    pub fn values(&self) -> Vec<String> {
        self.values.iter().cloned().collect()
    }

    /// The single admissible value, if exactly one value is admitted
    pub fn single_value(&self) -> Option<&str> {
        if !self.complement && self.values.len() == 1 {
            self.values.iter().next().map(String::as_str)
        } else {
            None
        }
    }

    /// Intersect two requirements on the same key
    pub fn intersection(&self, other: &Requirement) -> Requirement {
        let complement = self.complement && other.complement;

        let greater_than = match (self.greater_than, other.greater_than) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
        let less_than = match (self.less_than, other.less_than) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        if let (Some(gt), Some(lt)) = (greater_than, less_than) {
            if gt >= lt.saturating_sub(1) {
                return Requirement::new(self.key.clone(), Operator::DoesNotExist, Vec::<String>::new());
            }
        }

        let values: BTreeSet<String> = match (self.complement, other.complement) {
            (true, true) => self.values.union(&other.values).cloned().collect(),
            (true, false) => other.values.difference(&self.values).cloned().collect(),
            (false, true) => self.values.difference(&other.values).cloned().collect(),
            (false, false) => self.values.intersection(&other.values).cloned().collect(),
        };

        let mut result = Requirement {
            key: self.key.clone(),
            complement,
            values,
            greater_than,
            less_than,
        };
        if !result.complement {
            let bounded: BTreeSet<String> = result
                .values
                .iter()
                .filter(|v| result.within_bounds(v))
                .cloned()
                .collect();
            result.values = bounded;
        }
        result
    }

    fn within_bounds(&self, value: &str) -> bool {
        if self.greater_than.is_none() && self.less_than.is_none() {
            return true;
        }
        let Ok(number) = value.parse::<i64>() else {
            return false;
        };
        self.greater_than.map_or(true, |gt| number > gt)
            && self.less_than.map_or(true, |lt| number < lt)
    }
}

fn first_int(values: &BTreeSet<String>) -> Option<i64> {
    values.iter().next().and_then(|v| v.parse().ok())
}

// =============================================================================
// Requirements
// =============================================================================

/// A set of requirements keyed by label key
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Requirements(BTreeMap<String, Requirement>);

impl Requirements {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build requirements from serialized node selector terms, normalizing
    /// label aliases. Repeated keys are intersected.
    pub fn from_node_selector(
        requirements: &[NodeSelectorRequirement],
        normalized_labels: &BTreeMap<String, String>,
    ) -> Self {
        let mut result = Self::new();
        for requirement in requirements {
            let key = labels::normalize(normalized_labels, &requirement.key);
            result.add(Requirement::new(
                key,
                requirement.operator,
                requirement.values.iter().cloned(),
            ));
        }
        result
    }

    /// Add a requirement, intersecting with any existing one on the same key
    pub fn add(&mut self, requirement: Requirement) {
        let merged = match self.0.get(&requirement.key) {
            Some(existing) => existing.intersection(&requirement),
            None => requirement,
        };
        self.0.insert(merged.key.clone(), merged);
    }

    pub fn has(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn get(&self, key: &str) -> Option<&Requirement> {
        self.0.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Requirement)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Check that `self` admits a value for `key`, treating absent keys as unconstrained
    pub fn admits(&self, key: &str, value: &str) -> bool {
        self.get(key).map_or(true, |requirement| requirement.has(value))
    }

    /// Check that every key constrained on both sides has a common value.
    ///
    /// Keys `other` doesn't constrain are unconstrained. An empty intersection
    /// is tolerated only when both sides merely exclude values.
    pub fn intersects(&self, other: &Requirements) -> Result<(), String> {
        let mut failures = Vec::new();
        for (key, existing) in &self.0 {
            let Some(incoming) = other.get(key) else {
                continue;
            };
            if existing.intersection(incoming).len() > 0 {
                continue;
            }
            let excludes = |op: Operator| matches!(op, Operator::NotIn | Operator::DoesNotExist);
            if excludes(incoming.operator()) && excludes(existing.operator()) {
                continue;
            }
            failures.push(format!(
                "key {}, {} {:?} not in {} {:?}",
                key,
                existing.operator(),
                existing.values(),
                incoming.operator(),
                incoming.values()
            ));
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(failures.join("; "))
        }
    }

    /// Check compatibility of a machine's requirements with an instance type's
    pub fn compatible(&self, other: &Requirements) -> Result<(), String> {
        self.intersects(other)
    }
}

impl FromIterator<Requirement> for Requirements {
    fn from_iter<T: IntoIterator<Item = Requirement>>(iter: T) -> Self {
        let mut requirements = Self::new();
        for requirement in iter {
            requirements.add(requirement);
        }
        requirements
    }
}
