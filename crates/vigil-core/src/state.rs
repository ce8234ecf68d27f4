//! World state and the two predicates the planner and executor reason with.
//!
//! A [`WorldState`] is an immutable snapshot of named facts. Every mutation
//! returns a new value; the executor is the only place that holds a "working"
//! state, and it replaces it step by step.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::action::Action;

/// Value of a single fact: a flag or an enumerable status.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FactValue {
    /// Boolean fact (e.g. `hasImage`).
    Bool(bool),
    /// Enumerable status (e.g. `triage = "urgent"`).
    Status(String),
}

impl FactValue {
    /// Name of the value's kind, used in validation messages.
    pub fn kind(&self) -> &'static str {
        match self {
            FactValue::Bool(_) => "bool",
            FactValue::Status(_) => "status",
        }
    }

    /// Returns true if both values are of the same kind.
    pub fn same_kind(&self, other: &FactValue) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
    }
}

impl fmt::Display for FactValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FactValue::Bool(b) => write!(f, "{}", b),
            FactValue::Status(s) => write!(f, "{}", s),
        }
    }
}

impl From<bool> for FactValue {
    fn from(value: bool) -> Self {
        FactValue::Bool(value)
    }
}

impl From<&str> for FactValue {
    fn from(value: &str) -> Self {
        FactValue::Status(value.to_string())
    }
}

impl From<String> for FactValue {
    fn from(value: String) -> Self {
        FactValue::Status(value)
    }
}

/// A set of required or resulting fact values, keyed by fact name.
pub type Facts = BTreeMap<String, FactValue>;

/// Immutable snapshot of named facts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorldState {
    facts: Facts,
}

impl WorldState {
    /// Create an empty world state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a world state from an existing fact map.
    pub fn from_facts(facts: Facts) -> Self {
        Self { facts }
    }

    /// Return a copy with `key` set to `value`.
    pub fn with_fact(&self, key: impl Into<String>, value: impl Into<FactValue>) -> Self {
        let mut facts = self.facts.clone();
        facts.insert(key.into(), value.into());
        Self { facts }
    }

    /// Return a copy without `key`.
    pub fn without_fact(&self, key: &str) -> Self {
        let mut facts = self.facts.clone();
        facts.remove(key);
        Self { facts }
    }

    /// Get the value of a fact.
    pub fn get(&self, key: &str) -> Option<&FactValue> {
        self.facts.get(key)
    }

    /// Check whether a fact is present.
    pub fn contains(&self, key: &str) -> bool {
        self.facts.contains_key(key)
    }

    /// Number of facts.
    pub fn len(&self) -> usize {
        self.facts.len()
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.facts.is_empty()
    }

    /// Iterate facts in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &FactValue)> {
        self.facts.iter()
    }

    /// Iterate fact keys in order.
    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.facts.keys()
    }

    /// Borrow the underlying fact map.
    pub fn facts(&self) -> &Facts {
        &self.facts
    }

    /// Overlay `effects` onto this state. Effect values always win.
    pub fn overlay(&self, effects: &Facts) -> Self {
        let mut facts = self.facts.clone();
        for (key, value) in effects {
            facts.insert(key.clone(), value.clone());
        }
        Self { facts }
    }

    /// Goal facts that this state does not satisfy, in key order.
    pub fn unsatisfied<'a>(&self, goal: &'a WorldState) -> Vec<&'a str> {
        goal.facts
            .iter()
            .filter(|(key, value)| self.facts.get(*key) != Some(*value))
            .map(|(key, _)| key.as_str())
            .collect()
    }

    /// Returns true if every fact of `goal` holds in this state.
    pub fn satisfies_goal(&self, goal: &WorldState) -> bool {
        satisfies(self, &goal.facts)
    }

    /// Apply a drift diff, producing a new state.
    pub fn apply_diff(&self, diff: &StateDiff) -> Self {
        let mut facts = self.facts.clone();
        for key in &diff.unset {
            facts.remove(key);
        }
        for (key, value) in &diff.set {
            facts.insert(key.clone(), value.clone());
        }
        Self { facts }
    }

    /// Compute the diff that turns `self` into `other`.
    pub fn diff(&self, other: &WorldState) -> StateDiff {
        let set = other
            .facts
            .iter()
            .filter(|(key, value)| self.facts.get(*key) != Some(*value))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        let unset = self
            .facts
            .keys()
            .filter(|key| !other.facts.contains_key(*key))
            .cloned()
            .collect();
        StateDiff { set, unset }
    }
}

impl<K, V> FromIterator<(K, V)> for WorldState
where
    K: Into<String>,
    V: Into<FactValue>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            facts: iter
                .into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        }
    }
}

impl fmt::Display for WorldState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (key, value)) in self.facts.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}: {}", key, value)?;
        }
        write!(f, "}}")
    }
}

/// Externally observed change to the world state (state drift).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateDiff {
    /// Facts set or overwritten.
    #[serde(default)]
    pub set: Facts,

    /// Facts that no longer hold.
    #[serde(default)]
    pub unset: BTreeSet<String>,
}

impl StateDiff {
    /// Diff that sets a single fact.
    pub fn set(key: impl Into<String>, value: impl Into<FactValue>) -> Self {
        let mut diff = Self::default();
        diff.set.insert(key.into(), value.into());
        diff
    }

    /// Diff that removes a single fact.
    pub fn unset(key: impl Into<String>) -> Self {
        let mut diff = Self::default();
        diff.unset.insert(key.into());
        diff
    }

    /// Check if the diff changes nothing.
    pub fn is_empty(&self) -> bool {
        self.set.is_empty() && self.unset.is_empty()
    }

    /// Keys touched by this diff.
    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.set.keys().chain(self.unset.iter())
    }
}

/// True iff every precondition fact is present in `state` with the required
/// value. Absent facts fail the check.
pub fn satisfies(state: &WorldState, preconditions: &Facts) -> bool {
    preconditions
        .iter()
        .all(|(key, value)| state.facts.get(key) == Some(value))
}

/// Overlay `action`'s effects onto `state`.
pub fn apply_effects(state: &WorldState, action: &Action) -> WorldState {
    state.overlay(&action.effects)
}

/// Preconditions of `action` that do not hold in `state`.
pub fn missing_preconditions(state: &WorldState, action: &Action) -> Vec<String> {
    action
        .preconditions
        .iter()
        .filter(|(key, value)| state.facts.get(*key) != Some(*value))
        .map(|(key, value)| format!("{}={}", key, value))
        .collect()
}
