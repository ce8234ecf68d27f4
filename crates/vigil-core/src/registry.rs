//! The action registry: a read-only catalog of every action the planner may
//! use, built once before the engine starts.

use std::collections::BTreeMap;

use tracing::debug;

use crate::action::Action;
use crate::error::{Result, VigilError};
use crate::state::{FactValue, WorldState};

/// Immutable catalog of actions, keyed and iterated by id.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    actions: BTreeMap<String, Action>,
    initial_state: WorldState,
    /// Fact key -> kind ("bool" / "status") for every known fact.
    fact_kinds: BTreeMap<String, &'static str>,
}

impl Registry {
    /// Start building a registry.
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    /// Look up an action by id.
    pub fn get(&self, id: &str) -> Option<&Action> {
        self.actions.get(id)
    }

    /// Look up an action, failing with `UnknownAction`.
    pub fn require(&self, id: &str) -> Result<&Action> {
        self.get(id).ok_or_else(|| VigilError::UnknownAction { id: id.to_string() })
    }

    /// All actions in id order.
    pub fn actions(&self) -> impl Iterator<Item = &Action> {
        self.actions.values()
    }

    /// Ids of actions designated as replanning fallbacks.
    pub fn fallback_ids(&self) -> impl Iterator<Item = &str> {
        self.actions
            .values()
            .filter(|a| a.fallback)
            .map(|a| a.id.as_str())
    }

    /// Number of registered actions.
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Start state declared alongside the actions.
    pub fn initial_state(&self) -> &WorldState {
        &self.initial_state
    }

    /// Returns true if some action produces the fact or the initial state
    /// carries it.
    pub fn is_known_fact(&self, key: &str) -> bool {
        self.fact_kinds.contains_key(key)
    }

    /// Known fact keys with their kinds.
    pub fn known_facts(&self) -> &BTreeMap<String, &'static str> {
        &self.fact_kinds
    }

    /// Check that a goal only references known facts.
    pub fn validate_goal(&self, goal: &WorldState) -> Result<()> {
        for key in goal.keys() {
            if !self.is_known_fact(key) {
                return Err(VigilError::UnknownFact { key: key.clone() });
            }
        }
        Ok(())
    }
}

/// Collects actions and validates them into a [`Registry`].
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    actions: Vec<Action>,
    initial_state: WorldState,
}

impl RegistryBuilder {
    /// Create an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the initial world state.
    pub fn initial_state(mut self, state: WorldState) -> Self {
        self.initial_state = state;
        self
    }

    /// Add an action.
    pub fn action(mut self, action: Action) -> Self {
        self.actions.push(action);
        self
    }

    /// Validate and freeze the registry.
    ///
    /// Rejects duplicate ids, negative or non-finite costs, zero timeouts,
    /// facts used with conflicting kinds, and preconditions on facts that
    /// neither an effect nor the initial state provides.
    pub fn build(self) -> Result<Registry> {
        let mut actions = BTreeMap::new();
        let mut fact_kinds: BTreeMap<String, &'static str> = BTreeMap::new();

        for (key, value) in self.initial_state.iter() {
            fact_kinds.insert(key.clone(), value.kind());
        }

        for action in &self.actions {
            if action.id.trim().is_empty() {
                return Err(VigilError::manifest("action id cannot be empty"));
            }
            if !action.base_cost.is_finite() || action.base_cost < 0.0 {
                return Err(VigilError::manifest(format!(
                    "action '{}' has invalid cost {}",
                    action.id, action.base_cost
                )));
            }
            if action.timeout_ms == Some(0) {
                return Err(VigilError::manifest(format!(
                    "action '{}' has a zero timeout",
                    action.id
                )));
            }
            if action.effects.is_empty() {
                return Err(VigilError::manifest(format!(
                    "action '{}' declares no effects",
                    action.id
                )));
            }
            for (key, value) in &action.effects {
                check_kind(&mut fact_kinds, &action.id, key, value)?;
            }
        }

        for action in self.actions {
            for (key, value) in &action.preconditions {
                if !fact_kinds.contains_key(key) {
                    return Err(VigilError::manifest(format!(
                        "action '{}' requires unknown fact '{}'",
                        action.id, key
                    )));
                }
                check_kind(&mut fact_kinds, &action.id, key, value)?;
            }
            debug!("Registered action {} ({})", action.id, action.role);
            if let Some(previous) = actions.insert(action.id.clone(), action) {
                return Err(VigilError::manifest(format!(
                    "duplicate action id '{}'",
                    previous.id
                )));
            }
        }

        Ok(Registry {
            actions,
            initial_state: self.initial_state,
            fact_kinds,
        })
    }
}

fn check_kind(
    kinds: &mut BTreeMap<String, &'static str>,
    action_id: &str,
    key: &str,
    value: &FactValue,
) -> Result<()> {
    match kinds.get(key) {
        Some(kind) if *kind != value.kind() => Err(VigilError::manifest(format!(
            "action '{}' uses fact '{}' as {} but it is declared as {}",
            action_id,
            key,
            value.kind(),
            kind
        ))),
        Some(_) => Ok(()),
        None => {
            kinds.insert(key.to_string(), value.kind());
            Ok(())
        }
    }
}
