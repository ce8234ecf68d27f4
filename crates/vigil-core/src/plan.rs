//! Plans: ordered action references with cumulative costs.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::action::Action;
use crate::error::{Result, VigilError};
use crate::registry::Registry;
use crate::state::{apply_effects, missing_preconditions, satisfies, WorldState};

/// One step of a plan. References its action by id only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanStep {
    /// Id of the action in the registry.
    pub action_id: String,

    /// Cost of this step.
    pub cost: f64,

    /// Cost of the plan up to and including this step.
    pub cumulative_cost: f64,
}

/// An ordered, minimum-cost sequence of actions from `start` to `goal`.
///
/// Plans are values: replanning produces a new plan instead of editing one.
/// Two plans computed from the same inputs compare equal and share a
/// fingerprint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Plan {
    /// State the plan was computed from.
    pub start: WorldState,

    /// Facts the plan must establish.
    pub goal: WorldState,

    /// Steps in execution order.
    pub steps: Vec<PlanStep>,

    /// Sum of step costs.
    pub total_cost: f64,

    /// Search nodes expanded while computing this plan.
    pub states_explored: usize,
}

impl Plan {
    /// Create an empty plan.
    pub fn new(start: WorldState, goal: WorldState) -> Self {
        Self {
            start,
            goal,
            steps: Vec::new(),
            total_cost: 0.0,
            states_explored: 0,
        }
    }

    /// Append a step for `action`.
    pub fn push(&mut self, action: &Action) {
        self.total_cost += action.base_cost;
        self.steps.push(PlanStep {
            action_id: action.id.clone(),
            cost: action.base_cost,
            cumulative_cost: self.total_cost,
        });
    }

    /// Number of steps.
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Check if the plan has no steps (goal already satisfied).
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Action ids in order.
    pub fn action_ids(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.action_id.as_str()).collect()
    }

    /// The steps from `from` onward as a plan starting at `state`.
    pub fn remaining(&self, state: &WorldState, from: usize) -> Plan {
        let mut plan = Plan::new(state.clone(), self.goal.clone());
        for step in self.steps.iter().skip(from) {
            plan.total_cost += step.cost;
            plan.steps.push(PlanStep {
                action_id: step.action_id.clone(),
                cost: step.cost,
                cumulative_cost: plan.total_cost,
            });
        }
        plan.states_explored = self.states_explored;
        plan
    }

    /// Walk `steps[from..]` from `state`, checking each precondition and
    /// applying effects. Returns the resulting state.
    pub fn simulate(&self, registry: &Registry, state: &WorldState, from: usize) -> Result<WorldState> {
        let mut current = state.clone();
        for step in self.steps.iter().skip(from) {
            let action = registry.require(&step.action_id)?;
            if !satisfies(&current, &action.preconditions) {
                return Err(VigilError::PreconditionUnmet {
                    agent_id: action.id.clone(),
                    missing: missing_preconditions(&current, action),
                });
            }
            current = apply_effects(&current, action);
        }
        Ok(current)
    }

    /// Returns true if `steps[from..]` still reach the goal from `state`.
    pub fn is_valid_from(&self, registry: &Registry, state: &WorldState, from: usize) -> bool {
        self.simulate(registry, state, from)
            .map(|end| end.satisfies_goal(&self.goal))
            .unwrap_or(false)
    }

    /// SHA-256 over start, goal and steps, hex encoded.
    pub fn fingerprint(&self) -> String {
        let content = serde_json::json!({
            "start": self.start,
            "goal": self.goal,
            "steps": self.steps,
        });
        let mut hasher = Sha256::new();
        hasher.update(content.to_string().as_bytes());
        hex_encode(hasher.finalize())
    }
}

pub(crate) fn hex_encode(bytes: impl AsRef<[u8]>) -> String {
    bytes.as_ref().iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::AgentRole;

    fn registry() -> Registry {
        Registry::builder()
            .action(
                Action::builder("intake", AgentRole::Intake)
                    .effect("hasImage", true)
                    .build(),
            )
            .action(
                Action::builder("classify", AgentRole::Classification)
                    .precondition("hasImage", true)
                    .effect("hasResult", true)
                    .cost(2.0)
                    .build(),
            )
            .build()
            .unwrap()
    }

    fn two_step_plan(registry: &Registry) -> Plan {
        let mut plan = Plan::new(
            WorldState::new(),
            WorldState::from_iter([("hasResult", true)]),
        );
        plan.push(registry.get("intake").unwrap());
        plan.push(registry.get("classify").unwrap());
        plan
    }

    #[test]
    fn test_cumulative_costs() {
        let registry = registry();
        let plan = two_step_plan(&registry);

        assert_eq!(plan.action_ids(), vec!["intake", "classify"]);
        assert_eq!(plan.steps[0].cumulative_cost, 1.0);
        assert_eq!(plan.steps[1].cumulative_cost, 3.0);
        assert_eq!(plan.total_cost, 3.0);
    }

    #[test]
    fn test_simulation_and_validity() {
        let registry = registry();
        let plan = two_step_plan(&registry);

        assert!(plan.is_valid_from(&registry, &plan.start, 0));

        // skipping intake leaves classify without its image
        let err = plan.simulate(&registry, &WorldState::new(), 1).unwrap_err();
        assert!(matches!(err, VigilError::PreconditionUnmet { .. }));

        let drifted = WorldState::from_iter([("hasImage", true)]);
        assert!(plan.is_valid_from(&registry, &drifted, 1));
    }

    #[test]
    fn test_remaining_drops_executed_steps() {
        let registry = registry();
        let plan = two_step_plan(&registry);
        let state = WorldState::from_iter([("hasImage", true)]);

        let rest = plan.remaining(&state, 1);
        assert_eq!(rest.action_ids(), vec!["classify"]);
        assert_eq!(rest.start, state);
        assert_eq!(rest.total_cost, 2.0);
        assert_eq!(rest.steps[0].cumulative_cost, 2.0);
        assert!(rest.is_valid_from(&registry, &rest.start, 0));
    }

    #[test]
    fn test_fingerprint_is_stable() {
        let registry = registry();
        let a = two_step_plan(&registry);
        let b = two_step_plan(&registry);
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_eq!(a.fingerprint().len(), 64);

        let mut c = a.clone();
        c.steps.pop();
        assert_ne!(a.fingerprint(), c.fingerprint());
    }
}
