//! Planner trait, configuration and requests.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use vigil_core::{Plan, Result, WorldState};

/// Configuration for the planner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    /// Maximum number of steps allowed in a plan.
    pub max_steps: usize,

    /// Maximum number of states to expand before giving up.
    pub max_states_explored: usize,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            max_steps: 64,
            max_states_explored: 10_000,
        }
    }
}

/// Input to a single search.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlanRequest {
    /// State to search from.
    pub start: WorldState,

    /// Facts the plan must establish.
    pub goal: WorldState,

    /// Action id -> delta added to its `plan_priority` for this search only.
    /// Negative deltas make an action win ties.
    pub priority_adjustments: BTreeMap<String, i64>,

    /// Actions the search may not use.
    pub excluded: BTreeSet<String>,
}

impl PlanRequest {
    /// Plan from `start` to `goal` with registry priorities.
    pub fn new(start: WorldState, goal: WorldState) -> Self {
        Self {
            start,
            goal,
            ..Default::default()
        }
    }

    /// Adjust an action's priority for this search.
    pub fn adjust_priority(mut self, action_id: impl Into<String>, delta: i64) -> Self {
        let adjustment = self.priority_adjustments.entry(action_id.into()).or_insert(0);
        *adjustment = adjustment.saturating_add(delta);
        self
    }

    /// Forbid an action for this search.
    pub fn exclude(mut self, action_id: impl Into<String>) -> Self {
        self.excluded.insert(action_id.into());
        self
    }
}

/// Trait for planning engines.
pub trait Planner: Send + Sync {
    /// Compute the lowest-cost plan for a request.
    ///
    /// Fails with `PlannerNoSolution` when no action sequence reaches the goal.
    fn plan(&self, request: &PlanRequest) -> Result<Plan>;

    /// Check whether a plan still reaches its goal from `current_state`.
    fn validate_plan(&self, plan: &Plan, current_state: &WorldState) -> bool;

    /// Get the planner configuration.
    fn config(&self) -> &PlannerConfig;

    /// Update the planner configuration.
    fn set_config(&mut self, config: PlannerConfig);
}
