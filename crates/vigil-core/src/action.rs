//! Agent descriptors: what an action requires, what it produces, and how the
//! planner should weigh it.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::state::{FactValue, Facts};

/// Role an agent plays in the clinical pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentRole {
    /// Accepts and validates an input image or case.
    Intake,
    /// Normalizes inputs before inference.
    Preprocessing,
    /// Vision classification.
    Classification,
    /// Safety calibration of classifier output.
    Calibration,
    /// Language-model reasoning and explanation.
    Reasoning,
    /// Produces the final report.
    Reporting,
}

impl fmt::Display for AgentRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AgentRole::Intake => "intake",
            AgentRole::Preprocessing => "preprocessing",
            AgentRole::Classification => "classification",
            AgentRole::Calibration => "calibration",
            AgentRole::Reasoning => "reasoning",
            AgentRole::Reporting => "reporting",
        };
        f.write_str(name)
    }
}

/// A registered action. Immutable once the registry is built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Action {
    /// Agent identifier, unique within the registry.
    pub id: String,

    /// Pipeline role.
    pub role: AgentRole,

    /// Facts that must hold before dispatch.
    pub preconditions: Facts,

    /// Facts written on success.
    pub effects: Facts,

    /// Edge weight used by the planner.
    pub base_cost: f64,

    /// Tie-break priority; lower values win.
    pub plan_priority: i64,

    /// Failure of a critical action triggers replanning instead of a skip.
    pub critical: bool,

    /// Fallback actions get a priority boost during replanning.
    pub fallback: bool,

    /// Per-action timeout override in milliseconds.
    pub timeout_ms: Option<u64>,

    /// Human-readable description.
    pub description: Option<String>,
}

impl Action {
    /// Start building an action.
    pub fn builder(id: impl Into<String>, role: AgentRole) -> ActionBuilder {
        ActionBuilder::new(id, role)
    }

    /// Every fact key this action reads or writes.
    pub fn fact_keys(&self) -> impl Iterator<Item = &String> {
        self.preconditions.keys().chain(self.effects.keys())
    }
}

/// Fluent builder for [`Action`].
#[derive(Debug)]
pub struct ActionBuilder {
    action: Action,
}

impl ActionBuilder {
    /// Create a builder with cost 1, priority 0, non-critical.
    pub fn new(id: impl Into<String>, role: AgentRole) -> Self {
        Self {
            action: Action {
                id: id.into(),
                role,
                preconditions: Facts::new(),
                effects: Facts::new(),
                base_cost: 1.0,
                plan_priority: 0,
                critical: false,
                fallback: false,
                timeout_ms: None,
                description: None,
            },
        }
    }

    /// Add a precondition.
    pub fn precondition(mut self, key: impl Into<String>, value: impl Into<FactValue>) -> Self {
        self.action.preconditions.insert(key.into(), value.into());
        self
    }

    /// Add an effect.
    pub fn effect(mut self, key: impl Into<String>, value: impl Into<FactValue>) -> Self {
        self.action.effects.insert(key.into(), value.into());
        self
    }

    /// Set the base cost.
    pub fn cost(mut self, cost: f64) -> Self {
        self.action.base_cost = cost;
        self
    }

    /// Set the planning priority.
    pub fn priority(mut self, priority: i64) -> Self {
        self.action.plan_priority = priority;
        self
    }

    /// Mark the action critical.
    pub fn critical(mut self) -> Self {
        self.action.critical = true;
        self
    }

    /// Mark the action as a replanning fallback.
    pub fn fallback(mut self) -> Self {
        self.action.fallback = true;
        self
    }

    /// Override the dispatch timeout.
    pub fn timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.action.timeout_ms = Some(timeout_ms);
        self
    }

    /// Set a description.
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.action.description = Some(description.into());
        self
    }

    /// Finish building.
    pub fn build(self) -> Action {
        self.action
    }
}
