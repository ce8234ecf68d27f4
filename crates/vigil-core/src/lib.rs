//! # Vigil Core
//!
//! Core primitives for the Vigil goal-oriented action planning runtime.
//!
//! This crate provides the fundamental building blocks:
//! - [`WorldState`] - Immutable snapshot of named facts
//! - [`Action`] / [`Registry`] - The catalog of agents the planner may use
//! - [`Plan`] - Ordered action references with cumulative costs
//! - [`ExecutionTrace`] - Finished record of a run
//! - [`VigilError`] - Error taxonomy

pub mod action;
pub mod error;
pub mod event;
pub mod manifest;
pub mod plan;
pub mod registry;
pub mod state;
pub mod trace;

// Re-exports for convenience
pub use action::{Action, ActionBuilder, AgentRole};
pub use error::{Result, VigilError};
pub use event::{EventKind, ReplanReason, TraceEvent};
pub use manifest::{AgentEntry, Manifest};
pub use plan::{Plan, PlanStep};
pub use registry::{Registry, RegistryBuilder};
pub use state::{apply_effects, satisfies, FactValue, Facts, StateDiff, WorldState};
pub use trace::{AgentRecord, AgentStatus, DriftRecord, ExecutionTrace, RunStatus};

/// Prelude module for common imports
pub mod prelude {
    pub use crate::action::{Action, AgentRole};
    pub use crate::error::{Result, VigilError};
    pub use crate::event::{EventKind, ReplanReason, TraceEvent};
    pub use crate::plan::Plan;
    pub use crate::registry::Registry;
    pub use crate::state::{FactValue, StateDiff, WorldState};
    pub use crate::trace::{AgentStatus, ExecutionTrace, RunStatus};
}
