//! The closed set of events a run emits.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::trace::{AgentStatus, RunStatus};

/// Why a run replanned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplanReason {
    /// A critical action's preconditions failed at dispatch.
    PreconditionUnmet,
    /// A critical agent reported failure.
    AgentFailure,
    /// A critical agent exceeded its timeout.
    AgentTimeout,
    /// External drift invalidated the remaining plan.
    StateDrift,
}

impl fmt::Display for ReplanReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ReplanReason::PreconditionUnmet => "precondition_unmet",
            ReplanReason::AgentFailure => "agent_failure",
            ReplanReason::AgentTimeout => "agent_timeout",
            ReplanReason::StateDrift => "state_drift",
        };
        f.write_str(name)
    }
}

/// Event emitted during a run, in emission order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum TraceEvent {
    /// A plan segment begins.
    PlanStart {
        run_id: Uuid,
        segment: u32,
        steps: Vec<String>,
        total_cost: f64,
        timestamp: DateTime<Utc>,
    },
    /// An agent is about to be dispatched (or checked).
    AgentStart {
        run_id: Uuid,
        agent_id: String,
        segment: u32,
        step: usize,
        timestamp: DateTime<Utc>,
    },
    /// An agent finished with a status.
    AgentEnd {
        run_id: Uuid,
        agent_id: String,
        segment: u32,
        status: AgentStatus,
        duration_ms: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        warning: Option<String>,
        timestamp: DateTime<Utc>,
    },
    /// The run replanned from its working state.
    Replan {
        run_id: Uuid,
        attempt: u32,
        reason: ReplanReason,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        failed_agent: Option<String>,
        timestamp: DateTime<Utc>,
    },
    /// The run terminated.
    PlanEnd {
        run_id: Uuid,
        status: RunStatus,
        human_in_the_loop: bool,
        timestamp: DateTime<Utc>,
    },
}

/// Discriminant of [`TraceEvent`], used for subscription filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    PlanStart,
    AgentStart,
    AgentEnd,
    Replan,
    PlanEnd,
}

impl TraceEvent {
    /// Run this event belongs to.
    pub fn run_id(&self) -> Uuid {
        match self {
            TraceEvent::PlanStart { run_id, .. }
            | TraceEvent::AgentStart { run_id, .. }
            | TraceEvent::AgentEnd { run_id, .. }
            | TraceEvent::Replan { run_id, .. }
            | TraceEvent::PlanEnd { run_id, .. } => *run_id,
        }
    }

    /// Kind of this event.
    pub fn kind(&self) -> EventKind {
        match self {
            TraceEvent::PlanStart { .. } => EventKind::PlanStart,
            TraceEvent::AgentStart { .. } => EventKind::AgentStart,
            TraceEvent::AgentEnd { .. } => EventKind::AgentEnd,
            TraceEvent::Replan { .. } => EventKind::Replan,
            TraceEvent::PlanEnd { .. } => EventKind::PlanEnd,
        }
    }

    /// When the event was emitted.
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            TraceEvent::PlanStart { timestamp, .. }
            | TraceEvent::AgentStart { timestamp, .. }
            | TraceEvent::AgentEnd { timestamp, .. }
            | TraceEvent::Replan { timestamp, .. }
            | TraceEvent::PlanEnd { timestamp, .. } => *timestamp,
        }
    }
}
