//! Execution traces: the finished, read-only record of one run.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::event::TraceEvent;
use crate::plan::hex_encode;
use crate::state::{Facts, StateDiff, WorldState};

/// Outcome of one agent within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Success,
    Failure,
    Skipped,
    Timeout,
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AgentStatus::Success => "success",
            AgentStatus::Failure => "failure",
            AgentStatus::Skipped => "skipped",
            AgentStatus::Timeout => "timeout",
        };
        f.write_str(name)
    }
}

/// Terminal status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Goal reached without replanning.
    Completed,
    /// Goal reached after at least one replan.
    Recovered,
    /// Plan exhausted but skipped agents left the goal unsatisfied.
    Partial,
    /// A replan found no path to the goal.
    PlannerNoSolution,
    /// The run hit its replan limit.
    ReplanLimitExceeded,
    /// The run was cancelled externally.
    Cancelled,
}

impl RunStatus {
    /// Returns true if the goal was reached.
    pub fn is_success(&self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Recovered)
    }

    /// Returns true if the run ended on an unresolved failure that needs a
    /// human to look at it.
    pub fn requires_human(&self) -> bool {
        matches!(
            self,
            RunStatus::PlannerNoSolution | RunStatus::ReplanLimitExceeded
        )
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunStatus::Completed => "completed",
            RunStatus::Recovered => "recovered",
            RunStatus::Partial => "partial",
            RunStatus::PlannerNoSolution => "planner_no_solution",
            RunStatus::ReplanLimitExceeded => "replan_limit_exceeded",
            RunStatus::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// Record of one agent dispatch (or skip).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentRecord {
    pub id: String,

    /// Plan segment the agent ran in; replans open a new segment.
    pub segment: u32,

    pub start_time: DateTime<Utc>,

    pub end_time: DateTime<Utc>,

    pub status: AgentStatus,

    /// Agent output on success, error or skip reason otherwise.
    pub logs: Vec<String>,

    /// Effects written to the working state; empty unless `status` is success.
    #[serde(default)]
    pub applied_effects: Facts,
}

impl AgentRecord {
    /// Wall-clock duration of the record in milliseconds.
    pub fn duration_ms(&self) -> u64 {
        (self.end_time - self.start_time).num_milliseconds().max(0) as u64
    }
}

/// External state drift observed during a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriftRecord {
    /// Number of agent records that preceded the drift.
    pub after_records: usize,

    pub diff: StateDiff,

    pub observed_at: DateTime<Utc>,
}

/// Finished record of one `execute()` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionTrace {
    /// Unique per run.
    pub run_id: Uuid,

    pub start_time: DateTime<Utc>,

    pub end_time: DateTime<Utc>,

    pub status: RunStatus,

    /// Set when the run ended on an unresolved failure.
    pub human_in_the_loop: bool,

    /// Number of replans performed.
    pub replans: u32,

    pub goal: WorldState,

    pub initial_world_state: WorldState,

    pub agents: Vec<AgentRecord>,

    pub events: Vec<TraceEvent>,

    /// Drift applied to the working state, in observation order.
    #[serde(default)]
    pub drifts: Vec<DriftRecord>,

    pub final_world_state: WorldState,

    /// Merkle root over the agent records.
    pub digest: String,
}

impl ExecutionTrace {
    /// Merkle root of the agent records.
    pub fn compute_digest(&self) -> String {
        if self.agents.is_empty() {
            return "0".repeat(64);
        }

        let mut hashes: Vec<Vec<u8>> = self
            .agents
            .iter()
            .map(|record| {
                let json = serde_json::to_string(record).unwrap_or_default();
                let mut hasher = Sha256::new();
                hasher.update(json.as_bytes());
                hasher.finalize().to_vec()
            })
            .collect();

        while hashes.len() > 1 {
            hashes = hashes
                .chunks(2)
                .map(|pair| {
                    let mut hasher = Sha256::new();
                    hasher.update(&pair[0]);
                    // odd count: pair the last hash with itself
                    hasher.update(pair.get(1).unwrap_or(&pair[0]));
                    hasher.finalize().to_vec()
                })
                .collect();
        }

        hashes
            .first()
            .map(hex_encode)
            .unwrap_or_else(|| "0".repeat(64))
    }

    /// Verify the stored digest matches the records.
    pub fn verify_digest(&self) -> bool {
        self.digest == self.compute_digest()
    }

    /// Records with the given status.
    pub fn records_with_status(&self, status: AgentStatus) -> Vec<&AgentRecord> {
        self.agents.iter().filter(|r| r.status == status).collect()
    }

    /// Most recent record for an agent id.
    pub fn record(&self, agent_id: &str) -> Option<&AgentRecord> {
        self.agents.iter().rev().find(|r| r.id == agent_id)
    }

    /// Replan events in order.
    pub fn replan_events(&self) -> Vec<&TraceEvent> {
        self.events
            .iter()
            .filter(|e| matches!(e, TraceEvent::Replan { .. }))
            .collect()
    }

    /// Run latency in milliseconds.
    pub fn duration_ms(&self) -> u64 {
        (self.end_time - self.start_time).num_milliseconds().max(0) as u64
    }
}
