//! Trace replay: rebuild the world-state timeline of a finished run.
//!
//! A trace carries its initial state, every applied effect set and every
//! drift diff, so the state after each agent can be recomputed without
//! running any agent again.

use serde::{Deserialize, Serialize};
use vigil_core::{AgentStatus, ExecutionTrace, WorldState};

/// World state right after one agent record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplayStep {
    /// Index of the record in `trace.agents`.
    pub index: usize,
    pub agent_id: String,
    pub segment: u32,
    pub status: AgentStatus,
    pub state: WorldState,
}

/// Reconstructed timeline of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Replay {
    pub initial_state: WorldState,
    pub steps: Vec<ReplayStep>,
    pub final_state: WorldState,
}

impl Replay {
    /// State after record `index`, or the initial state before any record.
    pub fn state_at(&self, index: Option<usize>) -> Option<&WorldState> {
        match index {
            None => Some(&self.initial_state),
            Some(i) => self.steps.get(i).map(|s| &s.state),
        }
    }

    /// Returns true if the replayed end state matches what the run recorded.
    pub fn matches(&self, trace: &ExecutionTrace) -> bool {
        self.final_state == trace.final_world_state
    }
}

/// Replay a trace from its initial state.
pub fn replay(trace: &ExecutionTrace) -> Replay {
    let mut state = trace.initial_world_state.clone();
    let mut drifts = trace.drifts.iter().peekable();
    let mut steps = Vec::with_capacity(trace.agents.len());

    for (index, record) in trace.agents.iter().enumerate() {
        while let Some(drift) = drifts.next_if(|d| d.after_records <= index) {
            state = state.apply_diff(&drift.diff);
        }
        state = state.overlay(&record.applied_effects);
        steps.push(ReplayStep {
            index,
            agent_id: record.id.clone(),
            segment: record.segment,
            status: record.status,
            state: state.clone(),
        });
    }
    for drift in drifts {
        state = state.apply_diff(&drift.diff);
    }

    Replay {
        initial_state: trace.initial_world_state.clone(),
        steps,
        final_state: state,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::TraceCollector;
    use crate::metrics::Counters;
    use std::sync::Arc;
    use uuid::Uuid;
    use vigil_core::{FactValue, Facts, RunStatus, StateDiff};

    fn effects(key: &str) -> Facts {
        let mut facts = Facts::new();
        facts.insert(key.to_string(), FactValue::Bool(true));
        facts
    }

    #[test]
    fn test_replay_rebuilds_timeline() {
        let mut collector = TraceCollector::start(
            Uuid::new_v4(),
            WorldState::from_iter([("hasResult", true)]),
            WorldState::new(),
            None,
            Arc::new(Counters::new()),
        );
        collector.agent_start("intake", 0);
        collector.agent_end("intake", AgentStatus::Success, vec![], effects("hasImage"), None);
        collector.agent_start("classify", 1);
        collector.agent_end("classify", AgentStatus::Failure, vec![], Facts::new(), None);
        collector.drift(StateDiff::set("consent", true));
        collector.agent_start("safetyCalibrate", 0);
        collector.agent_end("safetyCalibrate", AgentStatus::Success, vec![], effects("hasResult"), None);

        let final_state = WorldState::from_iter([
            ("consent", true),
            ("hasImage", true),
            ("hasResult", true),
        ]);
        let trace = collector.finish(RunStatus::Recovered, final_state);

        let replay = replay(&trace);
        assert!(replay.matches(&trace));
        assert_eq!(replay.steps.len(), 3);
        assert_eq!(
            replay.state_at(Some(1)),
            Some(&WorldState::from_iter([("hasImage", true)]))
        );
        assert!(replay.state_at(Some(2)).unwrap().contains("consent"));
        assert_eq!(replay.state_at(None), Some(&WorldState::new()));
    }
}
