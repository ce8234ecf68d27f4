//! Run-scoped trace collector.
//!
//! The executor owns exactly one collector per run. Records and events are
//! only ever appended; [`TraceCollector::finish`] consumes the collector and
//! hands back the immutable [`ExecutionTrace`].

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info};
use uuid::Uuid;
use vigil_core::{
    AgentRecord, AgentStatus, DriftRecord, ExecutionTrace, Facts, Plan, ReplanReason, RunStatus,
    StateDiff, TraceEvent, WorldState,
};

use crate::metrics::Counters;
use crate::subscription::EventHub;

/// Accumulates the trace of a single run.
pub struct TraceCollector {
    run_id: Uuid,
    start_time: DateTime<Utc>,
    goal: WorldState,
    initial_state: WorldState,
    segment: u32,
    replans: u32,
    agents: Vec<AgentRecord>,
    events: Vec<TraceEvent>,
    drifts: Vec<DriftRecord>,
    /// Agent currently between `agent_start` and `agent_end`.
    in_flight: Option<(String, DateTime<Utc>)>,
    hub: Option<EventHub>,
    counters: Arc<Counters>,
}

impl TraceCollector {
    /// Open a trace for a new run.
    pub fn start(
        run_id: Uuid,
        goal: WorldState,
        initial_state: WorldState,
        hub: Option<EventHub>,
        counters: Arc<Counters>,
    ) -> Self {
        counters.record_run_started();
        Self {
            run_id,
            start_time: Utc::now(),
            goal,
            initial_state,
            segment: 0,
            replans: 0,
            agents: Vec::new(),
            events: Vec::new(),
            drifts: Vec::new(),
            in_flight: None,
            hub,
            counters,
        }
    }

    /// Run id of this trace.
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Current plan segment.
    pub fn segment(&self) -> u32 {
        self.segment
    }

    /// Replans recorded so far.
    pub fn replans(&self) -> u32 {
        self.replans
    }

    /// Agent records so far.
    pub fn records(&self) -> &[AgentRecord] {
        &self.agents
    }

    /// Events so far.
    pub fn events(&self) -> &[TraceEvent] {
        &self.events
    }

    /// Id of the agent that has started but not ended, if any.
    pub fn in_flight(&self) -> Option<&str> {
        self.in_flight.as_ref().map(|(id, _)| id.as_str())
    }

    fn emit(&mut self, event: TraceEvent) {
        if let Some(hub) = &self.hub {
            hub.publish(event.clone());
        }
        self.events.push(event);
    }

    /// A plan segment begins.
    pub fn plan_start(&mut self, plan: &Plan) {
        debug!(
            "Run {} segment {}: {:?}",
            self.run_id,
            self.segment,
            plan.action_ids()
        );
        self.emit(TraceEvent::PlanStart {
            run_id: self.run_id,
            segment: self.segment,
            steps: plan.steps.iter().map(|s| s.action_id.clone()).collect(),
            total_cost: plan.total_cost,
            timestamp: Utc::now(),
        });
    }

    /// An agent is about to be checked and dispatched.
    pub fn agent_start(&mut self, agent_id: &str, step: usize) {
        let now = Utc::now();
        self.in_flight = Some((agent_id.to_string(), now));
        self.emit(TraceEvent::AgentStart {
            run_id: self.run_id,
            agent_id: agent_id.to_string(),
            segment: self.segment,
            step,
            timestamp: now,
        });
    }

    /// Close the in-flight agent with a status.
    pub fn agent_end(
        &mut self,
        agent_id: &str,
        status: AgentStatus,
        logs: Vec<String>,
        applied_effects: Facts,
        warning: Option<String>,
    ) {
        let end_time = Utc::now();
        let start_time = match self.in_flight.take() {
            Some((id, started)) if id == agent_id => started,
            _ => end_time,
        };

        let record = AgentRecord {
            id: agent_id.to_string(),
            segment: self.segment,
            start_time,
            end_time,
            status,
            logs,
            applied_effects,
        };
        let duration_ms = record.duration_ms();
        self.agents.push(record);
        self.counters.record_agent(status);

        self.emit(TraceEvent::AgentEnd {
            run_id: self.run_id,
            agent_id: agent_id.to_string(),
            segment: self.segment,
            status,
            duration_ms,
            warning,
            timestamp: end_time,
        });
    }

    /// Record a replan attempt and open the next segment.
    pub fn replan(&mut self, reason: ReplanReason, failed_agent: Option<&str>) {
        self.replans += 1;
        self.segment += 1;
        self.counters.record_replan();
        self.emit(TraceEvent::Replan {
            run_id: self.run_id,
            attempt: self.replans,
            reason,
            failed_agent: failed_agent.map(str::to_string),
            timestamp: Utc::now(),
        });
    }

    /// Record externally observed drift.
    pub fn drift(&mut self, diff: StateDiff) {
        self.drifts.push(DriftRecord {
            after_records: self.agents.len(),
            diff,
            observed_at: Utc::now(),
        });
    }

    /// Close the trace.
    pub fn finish(mut self, status: RunStatus, final_state: WorldState) -> ExecutionTrace {
        let human_in_the_loop = status.requires_human();
        self.emit(TraceEvent::PlanEnd {
            run_id: self.run_id,
            status,
            human_in_the_loop,
            timestamp: Utc::now(),
        });

        let mut trace = ExecutionTrace {
            run_id: self.run_id,
            start_time: self.start_time,
            end_time: Utc::now(),
            status,
            human_in_the_loop,
            replans: self.replans,
            goal: self.goal,
            initial_world_state: self.initial_state,
            agents: self.agents,
            events: self.events,
            drifts: self.drifts,
            final_world_state: final_state,
            digest: String::new(),
        };
        trace.digest = trace.compute_digest();

        self.counters
            .record_run_finished(status, trace.duration_ms());
        info!(
            "Run {} finished: {} ({} agents, {} replans)",
            trace.run_id,
            status,
            trace.agents.len(),
            trace.replans
        );
        trace
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigil_core::{EventKind, FactValue};

    fn collector(hub: Option<EventHub>) -> TraceCollector {
        TraceCollector::start(
            Uuid::new_v4(),
            WorldState::from_iter([("hasResult", true)]),
            WorldState::new(),
            hub,
            Arc::new(Counters::new()),
        )
    }

    #[test]
    fn test_events_in_order() {
        let mut collector = collector(None);
        let plan = Plan::new(WorldState::new(), WorldState::new());

        collector.plan_start(&plan);
        collector.agent_start("intake", 0);
        let mut effects = Facts::new();
        effects.insert("hasImage".to_string(), FactValue::Bool(true));
        collector.agent_end("intake", AgentStatus::Success, vec!["ok".to_string()], effects, None);
        collector.replan(ReplanReason::AgentFailure, Some("classify"));

        let trace = collector.finish(RunStatus::Recovered, WorldState::new());
        let kinds: Vec<EventKind> = trace.events.iter().map(|e| e.kind()).collect();
        assert_eq!(
            kinds,
            vec![
                EventKind::PlanStart,
                EventKind::AgentStart,
                EventKind::AgentEnd,
                EventKind::Replan,
                EventKind::PlanEnd,
            ]
        );
        assert_eq!(trace.replans, 1);
        assert!(trace.end_time >= trace.start_time);
        assert!(trace.verify_digest());
    }

    #[test]
    fn test_replan_opens_segment() {
        let mut collector = collector(None);
        assert_eq!(collector.segment(), 0);
        collector.replan(ReplanReason::StateDrift, None);
        collector.agent_start("safetyCalibrate", 0);
        collector.agent_end("safetyCalibrate", AgentStatus::Success, vec![], Facts::new(), None);

        let trace = collector.finish(RunStatus::Recovered, WorldState::new());
        assert_eq!(trace.agents[0].segment, 1);
    }

    #[test]
    fn test_human_flag_on_unresolved() {
        let trace = collector(None).finish(RunStatus::ReplanLimitExceeded, WorldState::new());
        assert!(trace.human_in_the_loop);

        let trace = collector(None).finish(RunStatus::Cancelled, WorldState::new());
        assert!(!trace.human_in_the_loop);
    }

    #[tokio::test]
    async fn test_events_published_to_hub() {
        let hub = EventHub::new(16);
        let mut sub = hub.subscribe(Default::default()).await;
        let collector = collector(Some(hub));
        let run_id = collector.run_id();

        collector.finish(RunStatus::Completed, WorldState::new());
        let event = sub.next().await.unwrap();
        assert_eq!(event.kind(), EventKind::PlanEnd);
        assert_eq!(event.run_id(), run_id);
    }
}
