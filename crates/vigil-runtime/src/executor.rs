//! Sequential plan execution.
//!
//! One run walks its plan step by step. Before each dispatch the executor
//! folds in reported drift, answers callers waiting on a replan decision, and
//! re-checks preconditions; agent dispatch is the
//! only suspension point and is bounded by a timeout and the run's
//! cancellation token. Nothing escapes [`Executor::run`]: every failure mode
//! ends up as a record in the returned trace.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};
use uuid::Uuid;
use vigil_core::state::missing_preconditions;
use vigil_core::{
    satisfies, Action, AgentStatus, ExecutionTrace, Facts, Plan, Registry, ReplanReason, Result,
    RunStatus, StateDiff, VigilError, WorldState,
};
use vigil_trace::{Counters, EventHub, TraceCollector};

use crate::agent::{AgentContext, AgentOutcome, AgentSet, CancellationToken};
use crate::config::RuntimeConfig;
use crate::replanner::Replanner;

/// Log line for an agent abandoned by cancellation.
pub const ABANDONED_LOG: &str = "abandoned: run cancelled";

/// Log line for a step skipped on unmet preconditions.
pub const PRECONDITION_LOG: &str = "precondition unmet";

/// Drift observed outside the run.
///
/// With a reply channel the run answers, before its next dispatch, with the
/// plan it continues on: the steps not yet dispatched, starting at the
/// working state.
pub struct DriftReport {
    pub diff: StateDiff,
    pub reply: Option<oneshot::Sender<Result<Plan>>>,
}

impl DriftReport {
    /// A report whose caller waits for the run's decision.
    pub fn with_reply(diff: StateDiff) -> (Self, oneshot::Receiver<Result<Plan>>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                diff,
                reply: Some(tx),
            },
            rx,
        )
    }
}

impl From<StateDiff> for DriftReport {
    fn from(diff: StateDiff) -> Self {
        Self { diff, reply: None }
    }
}

/// Per-run inputs besides the plan.
pub struct RunControl {
    pub run_id: Uuid,
    pub cancel: CancellationToken,
    pub drift: Option<mpsc::UnboundedReceiver<DriftReport>>,
}

impl RunControl {
    /// A fresh run without drift reporting.
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            cancel,
            drift: None,
        }
    }
}

/// How one dispatch ended.
enum Dispatch {
    Finished(AgentOutcome),
    Panicked(String),
    TimedOut(Duration),
    Cancelled,
}

/// What the loop does after a step.
enum Next {
    Advance,
    Continue(Plan),
    Stop(RunStatus),
    /// Replanning gave up.
    Halt(VigilError),
}

fn halt_status(error: &VigilError) -> RunStatus {
    match error {
        VigilError::ReplanLimitExceeded { .. } => RunStatus::ReplanLimitExceeded,
        _ => RunStatus::PlannerNoSolution,
    }
}

/// Runs plans against bound agents.
pub struct Executor {
    registry: Arc<Registry>,
    agents: AgentSet,
    replanner: Replanner,
    config: RuntimeConfig,
    hub: EventHub,
    counters: Arc<Counters>,
}

impl Executor {
    pub fn new(
        registry: Arc<Registry>,
        agents: AgentSet,
        replanner: Replanner,
        config: RuntimeConfig,
        hub: EventHub,
        counters: Arc<Counters>,
    ) -> Self {
        Self {
            registry,
            agents,
            replanner,
            config,
            hub,
            counters,
        }
    }

    /// Execute `plan` to completion. Never fails.
    pub async fn run(&self, plan: Plan, mut control: RunControl) -> ExecutionTrace {
        let run_id = control.run_id;
        let goal = plan.goal.clone();
        let mut state = plan.start.clone();
        let mut collector = TraceCollector::start(
            run_id,
            goal.clone(),
            state.clone(),
            Some(self.hub.clone()),
            self.counters.clone(),
        );

        info!("Run {} started: {:?}", run_id, plan.action_ids());
        collector.plan_start(&plan);

        let mut current = plan;
        let mut step = 0usize;

        let status = loop {
            if control.cancel.is_cancelled() {
                break RunStatus::Cancelled;
            }

            let (diff, replies) = drain_drift(&mut control.drift);
            let mut halted = None;
            if let Some(diff) = diff {
                debug!("Run {} observed drift: {:?}", run_id, diff);
                state = state.apply_diff(&diff);
                collector.drift(diff);
                if !current.is_valid_from(&self.registry, &state, step) {
                    match self.replan(&mut collector, &state, &goal, ReplanReason::StateDrift, None) {
                        Next::Continue(plan) => {
                            current = plan;
                            step = 0;
                        }
                        Next::Halt(error) => halted = Some(error),
                        Next::Advance | Next::Stop(_) => {}
                    }
                }
            }
            for reply in replies {
                let answer = match &halted {
                    Some(error) => Err(error.clone()),
                    None => Ok(current.remaining(&state, step)),
                };
                // The caller may have stopped waiting.
                let _ = reply.send(answer);
            }
            if let Some(error) = halted {
                break halt_status(&error);
            }

            let Some(action_id) = current.steps.get(step).map(|s| s.action_id.clone()) else {
                break if !state.satisfies_goal(&goal) {
                    RunStatus::Partial
                } else if collector.replans() > 0 {
                    RunStatus::Recovered
                } else {
                    RunStatus::Completed
                };
            };

            let next = match self.registry.get(&action_id) {
                Some(action) => {
                    self.step(&mut collector, &mut state, &goal, action, step, &control.cancel)
                        .await
                }
                None => {
                    // Plans handed in from outside may name actions the registry lacks.
                    collector.agent_start(&action_id, step);
                    collector.agent_end(
                        &action_id,
                        AgentStatus::Failure,
                        vec![format!("unknown action {}", action_id)],
                        Facts::new(),
                        None,
                    );
                    self.replan(
                        &mut collector,
                        &state,
                        &goal,
                        ReplanReason::AgentFailure,
                        Some(&action_id),
                    )
                }
            };

            match next {
                Next::Advance => step += 1,
                Next::Continue(plan) => {
                    current = plan;
                    step = 0;
                }
                Next::Stop(status) => break status,
                Next::Halt(error) => break halt_status(&error),
            }
        };

        if status.requires_human() {
            error!("Run {} needs human review: {}", run_id, status);
        }
        collector.finish(status, state)
    }

    /// Check, dispatch and record one plan step.
    async fn step(
        &self,
        collector: &mut TraceCollector,
        state: &mut WorldState,
        goal: &WorldState,
        action: &Action,
        step: usize,
        cancel: &CancellationToken,
    ) -> Next {
        collector.agent_start(&action.id, step);

        if !satisfies(state, &action.preconditions) {
            let missing = missing_preconditions(state, action);
            let warning = format!("{}: {}", PRECONDITION_LOG, missing.join(", "));
            collector.agent_end(
                &action.id,
                AgentStatus::Skipped,
                vec![PRECONDITION_LOG.to_string()],
                Facts::new(),
                Some(warning.clone()),
            );
            if action.critical {
                return self.replan(collector, state, goal, ReplanReason::PreconditionUnmet, None);
            }
            warn!("Skipping {}: {}", action.id, warning);
            return Next::Advance;
        }

        let dispatch = self.dispatch(collector, state, action, cancel).await;
        match dispatch {
            Dispatch::Finished(outcome) if outcome.success => {
                *state = state.overlay(&action.effects);
                collector.agent_end(
                    &action.id,
                    AgentStatus::Success,
                    outcome.log_lines(),
                    action.effects.clone(),
                    None,
                );
                Next::Advance
            }
            Dispatch::Finished(outcome) => {
                let mut logs = outcome.log_lines();
                if logs.is_empty() {
                    logs.push("agent reported failure".to_string());
                }
                let error = VigilError::AgentFailure {
                    agent_id: action.id.clone(),
                    message: outcome.error.unwrap_or_else(|| "agent reported failure".to_string()),
                };
                self.failed(collector, state, goal, action, error, logs)
            }
            Dispatch::Panicked(message) => {
                let logs = vec![format!("agent panicked: {}", message)];
                let error = VigilError::AgentFailure {
                    agent_id: action.id.clone(),
                    message: format!("panicked: {}", message),
                };
                self.failed(collector, state, goal, action, error, logs)
            }
            Dispatch::TimedOut(timeout) => {
                let timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
                let logs = vec![format!("timed out after {}ms", timeout_ms)];
                let error = VigilError::AgentTimeout {
                    agent_id: action.id.clone(),
                    timeout_ms,
                };
                self.failed(collector, state, goal, action, error, logs)
            }
            Dispatch::Cancelled => {
                collector.agent_end(
                    &action.id,
                    AgentStatus::Timeout,
                    vec![ABANDONED_LOG.to_string()],
                    Facts::new(),
                    None,
                );
                Next::Stop(RunStatus::Cancelled)
            }
        }
    }

    /// Run the bound agent under its timeout, racing the run's cancellation.
    async fn dispatch(
        &self,
        collector: &TraceCollector,
        state: &WorldState,
        action: &Action,
        cancel: &CancellationToken,
    ) -> Dispatch {
        let Some(agent) = self.agents.get(&action.id) else {
            return Dispatch::Finished(AgentOutcome::failure(format!(
                "no agent bound for {}",
                action.id
            )));
        };

        let token = cancel.child_token();
        let ctx = AgentContext {
            run_id: collector.run_id(),
            agent_id: action.id.clone(),
            role: action.role,
            segment: collector.segment(),
            state: state.clone(),
            cancellation: token.clone(),
        };
        let timeout = self.config.timeout_for(action);

        debug!("Dispatching {} (timeout {:?})", action.id, timeout);
        let handle = tokio::spawn(async move { agent.execute(ctx).await });
        let abort = handle.abort_handle();

        let dispatch = tokio::select! {
            _ = cancel.cancelled() => Dispatch::Cancelled,
            joined = tokio::time::timeout(timeout, handle) => match joined {
                Err(_) => Dispatch::TimedOut(timeout),
                Ok(Err(join_error)) => Dispatch::Panicked(join_error.to_string()),
                Ok(Ok(outcome)) => Dispatch::Finished(outcome),
            },
        };

        if !matches!(dispatch, Dispatch::Finished(_)) {
            token.cancel();
            abort.abort();
        }
        dispatch
    }

    /// Record a failure or timeout, then replan if the action is critical.
    fn failed(
        &self,
        collector: &mut TraceCollector,
        state: &WorldState,
        goal: &WorldState,
        action: &Action,
        error: VigilError,
        logs: Vec<String>,
    ) -> Next {
        let (status, reason) = match error {
            VigilError::AgentTimeout { .. } => (AgentStatus::Timeout, ReplanReason::AgentTimeout),
            _ => (AgentStatus::Failure, ReplanReason::AgentFailure),
        };

        if action.critical {
            warn!("Run {}: {}", collector.run_id(), error);
            collector.agent_end(&action.id, status, logs, Facts::new(), None);
            return self.replan(collector, state, goal, reason, Some(&action.id));
        }

        let warning = format!("non-critical: {}", error);
        warn!("Continuing past {}: {}", action.id, warning);
        collector.agent_end(&action.id, status, logs, Facts::new(), Some(warning));
        Next::Advance
    }

    /// Open a new segment, or stop when replanning is exhausted.
    fn replan(
        &self,
        collector: &mut TraceCollector,
        state: &WorldState,
        goal: &WorldState,
        reason: ReplanReason,
        failed: Option<&str>,
    ) -> Next {
        if collector.replans() >= self.config.max_replans {
            let error = VigilError::ReplanLimitExceeded {
                limit: self.config.max_replans,
            };
            error!("Run {}: {} ({})", collector.run_id(), error, reason);
            return Next::Halt(error);
        }

        warn!(
            "Run {}: replanning ({}) after {}",
            collector.run_id(),
            reason,
            failed.unwrap_or("state change")
        );
        collector.replan(reason, failed);

        match self.replanner.replan(state, goal, failed) {
            Ok(plan) => {
                collector.plan_start(&plan);
                Next::Continue(plan)
            }
            Err(e) => {
                error!("Run {}: {}", collector.run_id(), e);
                Next::Halt(e)
            }
        }
    }
}

/// Replies waiting on the run's next decision.
type Replies = Vec<oneshot::Sender<Result<Plan>>>;

/// Merge every pending drift report into one diff and collect the replies
/// waiting on it.
fn drain_drift(drift: &mut Option<mpsc::UnboundedReceiver<DriftReport>>) -> (Option<StateDiff>, Replies) {
    let mut replies = Replies::new();
    let Some(receiver) = drift.as_mut() else {
        return (None, replies);
    };
    let mut merged: Option<StateDiff> = None;
    while let Ok(DriftReport { diff, reply }) = receiver.try_recv() {
        replies.extend(reply);
        merged = Some(match merged {
            None => diff,
            Some(mut acc) => {
                for key in &diff.unset {
                    acc.set.remove(key);
                    acc.unset.insert(key.clone());
                }
                for (key, value) in diff.set {
                    acc.unset.remove(&key);
                    acc.set.insert(key, value);
                }
                acc
            }
        });
    }
    (merged.filter(|diff| !diff.is_empty()), replies)
}
