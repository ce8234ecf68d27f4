//! The execution engine: planner, executor and event channel behind one API.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::info;
use uuid::Uuid;
use vigil_core::{ExecutionTrace, Plan, Registry, Result, StateDiff, VigilError, WorldState};
use vigil_planner::{AStarPlanner, PlanRequest, Planner};
use vigil_trace::{Counters, EventFilter, EventHub, EventSubscription, MetricsSnapshot};

use crate::agent::{Agent, AgentSet, CancellationToken};
use crate::config::RuntimeConfig;
use crate::executor::{DriftReport, Executor, RunControl};
use crate::replanner::Replanner;

/// Plans and executes against one registry.
///
/// The registry is fixed for the engine's lifetime. Runs are independent
/// tokio tasks; the only state they share is the event hub and counters.
pub struct Engine {
    registry: Arc<Registry>,
    planner: Arc<AStarPlanner>,
    replanner: Replanner,
    executor: Arc<Executor>,
    config: RuntimeConfig,
    hub: EventHub,
    counters: Arc<Counters>,
    shutdown: CancellationToken,
}

impl Engine {
    /// Start building an engine over `registry`.
    pub fn builder(registry: impl Into<Arc<Registry>>) -> EngineBuilder {
        EngineBuilder {
            registry: registry.into(),
            agents: AgentSet::new(),
            config: RuntimeConfig::default(),
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Plan from the registry's initial state.
    pub fn plan(&self, goal: &WorldState) -> Result<Plan> {
        self.plan_from(self.registry.initial_state(), goal)
    }

    /// Plan from an explicit start state.
    pub fn plan_from(&self, start: &WorldState, goal: &WorldState) -> Result<Plan> {
        self.planner
            .plan(&PlanRequest::new(start.clone(), goal.clone()))
    }

    /// Execute a plan on the current task. Never fails.
    pub async fn execute(&self, plan: Plan) -> ExecutionTrace {
        let control = RunControl::new(self.shutdown.child_token());
        self.executor.run(plan, control).await
    }

    /// Execute a plan on a background task.
    pub fn spawn(&self, plan: Plan) -> RunHandle {
        let run_id = Uuid::new_v4();
        let cancel = self.shutdown.child_token();
        let (drift_tx, drift_rx) = mpsc::unbounded_channel();
        let control = RunControl {
            run_id,
            cancel: cancel.clone(),
            drift: Some(drift_rx),
        };

        let executor = self.executor.clone();
        let task = tokio::spawn(async move { executor.run(plan, control).await });
        info!("Spawned run {}", run_id);

        RunHandle {
            controller: RunController {
                run_id,
                cancel,
                drift: drift_tx,
            },
            task,
        }
    }

    /// Check a plan that has not been dispatched yet: return `plan` if it
    /// still reaches its goal after `diff`, otherwise a new plan from the
    /// drifted start. Live runs answer through
    /// [`RunController::replan_if_needed`].
    pub fn replan_if_needed(&self, plan: &Plan, diff: &StateDiff) -> Result<Plan> {
        let state = plan.start.apply_diff(diff);
        if self.planner.validate_plan(plan, &state) {
            return Ok(plan.clone());
        }
        self.replanner.replan(&state, &plan.goal, None)
    }

    /// Subscribe to live trace events.
    pub async fn subscribe(&self, filter: EventFilter) -> EventSubscription {
        self.hub.subscribe(filter).await
    }

    pub fn hub(&self) -> &EventHub {
        &self.hub
    }

    /// Process-wide counters.
    pub fn metrics(&self) -> MetricsSnapshot {
        self.counters.snapshot()
    }

    /// Cancel every live run started by this engine.
    pub fn shutdown(&self) {
        info!("Engine shutting down");
        self.shutdown.cancel();
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}

/// Builder for [`Engine`].
pub struct EngineBuilder {
    registry: Arc<Registry>,
    agents: AgentSet,
    config: RuntimeConfig,
}

impl EngineBuilder {
    /// Bind an agent implementation to an action id.
    pub fn agent(mut self, action_id: impl Into<String>, agent: impl Agent + 'static) -> Self {
        self.agents.bind(action_id, agent);
        self
    }

    /// Replace all bindings.
    pub fn agents(mut self, agents: AgentSet) -> Self {
        self.agents = agents;
        self
    }

    pub fn config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    /// Validate bindings and build the engine.
    ///
    /// Every registered action needs an agent, and every agent needs a
    /// registered action.
    pub fn build(self) -> Result<Engine> {
        self.config.validate()?;

        if let Some(action) = self
            .registry
            .actions()
            .find(|action| !self.agents.contains(&action.id))
        {
            return Err(VigilError::UnboundAgent {
                id: action.id.clone(),
            });
        }
        let mut bound: Vec<&str> = self.agents.ids().collect();
        bound.sort_unstable();
        if let Some(id) = bound.into_iter().find(|id| self.registry.get(id).is_none()) {
            return Err(VigilError::UnknownAction { id: id.to_string() });
        }

        let planner = Arc::new(AStarPlanner::with_config(
            self.registry.clone(),
            self.config.planner.clone(),
        ));
        let replanner = Replanner::new(planner.clone(), self.config.fallback_priority_boost);
        let hub = EventHub::new(self.config.event_capacity);
        let counters = Arc::new(Counters::new());
        let executor = Arc::new(Executor::new(
            self.registry.clone(),
            self.agents,
            replanner.clone(),
            self.config.clone(),
            hub.clone(),
            counters.clone(),
        ));

        info!(
            "Engine ready: {} actions, max {} replans",
            self.registry.len(),
            self.config.max_replans
        );

        Ok(Engine {
            registry: self.registry,
            planner,
            replanner,
            executor,
            config: self.config,
            hub,
            counters,
            shutdown: CancellationToken::new(),
        })
    }
}

/// Cloneable control surface of a background run.
#[derive(Debug, Clone)]
pub struct RunController {
    run_id: Uuid,
    cancel: CancellationToken,
    drift: mpsc::UnboundedSender<DriftReport>,
}

impl RunController {
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Stop further dispatch and abandon the in-flight agent.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Report externally observed drift. Returns false once the run is over.
    pub fn report_drift(&self, diff: StateDiff) -> bool {
        self.drift.send(diff.into()).is_ok()
    }

    /// Report drift and wait for the plan the run continues on.
    ///
    /// The run applies the diff before its next dispatch, so a call made
    /// while an agent is in flight returns once that agent settles. The
    /// returned plan starts at the run's working state and holds only the
    /// steps not yet dispatched; it is a new plan when the drift invalidated
    /// the old one. Fails with the replanning error that stopped the run, or
    /// `RunAborted` if the run ended before applying the diff.
    pub async fn replan_if_needed(&self, diff: StateDiff) -> Result<Plan> {
        let ended = || VigilError::RunAborted {
            run_id: self.run_id.to_string(),
            message: "run ended before the drift was applied".to_string(),
        };
        let (report, reply) = DriftReport::with_reply(diff);
        self.drift.send(report).map_err(|_| ended())?;
        reply.await.map_err(|_| ended())?
    }
}

/// A background run.
pub struct RunHandle {
    controller: RunController,
    task: JoinHandle<ExecutionTrace>,
}

impl RunHandle {
    pub fn run_id(&self) -> Uuid {
        self.controller.run_id
    }

    pub fn cancel(&self) {
        self.controller.cancel();
    }

    pub fn report_drift(&self, diff: StateDiff) -> bool {
        self.controller.report_drift(diff)
    }

    pub async fn replan_if_needed(&self, diff: StateDiff) -> Result<Plan> {
        self.controller.replan_if_needed(diff).await
    }

    /// A control surface that outlives the handle.
    pub fn controller(&self) -> RunController {
        self.controller.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the trace.
    pub async fn join(self) -> Result<ExecutionTrace> {
        self.task.await.map_err(|e| VigilError::RunAborted {
            run_id: self.controller.run_id.to_string(),
            message: e.to_string(),
        })
    }
}
