//! Agent contract and built-in adapters.
//!
//! Agents are black boxes to the executor. They get a read-only snapshot of
//! the working state and a cancellation token, and report an outcome. Only
//! the executor applies effects.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use uuid::Uuid;
use vigil_core::{AgentRole, WorldState};

pub use tokio_util::sync::CancellationToken;

/// Everything an agent sees during one dispatch.
#[derive(Debug, Clone)]
pub struct AgentContext {
    pub run_id: Uuid,
    pub agent_id: String,
    pub role: AgentRole,

    /// Plan segment the dispatch belongs to.
    pub segment: u32,

    /// Snapshot of the working state at dispatch time.
    pub state: WorldState,

    /// Cancelled when the run is cancelled or the dispatch times out.
    pub cancellation: CancellationToken,
}

impl AgentContext {
    /// Check if the dispatch has been abandoned.
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }
}

/// What an agent reports back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentOutcome {
    pub success: bool,

    /// Free-form output, copied into the trace logs.
    #[serde(default)]
    pub output: serde_json::Value,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AgentOutcome {
    /// A successful outcome with output.
    pub fn success(output: impl Into<serde_json::Value>) -> Self {
        Self {
            success: true,
            output: output.into(),
            error: None,
        }
    }

    /// A failed outcome.
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            output: serde_json::Value::Null,
            error: Some(error.into()),
        }
    }

    /// Log lines for the trace record.
    pub fn log_lines(&self) -> Vec<String> {
        let mut logs = Vec::new();
        match &self.output {
            serde_json::Value::Null => {}
            serde_json::Value::String(text) => logs.push(text.clone()),
            other => logs.push(other.to_string()),
        }
        if let Some(error) = &self.error {
            logs.push(error.clone());
        }
        logs
    }
}

/// An agent implementation bound to a registered action.
#[async_trait]
pub trait Agent: Send + Sync {
    /// Perform the work. Must not assume effects are applied until it returns.
    async fn execute(&self, ctx: AgentContext) -> AgentOutcome;
}

/// Agent implementations keyed by action id.
#[derive(Clone, Default)]
pub struct AgentSet {
    agents: HashMap<String, Arc<dyn Agent>>,
}

impl AgentSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind an agent to an action id, replacing any previous binding.
    pub fn bind(&mut self, action_id: impl Into<String>, agent: impl Agent + 'static) {
        self.agents.insert(action_id.into(), Arc::new(agent));
    }

    /// Bind an already shared agent.
    pub fn bind_shared(&mut self, action_id: impl Into<String>, agent: Arc<dyn Agent>) {
        self.agents.insert(action_id.into(), agent);
    }

    /// Builder-style [`AgentSet::bind`].
    pub fn with(mut self, action_id: impl Into<String>, agent: impl Agent + 'static) -> Self {
        self.bind(action_id, agent);
        self
    }

    pub fn get(&self, action_id: &str) -> Option<Arc<dyn Agent>> {
        self.agents.get(action_id).cloned()
    }

    pub fn contains(&self, action_id: &str) -> bool {
        self.agents.contains_key(action_id)
    }

    /// Bound action ids.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.agents.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}

impl fmt::Debug for AgentSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut ids: Vec<&str> = self.ids().collect();
        ids.sort_unstable();
        f.debug_struct("AgentSet").field("agents", &ids).finish()
    }
}

/// Agent backed by a synchronous closure.
pub struct FnAgent<F> {
    func: F,
}

impl<F> FnAgent<F>
where
    F: Fn(&AgentContext) -> AgentOutcome + Send + Sync,
{
    pub fn new(func: F) -> Self {
        Self { func }
    }
}

#[async_trait]
impl<F> Agent for FnAgent<F>
where
    F: Fn(&AgentContext) -> AgentOutcome + Send + Sync,
{
    async fn execute(&self, ctx: AgentContext) -> AgentOutcome {
        (self.func)(&ctx)
    }
}

/// Agent that replays queued outcomes, then repeats a default one.
///
/// An optional delay is observed before each outcome; the delay stops early
/// if the dispatch is cancelled.
pub struct ScriptedAgent {
    queue: Mutex<VecDeque<AgentOutcome>>,
    default: AgentOutcome,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl ScriptedAgent {
    /// Always succeeds.
    pub fn succeeding() -> Self {
        Self::with_default(AgentOutcome::success("ok"))
    }

    /// Always fails with `error`.
    pub fn failing(error: impl Into<String>) -> Self {
        Self::with_default(AgentOutcome::failure(error))
    }

    /// Repeats `default` once the queue is empty.
    pub fn with_default(default: AgentOutcome) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            default,
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    /// Play `outcomes` first.
    pub fn then(mut self, outcomes: impl IntoIterator<Item = AgentOutcome>) -> Self {
        self.queue.get_mut().extend(outcomes);
        self
    }

    /// Wait before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Number of dispatches so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Agent for ScriptedAgent {
    async fn execute(&self, ctx: AgentContext) -> AgentOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if let Some(delay) = self.delay {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = ctx.cancellation.cancelled() => {
                    return AgentOutcome::failure("cancelled");
                }
            }
        }

        let next = self.queue.lock().await.pop_front();
        next.unwrap_or_else(|| self.default.clone())
    }
}

#[async_trait]
impl<A: Agent + ?Sized> Agent for Arc<A> {
    async fn execute(&self, ctx: AgentContext) -> AgentOutcome {
        (**self).execute(ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigil_core::FactValue;

    fn context() -> AgentContext {
        AgentContext {
            run_id: Uuid::new_v4(),
            agent_id: "classify".to_string(),
            role: AgentRole::Classification,
            segment: 0,
            state: WorldState::from_iter([("hasImage", true)]),
            cancellation: CancellationToken::new(),
        }
    }

    #[tokio::test]
    async fn test_scripted_agent_plays_queue_then_default() {
        let agent = ScriptedAgent::succeeding().then([AgentOutcome::failure("model unavailable")]);

        assert!(!agent.execute(context()).await.success);
        assert!(agent.execute(context()).await.success);
        assert!(agent.execute(context()).await.success);
        assert_eq!(agent.calls(), 3);
    }

    #[tokio::test]
    async fn test_scripted_delay_observes_cancellation() {
        let agent = ScriptedAgent::succeeding().with_delay(Duration::from_secs(30));
        let ctx = context();
        ctx.cancellation.cancel();

        let outcome = agent.execute(ctx).await;
        assert!(!outcome.success);
    }

    #[tokio::test]
    async fn test_fn_agent_reads_snapshot() {
        let agent = FnAgent::new(|ctx: &AgentContext| {
            if ctx.state.get("hasImage") == Some(&FactValue::Bool(true)) {
                AgentOutcome::success(serde_json::json!({ "label": "benign" }))
            } else {
                AgentOutcome::failure("no image")
            }
        });

        let outcome = agent.execute(context()).await;
        assert!(outcome.success);
        assert_eq!(outcome.log_lines(), vec![r#"{"label":"benign"}"#.to_string()]);
    }

    #[test]
    fn test_agent_set_binding() {
        let set = AgentSet::new()
            .with("intake", ScriptedAgent::succeeding())
            .with("classify", ScriptedAgent::failing("boom"));

        assert_eq!(set.len(), 2);
        assert!(set.contains("intake"));
        assert!(set.get("report").is_none());
    }

    #[test]
    fn test_outcome_log_lines() {
        assert_eq!(AgentOutcome::success("done").log_lines(), vec!["done"]);
        assert_eq!(AgentOutcome::failure("boom").log_lines(), vec!["boom"]);
        assert!(AgentOutcome::success(serde_json::Value::Null).log_lines().is_empty());
    }
}
