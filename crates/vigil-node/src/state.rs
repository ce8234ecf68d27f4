//! Application state.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::{debug, error, info};
use uuid::Uuid;
use vigil_core::{ExecutionTrace, Plan};
use vigil_runtime::{Engine, RunController};

/// Finished runs kept when `VIGIL_RUN_RETENTION` is not set.
pub const DEFAULT_RUN_RETENTION: usize = 1000;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// The execution engine.
    pub engine: Arc<Engine>,

    /// Runs submitted through the API.
    pub runs: Arc<RwLock<HashMap<Uuid, RunRecord>>>,

    /// Finished runs kept; the oldest are dropped past this.
    pub retention: usize,
}

/// A submitted run and, once finished, its trace.
#[derive(Clone)]
pub struct RunRecord {
    pub run_id: Uuid,

    /// The plan the run started with.
    pub plan: Plan,

    pub submitted_at: DateTime<Utc>,

    /// Control surface while the run is live.
    pub controller: RunController,

    /// Set when the run finishes.
    pub trace: Option<ExecutionTrace>,

    /// Set if the run task died without a trace.
    pub error: Option<String>,
}

impl RunRecord {
    /// Check if the run has ended.
    pub fn is_finished(&self) -> bool {
        self.trace.is_some() || self.error.is_some()
    }

    /// `running`, `aborted`, or the final run status.
    pub fn status(&self) -> String {
        match (&self.trace, &self.error) {
            (Some(trace), _) => trace.status.to_string(),
            (None, Some(_)) => "aborted".to_string(),
            (None, None) => "running".to_string(),
        }
    }
}

impl AppState {
    /// Create a new application state.
    pub fn new(engine: Arc<Engine>) -> Self {
        Self {
            engine,
            runs: Arc::new(RwLock::new(HashMap::new())),
            retention: DEFAULT_RUN_RETENTION,
        }
    }

    /// Keep at most `retention` finished runs.
    pub fn with_retention(mut self, retention: usize) -> Self {
        self.retention = retention;
        self
    }

    /// Spawn a run and track it until it finishes.
    pub async fn start_run(&self, plan: Plan) -> Uuid {
        let handle = self.engine.spawn(plan.clone());
        let run_id = handle.run_id();

        let record = RunRecord {
            run_id,
            plan,
            submitted_at: Utc::now(),
            controller: handle.controller(),
            trace: None,
            error: None,
        };
        self.runs.write().await.insert(run_id, record);

        let runs = self.runs.clone();
        let retention = self.retention;
        tokio::spawn(async move {
            let result = handle.join().await;
            let mut runs = runs.write().await;
            let Some(record) = runs.get_mut(&run_id) else {
                return;
            };
            match result {
                Ok(trace) => {
                    info!("📦 Run {} stored: {}", run_id, trace.status);
                    record.trace = Some(trace);
                }
                Err(e) => {
                    error!("Run {} lost: {}", run_id, e);
                    record.error = Some(e.to_string());
                }
            }
            evict_finished(&mut runs, retention);
        });

        run_id
    }

    /// Get a run by ID.
    pub async fn get_run(&self, id: Uuid) -> Option<RunRecord> {
        self.runs.read().await.get(&id).cloned()
    }

    /// List all runs, oldest first.
    pub async fn list_runs(&self) -> Vec<RunRecord> {
        let mut runs: Vec<RunRecord> = self.runs.read().await.values().cloned().collect();
        runs.sort_by_key(|r| r.submitted_at);
        runs
    }
}

/// Drop the oldest finished runs beyond `retention`. Live runs stay.
fn evict_finished(runs: &mut HashMap<Uuid, RunRecord>, retention: usize) {
    let mut finished: Vec<(DateTime<Utc>, Uuid)> = runs
        .values()
        .filter(|r| r.is_finished())
        .map(|r| (r.submitted_at, r.run_id))
        .collect();
    if finished.len() <= retention {
        return;
    }

    finished.sort_unstable();
    let excess = finished.len() - retention;
    for (_, id) in finished.into_iter().take(excess) {
        runs.remove(&id);
        debug!("Evicted finished run {}", id);
    }
}
