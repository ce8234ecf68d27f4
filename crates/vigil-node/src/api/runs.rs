//! Run endpoints.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;
use uuid::Uuid;
use vigil_core::{ExecutionTrace, Plan, StateDiff};

use crate::api::error::ApiError;
use crate::api::plan::{plan_for, PlanRequestBody, PlanResponse};
use crate::state::{AppState, RunRecord};

/// Response after submitting a run.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitRunResponse {
    pub run_id: Uuid,
    pub plan: Plan,
}

/// Summary of a run.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub run_id: Uuid,
    pub status: String,
    pub submitted_at: DateTime<Utc>,
    pub planned_steps: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub human_in_the_loop: Option<bool>,
}

/// A run with its trace once finished.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunResponse {
    #[serde(flatten)]
    pub summary: RunSummary,
    pub plan: Plan,
    pub trace: Option<ExecutionTrace>,
    pub error: Option<String>,
}

impl From<&RunRecord> for RunSummary {
    fn from(record: &RunRecord) -> Self {
        Self {
            run_id: record.run_id,
            status: record.status(),
            submitted_at: record.submitted_at,
            planned_steps: record.plan.len(),
            human_in_the_loop: record.trace.as_ref().map(|t| t.human_in_the_loop),
        }
    }
}

/// Plan and start a run.
pub async fn submit_run(
    State(state): State<AppState>,
    Json(req): Json<PlanRequestBody>,
) -> Result<(StatusCode, Json<SubmitRunResponse>), ApiError> {
    let plan = plan_for(&state, &req)?;
    let run_id = state.start_run(plan.clone()).await;
    info!("▶️ Run {} submitted ({} steps)", run_id, plan.len());

    Ok((StatusCode::CREATED, Json(SubmitRunResponse { run_id, plan })))
}

/// List all runs.
pub async fn list_runs(State(state): State<AppState>) -> Json<Vec<RunSummary>> {
    let runs = state.list_runs().await;
    Json(runs.iter().map(RunSummary::from).collect())
}

/// Get a run by ID.
pub async fn get_run(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<RunResponse>, ApiError> {
    let record = state.get_run(id).await.ok_or(ApiError::RunNotFound(id))?;

    Ok(Json(RunResponse {
        summary: RunSummary::from(&record),
        plan: record.plan,
        trace: record.trace,
        error: record.error,
    }))
}

/// Cancel a live run.
pub async fn cancel_run(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    let record = live_run(&state, id).await?;
    record.controller.cancel();
    info!("⏹️ Run {} cancel requested", id);
    Ok(StatusCode::ACCEPTED)
}

/// Report state drift to a live run.
pub async fn report_drift(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(diff): Json<StateDiff>,
) -> Result<StatusCode, ApiError> {
    let record = live_run(&state, id).await?;
    if !record.controller.report_drift(diff) {
        return Err(ApiError::RunFinished(id));
    }
    Ok(StatusCode::ACCEPTED)
}

/// Report drift to a live run and return the plan it continues on.
pub async fn replan_run(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(diff): Json<StateDiff>,
) -> Result<Json<PlanResponse>, ApiError> {
    let record = live_run(&state, id).await?;
    let plan = record.controller.replan_if_needed(diff).await?;
    info!("🔁 Run {} continues with {:?}", id, plan.action_ids());
    Ok(Json(plan.into()))
}

async fn live_run(state: &AppState, id: Uuid) -> Result<RunRecord, ApiError> {
    let record = state.get_run(id).await.ok_or(ApiError::RunNotFound(id))?;
    if record.is_finished() {
        return Err(ApiError::RunFinished(id));
    }
    Ok(record)
}
