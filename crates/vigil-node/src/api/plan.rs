//! Registry and planning endpoints.

use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use vigil_core::{Action, Plan, WorldState};

use crate::api::error::ApiError;
use crate::state::AppState;

/// The registered actions.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryResponse {
    pub initial_state: WorldState,
    pub actions: Vec<Action>,
}

/// Request to compute a plan.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanRequestBody {
    /// Facts the plan must establish.
    pub goal: WorldState,

    /// Start state; the registry's initial state when absent.
    #[serde(default)]
    pub start: Option<WorldState>,
}

/// A computed plan.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanResponse {
    pub plan: Plan,
    pub fingerprint: String,
}

impl From<Plan> for PlanResponse {
    fn from(plan: Plan) -> Self {
        let fingerprint = plan.fingerprint();
        Self { plan, fingerprint }
    }
}

/// List the registry.
pub async fn get_registry(State(state): State<AppState>) -> Json<RegistryResponse> {
    let registry = state.engine.registry();
    Json(RegistryResponse {
        initial_state: registry.initial_state().clone(),
        actions: registry.actions().cloned().collect(),
    })
}

/// Compute a plan without running it.
pub async fn create_plan(
    State(state): State<AppState>,
    Json(req): Json<PlanRequestBody>,
) -> Result<Json<PlanResponse>, ApiError> {
    let plan = plan_for(&state, &req)?;
    Ok(Json(plan.into()))
}

pub(crate) fn plan_for(state: &AppState, req: &PlanRequestBody) -> Result<Plan, ApiError> {
    let plan = match &req.start {
        Some(start) => state.engine.plan_from(start, &req.goal)?,
        None => state.engine.plan(&req.goal)?,
    };
    Ok(plan)
}
