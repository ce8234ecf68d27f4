//! Replanning after failures and drift.

use std::sync::Arc;

use tracing::{info, warn};
use vigil_core::{Plan, Result, WorldState};
use vigil_planner::{AStarPlanner, PlanRequest, Planner};

/// Builds replan requests from the working state.
///
/// The action that just failed is excluded from that one search. Fallback
/// actions have their priority lowered by `fallback_boost` so they win ties.
#[derive(Clone)]
pub struct Replanner {
    planner: Arc<AStarPlanner>,
    fallback_boost: i64,
}

impl Replanner {
    pub fn new(planner: Arc<AStarPlanner>, fallback_boost: i64) -> Self {
        Self {
            planner,
            fallback_boost,
        }
    }

    /// The request a replan from `state` would run.
    pub fn request(&self, state: &WorldState, goal: &WorldState, failed: Option<&str>) -> PlanRequest {
        let mut request = PlanRequest::new(state.clone(), goal.clone());
        if let Some(id) = failed {
            request = request.exclude(id);
        }
        for id in self.planner.registry().fallback_ids() {
            request = request.adjust_priority(id, self.fallback_boost.saturating_neg());
        }
        request
    }

    /// Plan again from the working state.
    pub fn replan(&self, state: &WorldState, goal: &WorldState, failed: Option<&str>) -> Result<Plan> {
        let request = self.request(state, goal, failed);
        match self.planner.plan(&request) {
            Ok(plan) => {
                info!("Replanned: {:?} (cost {})", plan.action_ids(), plan.total_cost);
                Ok(plan)
            }
            Err(e) => {
                warn!("Replanning failed: {}", e);
                Err(e)
            }
        }
    }
}
