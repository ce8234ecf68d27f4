//! API error responses.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;
use vigil_core::VigilError;

/// Errors returned by handlers.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Run {0} not found")]
    RunNotFound(Uuid),

    #[error("Run {0} has already finished")]
    RunFinished(Uuid),

    #[error(transparent)]
    Vigil(#[from] VigilError),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::RunNotFound(_) => StatusCode::NOT_FOUND,
            ApiError::RunFinished(_) => StatusCode::CONFLICT,
            ApiError::Vigil(
                VigilError::PlannerNoSolution { .. } | VigilError::ReplanLimitExceeded { .. },
            ) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Vigil(VigilError::RunAborted { .. }) => StatusCode::CONFLICT,
            ApiError::Vigil(
                VigilError::UnknownFact { .. }
                | VigilError::UnknownAction { .. }
                | VigilError::ManifestInvalid { .. }
                | VigilError::Serialization(_),
            ) => StatusCode::BAD_REQUEST,
            ApiError::Vigil(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            ApiError::RunNotFound(_) => "run_not_found",
            ApiError::RunFinished(_) => "run_finished",
            ApiError::Vigil(VigilError::PlannerNoSolution { .. }) => "planner_no_solution",
            ApiError::Vigil(VigilError::ReplanLimitExceeded { .. }) => "replan_limit_exceeded",
            ApiError::Vigil(VigilError::RunAborted { .. }) => "run_finished",
            ApiError::Vigil(_) => "runtime_error",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.code(),
            "message": self.to_string(),
        }));
        (self.status(), body).into_response()
    }
}
