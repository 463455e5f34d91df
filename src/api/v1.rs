use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use validator::Validate;

use super::{error::ApiError, response::ApiResponse, AppState};
use crate::domain::{ControlPatch, PackState};
use crate::harness::HarnessReport;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/state", get(get_state))
        .route("/control", post(update_control))
        .route("/tests/run", post(run_tests))
        .route("/tests/report", get(get_report))
}

#[derive(Debug, Serialize)]
pub struct Accepted {
    pub queued: &'static str,
}

/// GET /api/v1/state - latest published pack snapshot
pub async fn get_state(State(state): State<AppState>) -> Result<ApiResponse<PackState>, ApiError> {
    state
        .hub
        .latest_state()
        .map(ApiResponse::success)
        .ok_or_else(|| ApiError::ServiceUnavailable("no telemetry published yet".to_string()))
}

/// GET /api/v1/tests/report - report of the last completed harness run
pub async fn get_report(State(state): State<AppState>) -> Result<ApiResponse<HarnessReport>, ApiError> {
    state
        .hub
        .last_report()
        .map(ApiResponse::success)
        .ok_or_else(|| ApiError::NotFound("no completed test run".to_string()))
}

/// POST /api/v1/control - same semantics as `UPDATE_CONTROL`
pub async fn update_control(
    State(state): State<AppState>,
    Json(patch): Json<ControlPatch>,
) -> Result<ApiResponse<Accepted>, ApiError> {
    patch.validate()?;
    state.session.update_control(patch)?;
    Ok(ApiResponse::accepted(Accepted {
        queued: "UPDATE_CONTROL",
    }))
}

/// POST /api/v1/tests/run - same semantics as `RUN_TESTS`; results arrive on `/ws`
pub async fn run_tests(State(state): State<AppState>) -> Result<ApiResponse<Accepted>, ApiError> {
    state.session.run_tests()?;
    Ok(ApiResponse::accepted(Accepted { queued: "RUN_TESTS" }))
}
