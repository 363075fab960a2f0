// SPDX-License-Identifier: GPL-3.0-or-later
use axum::extract::State;
use axum::Json;
use serde::Serialize;
use tracing::info;
use utoipa::ToSchema;

use crate::ApiState;

#[derive(Debug, Serialize, ToSchema)]
pub struct SchedulerStateResponse {
    pub state: String,
}

fn current_state(state: &ApiState) -> Json<SchedulerStateResponse> {
    Json(SchedulerStateResponse {
        state: state.pause.state().describe(),
    })
}

/// Current scheduler pause state.
#[utoipa::path(
    get,
    path = "/api/v1/scheduler",
    responses(
        (status = 200, description = "Scheduler state", body = SchedulerStateResponse)
    ),
    tag = "scheduler"
)]
pub async fn scheduler_state(State(state): State<ApiState>) -> Json<SchedulerStateResponse> {
    current_state(&state)
}

/// Pause all scheduled tasks until an operator resumes.
#[utoipa::path(
    post,
    path = "/api/v1/scheduler/pause",
    responses(
        (status = 200, description = "Scheduler paused", body = SchedulerStateResponse)
    ),
    tag = "scheduler"
)]
pub async fn pause_scheduler(State(state): State<ApiState>) -> Json<SchedulerStateResponse> {
    info!(target: "api", "scheduler pause requested");
    state.pause.pause_user();
    current_state(&state)
}

/// Resume the scheduler, lifting any pause.
#[utoipa::path(
    post,
    path = "/api/v1/scheduler/resume",
    responses(
        (status = 200, description = "Scheduler resumed", body = SchedulerStateResponse)
    ),
    tag = "scheduler"
)]
pub async fn resume_scheduler(State(state): State<ApiState>) -> Json<SchedulerStateResponse> {
    info!(target: "api", "scheduler resume requested");
    state.pause.resume();
    current_state(&state)
}
