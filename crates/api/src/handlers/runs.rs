use std::collections::BTreeMap;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::AppState;
use crate::error::ApiError;
use engine::{RunRequest, RunSnapshot, TriggerKind};

#[derive(Deserialize)]
pub struct QueueRunDto {
    #[serde(default = "default_triggered_by")]
    pub triggered_by: String,
    #[serde(default = "default_trigger_type")]
    pub trigger_type: TriggerKind,
    #[serde(default)]
    pub variables: BTreeMap<String, String>,
}

fn default_triggered_by() -> String {
    "api".into()
}

fn default_trigger_type() -> TriggerKind {
    TriggerKind::Api
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RunAccepted {
    pub run_id: Uuid,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StopResult {
    pub cancelled: bool,
}

pub async fn queue(
    Path(pipeline_id): Path<Uuid>,
    State(state): State<AppState>,
    Json(payload): Json<QueueRunDto>,
) -> Result<(StatusCode, Json<RunAccepted>), ApiError> {
    let request = RunRequest {
        pipeline_id,
        triggered_by: payload.triggered_by,
        trigger_type: payload.trigger_type,
        variables: payload.variables,
    };

    let run_id = state.orchestrator.queue_run(request).await?;
    Ok((StatusCode::ACCEPTED, Json(RunAccepted { run_id })))
}

pub async fn status(
    Path(run_id): Path<Uuid>,
    State(state): State<AppState>,
) -> Result<Json<RunSnapshot>, ApiError> {
    state
        .orchestrator
        .get_run_status(run_id)
        .map(Json)
        .ok_or(ApiError::RunNotFound(run_id))
}

pub async fn stop(
    Path(run_id): Path<Uuid>,
    State(state): State<AppState>,
) -> Result<Json<StopResult>, ApiError> {
    if state.orchestrator.get_run_status(run_id).is_none() {
        return Err(ApiError::RunNotFound(run_id));
    }

    let cancelled = state.orchestrator.stop_run(run_id).await?;
    Ok(Json(StopResult { cancelled }))
}
