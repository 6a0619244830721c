use axum::{
    extract::{Path, State},
    Json,
};
use engine::{RunOptions, RunResult};
use operators::Payload;
use serde::Deserialize;
use tracing::info;

use super::AppState;
use crate::ApiError;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ExecuteRequest {
    pub input: Payload,
    pub options: RunOptions,
}

/// Run a workflow to completion. Node failures are reported in the body;
/// only load-time problems produce an error status.
pub async fn execute(
    Path(name): Path<String>,
    State(state): State<AppState>,
    Json(request): Json<ExecuteRequest>,
) -> Result<Json<RunResult>, ApiError> {
    let result = state
        .engine
        .execute(&name, request.input, request.options)
        .await?;
    info!(workflow = %name, run_id = %result.run_id, status = %result.status, "execution finished");
    Ok(Json(result))
}
