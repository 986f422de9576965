//! Execution API Handlers

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use conduit_core::domain::execution::Execution;
use conduit_core::dto::execution::{ExecutionSummary, StartExecution};
use uuid::Uuid;

use crate::api::AppState;
use crate::api::error::{ApiError, ApiResult};

/// POST /execution/{account}/{pipeline}
/// Start a run by hand
pub async fn start_execution(
    State(state): State<AppState>,
    Path((account_id, pipeline)): Path<(String, String)>,
    body: Option<Json<StartExecution>>,
) -> ApiResult<(StatusCode, Json<Execution>)> {
    let req = body.map(|Json(req)| req).unwrap_or_default();
    tracing::info!("Starting pipeline {}/{} by hand", account_id, pipeline);

    let execution = state
        .executions
        .start_execution(&account_id, &pipeline, req.input)
        .await?;
    Ok((StatusCode::ACCEPTED, Json(execution)))
}

/// GET /execution/{account}
/// Most recent runs of an account, newest first
pub async fn get_executions(
    State(state): State<AppState>,
    Path(account_id): Path<String>,
) -> ApiResult<Json<Vec<ExecutionSummary>>> {
    let executions = state.executions.get_execution(&account_id).await?;
    Ok(Json(executions.iter().map(ExecutionSummary::from).collect()))
}

/// GET /execution/{account}/{id}
pub async fn get_execution(
    State(state): State<AppState>,
    Path((account_id, id)): Path<(String, String)>,
) -> ApiResult<Json<Execution>> {
    let id = Uuid::parse_str(&id).map_err(|_| {
        ApiError::BadRequest("ValidationError", format!("invalid execution id '{id}'"))
    })?;

    Ok(Json(
        state.executions.get_execution_by_id(&account_id, id).await?,
    ))
}
