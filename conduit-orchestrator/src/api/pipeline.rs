//! Pipeline API Handlers
//!
//! HTTP endpoints for pipeline management.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use conduit_core::domain::pipeline::Pipeline;
use conduit_core::dto::pipeline::CreatePipeline;

use crate::api::AppState;
use crate::api::error::ApiResult;

/// POST /pipeline/{account}
/// Create a new pipeline
pub async fn create_pipeline(
    State(state): State<AppState>,
    Path(account_id): Path<String>,
    Json(req): Json<CreatePipeline>,
) -> ApiResult<(StatusCode, Json<Pipeline>)> {
    tracing::info!("Creating pipeline {} for account {}", req.name, account_id);

    let pipeline = state.pipelines.create_pipeline(&account_id, req).await?;
    Ok((StatusCode::CREATED, Json(pipeline)))
}

/// GET /pipeline/{account}
pub async fn list_pipelines(
    State(state): State<AppState>,
    Path(account_id): Path<String>,
) -> ApiResult<Json<Vec<Pipeline>>> {
    tracing::debug!("Listing pipelines of account {}", account_id);
    Ok(Json(state.pipelines.list_pipelines(&account_id).await?))
}

/// GET /pipeline/{account}/{name}
pub async fn get_pipeline(
    State(state): State<AppState>,
    Path((account_id, name)): Path<(String, String)>,
) -> ApiResult<Json<Pipeline>> {
    Ok(Json(state.pipelines.get_pipeline(&account_id, &name).await?))
}

/// DELETE /pipeline/{account}/{name}
pub async fn delete_pipeline(
    State(state): State<AppState>,
    Path((account_id, name)): Path<(String, String)>,
) -> ApiResult<StatusCode> {
    tracing::info!("Deleting pipeline {}/{}", account_id, name);

    state.pipelines.delete_pipeline(&account_id, &name).await?;
    Ok(StatusCode::NO_CONTENT)
}
