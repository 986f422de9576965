//! Trigger API Handlers
//!
//! HTTP endpoints for the trigger registry and the trigger catalog.

use std::collections::BTreeMap;

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use conduit_core::domain::catalog::{TriggerDefinition, TriggerSummary};
use conduit_core::domain::execution::Execution;
use conduit_core::domain::trigger::Trigger;
use conduit_core::dto::trigger::CreateTrigger;
use serde_json::Value;

use crate::api::AppState;
use crate::api::error::ApiResult;
use crate::engine::TriggerStatus;

// =============================================================================
// Catalog
// =============================================================================

/// GET /trigger/types
/// Available trigger kinds grouped by service
pub async fn list_trigger_types(
    State(state): State<AppState>,
) -> Json<BTreeMap<String, Vec<TriggerSummary>>> {
    Json(state.triggers.trigger_types())
}

/// GET /trigger/definition/{type}
pub async fn get_definition(
    State(state): State<AppState>,
    Path(trigger_type): Path<String>,
) -> ApiResult<Json<TriggerDefinition>> {
    Ok(Json(state.triggers.definition_for(&trigger_type)?))
}

// =============================================================================
// Registry
// =============================================================================

/// POST /trigger/{account}
/// Register a trigger
pub async fn add_trigger(
    State(state): State<AppState>,
    Path(account_id): Path<String>,
    Json(req): Json<CreateTrigger>,
) -> ApiResult<(StatusCode, Json<Trigger>)> {
    tracing::info!(
        "Adding {} trigger {} for account {}",
        req.trigger_type,
        req.name,
        account_id
    );

    let trigger = state.triggers.add_trigger(&account_id, req).await?;
    Ok((StatusCode::CREATED, Json(trigger)))
}

/// GET /trigger/{account}
pub async fn get_all_triggers(
    State(state): State<AppState>,
    Path(account_id): Path<String>,
) -> ApiResult<Json<Vec<Trigger>>> {
    tracing::debug!("Listing triggers of account {}", account_id);
    Ok(Json(state.triggers.get_all_triggers(&account_id).await?))
}

/// GET /trigger/{account}/type/{type}
pub async fn get_triggers_by_type(
    State(state): State<AppState>,
    Path((account_id, trigger_type)): Path<(String, String)>,
) -> ApiResult<Json<Vec<Trigger>>> {
    Ok(Json(
        state
            .triggers
            .get_triggers_by_type(&account_id, &trigger_type)
            .await?,
    ))
}

/// GET /trigger/{account}/pipeline/{pipeline}
/// Triggers of one pipeline keyed by name
pub async fn get_triggers_for_pipeline(
    State(state): State<AppState>,
    Path((account_id, pipeline)): Path<(String, String)>,
) -> ApiResult<Json<BTreeMap<String, Trigger>>> {
    Ok(Json(
        state
            .triggers
            .get_triggers_for_pipeline(&account_id, &pipeline)
            .await?,
    ))
}

/// DELETE /trigger/{account}/pipeline/{pipeline}/{name}
pub async fn delete_trigger(
    State(state): State<AppState>,
    Path((account_id, pipeline, name)): Path<(String, String, String)>,
) -> ApiResult<StatusCode> {
    tracing::info!("Deleting trigger {}/{} of pipeline {}", account_id, name, pipeline);

    state
        .triggers
        .delete_trigger(&account_id, &name, &pipeline)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

// =============================================================================
// Engine
// =============================================================================

/// GET /trigger/{account}/status
pub async fn get_trigger_status(
    State(state): State<AppState>,
    Path(account_id): Path<String>,
) -> Json<BTreeMap<String, TriggerStatus>> {
    Json(state.triggers.trigger_status(&account_id))
}

/// POST /trigger/{account}/signal/{name}
/// Fire a Webhook trigger; the request body becomes the run input
pub async fn signal_trigger(
    State(state): State<AppState>,
    Path((account_id, name)): Path<(String, String)>,
    body: Option<Json<Value>>,
) -> ApiResult<(StatusCode, Json<Execution>)> {
    let payload = body.map(|Json(v)| v).unwrap_or(Value::Null);
    let execution = state.triggers.signal(&account_id, &name, payload).await?;
    Ok((StatusCode::ACCEPTED, Json(execution)))
}

/// POST /trigger/{account}/resume
/// Restart the stored schedules of an account
pub async fn resume_schedules(
    State(state): State<AppState>,
    Path(account_id): Path<String>,
) -> ApiResult<Json<Value>> {
    let started = state.triggers.resume_schedules(&account_id).await?;
    Ok(Json(serde_json::json!({ "started": started })))
}
