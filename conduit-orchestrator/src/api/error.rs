//! API Error Handling
//!
//! Unified error types and conversion for API responses. Every rejected
//! request names the error kind next to the message.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};

use crate::service::execution::ExecutionError;
use crate::service::pipeline::PipelineError;
use crate::service::trigger::RegistryError;

/// API error type; the `&'static str` is the error kind
#[derive(Debug)]
pub enum ApiError {
    NotFound(&'static str, String),
    BadRequest(&'static str, String),
    Conflict(&'static str, String),
    InternalError(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, kind, message) = match self {
            ApiError::NotFound(kind, msg) => (StatusCode::NOT_FOUND, kind, msg),
            ApiError::BadRequest(kind, msg) => (StatusCode::BAD_REQUEST, kind, msg),
            ApiError::Conflict(kind, msg) => (StatusCode::CONFLICT, kind, msg),
            ApiError::InternalError(msg) => {
                tracing::error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal",
                    "Internal server error".to_string(),
                )
            }
        };

        (
            status,
            Json(serde_json::json!({ "error": message, "kind": kind })),
        )
            .into_response()
    }
}

impl From<RegistryError> for ApiError {
    fn from(err: RegistryError) -> Self {
        let message = err.to_string();
        match err {
            RegistryError::InvalidTriggerType(_) => {
                ApiError::BadRequest("InvalidTriggerType", message)
            }
            RegistryError::InvalidPayload(_) => ApiError::BadRequest("InvalidPayload", message),
            RegistryError::ValidationError(_) => ApiError::BadRequest("ValidationError", message),
            RegistryError::DuplicateTrigger(_) => ApiError::Conflict("DuplicateTrigger", message),
            RegistryError::NotFound(_) => ApiError::NotFound("NotFound", message),
            RegistryError::Dispatch(err) => err.into(),
            RegistryError::Store(err) => ApiError::InternalError(err.to_string()),
        }
    }
}

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        let message = err.to_string();
        match err {
            PipelineError::NotFound(_) => ApiError::NotFound("NotFound", message),
            PipelineError::ValidationError(_) => ApiError::BadRequest("ValidationError", message),
            PipelineError::MalformedTask(_) => ApiError::BadRequest("MalformedTask", message),
            PipelineError::Duplicate(_) => ApiError::Conflict("DuplicatePipeline", message),
            PipelineError::InUse { .. } => ApiError::Conflict("PipelineInUse", message),
            PipelineError::Store(err) => ApiError::InternalError(err.to_string()),
        }
    }
}

impl From<ExecutionError> for ApiError {
    fn from(err: ExecutionError) -> Self {
        let message = err.to_string();
        match err {
            ExecutionError::PipelineNotFound { .. }
            | ExecutionError::NoExecutions(_)
            | ExecutionError::NotFound(_) => ApiError::NotFound("NotFound", message),
            ExecutionError::MalformedTask(_) => ApiError::BadRequest("MalformedTask", message),
            ExecutionError::Store(err) => ApiError::InternalError(err.to_string()),
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
