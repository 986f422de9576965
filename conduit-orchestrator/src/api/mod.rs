//! API Module
//!
//! HTTP API layer for the orchestrator. Controllers stay thin: they parse
//! the request, call one service operation and map its error.

pub mod error;
pub mod execution;
pub mod health;
pub mod pipeline;
pub mod trigger;

use axum::{
    Router,
    routing::{delete, get, post},
};
use tower_http::trace::TraceLayer;

use crate::service::execution::ExecutionService;
use crate::service::pipeline::PipelineService;
use crate::service::trigger::TriggerService;

/// Services shared by every handler
#[derive(Clone)]
pub struct AppState {
    pub triggers: TriggerService,
    pub pipelines: PipelineService,
    pub executions: ExecutionService,
}

/// Create the main API router with all endpoints
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(health::health_check))
        // Trigger catalog
        .route("/trigger/types", get(trigger::list_trigger_types))
        .route("/trigger/definition/{type}", get(trigger::get_definition))
        // Trigger registry
        .route(
            "/trigger/{account}",
            post(trigger::add_trigger).get(trigger::get_all_triggers),
        )
        .route("/trigger/{account}/status", get(trigger::get_trigger_status))
        .route("/trigger/{account}/resume", post(trigger::resume_schedules))
        .route(
            "/trigger/{account}/type/{type}",
            get(trigger::get_triggers_by_type),
        )
        .route(
            "/trigger/{account}/pipeline/{pipeline}",
            get(trigger::get_triggers_for_pipeline),
        )
        .route(
            "/trigger/{account}/signal/{name}",
            post(trigger::signal_trigger),
        )
        .route(
            "/trigger/{account}/pipeline/{pipeline}/{name}",
            delete(trigger::delete_trigger),
        )
        // Pipeline endpoints
        .route(
            "/pipeline/{account}",
            post(pipeline::create_pipeline).get(pipeline::list_pipelines),
        )
        .route(
            "/pipeline/{account}/{name}",
            get(pipeline::get_pipeline).delete(pipeline::delete_pipeline),
        )
        // Execution endpoints; the last segment is a pipeline name on POST
        // and an execution id on GET
        .route("/execution/{account}", get(execution::get_executions))
        .route(
            "/execution/{account}/{target}",
            post(execution::start_execution).get(execution::get_execution),
        )
        // Add state and middleware
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{EngineSettings, ProviderSet, TriggerEngine};
    use crate::repository::{MemoryExecutionStore, MemoryPipelineStore, MemoryTriggerStore};
    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode};
    use conduit_core::domain::catalog::TriggerCatalog;
    use conduit_runner::{Runner, RunnerConfig};
    use serde_json::{Value, json};
    use std::sync::Arc;
    use tower::ServiceExt;

    fn app() -> (Router, TriggerEngine) {
        let triggers = Arc::new(MemoryTriggerStore::new());
        let pipelines = Arc::new(MemoryPipelineStore::new());
        let runner = Arc::new(Runner::with_podman(RunnerConfig::default()));

        let executions = ExecutionService::new(
            runner.clone(),
            pipelines.clone(),
            Arc::new(MemoryExecutionStore::new()),
            20,
        );
        let engine = TriggerEngine::new(
            Arc::new(executions.clone()),
            triggers.clone(),
            ProviderSet::new(),
            EngineSettings::default(),
        );
        let state = AppState {
            triggers: TriggerService::new(
                triggers.clone(),
                pipelines.clone(),
                Arc::new(TriggerCatalog::default()),
                engine.clone(),
            ),
            pipelines: PipelineService::new(pipelines, triggers, runner),
            executions,
        };
        (create_router(state), engine)
    }

    async fn send(
        app: &Router,
        method: &str,
        uri: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let request = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => request
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => request.body(Body::empty()).unwrap(),
        };

        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    fn echo_pipeline(name: &str) -> Value {
        json!({
            "name": name,
            "tasks": [
                {"task": {
                    "id": 1,
                    "name": "greet",
                    "type": "echo",
                    "isPredefined": true,
                    "body": {"message": "hi"}
                }}
            ]
        })
    }

    #[tokio::test]
    async fn test_health() {
        let (app, _) = app();
        let (status, _) = send(&app, "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_trigger_lifecycle() {
        let (app, engine) = app();

        let (status, _) = send(&app, "POST", "/pipeline/u1", Some(echo_pipeline("p1"))).await;
        assert_eq!(status, StatusCode::CREATED);

        let trigger = json!({
            "name": "daily",
            "type": "Schedule",
            "pipeline": "p1",
            "payload": {"intervalSeconds": 60}
        });
        let (status, body) = send(&app, "POST", "/trigger/u1", Some(trigger.clone())).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["name"], "daily");

        let (status, body) = send(&app, "POST", "/trigger/u1", Some(trigger)).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["kind"], "DuplicateTrigger");

        let (_, body) = send(&app, "GET", "/trigger/u1", None).await;
        assert_eq!(body.as_array().unwrap().len(), 1);

        let (_, body) = send(&app, "GET", "/trigger/u1/pipeline/p1", None).await;
        assert!(body.get("daily").is_some());

        let (_, body) = send(&app, "GET", "/trigger/u1/type/Schedule", None).await;
        assert_eq!(body.as_array().unwrap().len(), 1);

        let (_, body) = send(&app, "GET", "/trigger/u1/status", None).await;
        assert!(body.get("daily").is_some());

        // referenced pipelines cannot be deleted
        let (status, body) = send(&app, "DELETE", "/pipeline/u1/p1", None).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["kind"], "PipelineInUse");

        let (status, _) = send(&app, "DELETE", "/trigger/u1/pipeline/p1/daily", None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, body) = send(&app, "DELETE", "/trigger/u1/pipeline/p1/daily", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["kind"], "NotFound");

        engine.shutdown();
    }

    #[tokio::test]
    async fn test_delete_trigger_of_pipeline_named_like_a_route() {
        let (app, engine) = app();

        for pipeline in ["type", "pipeline", "signal", "status"] {
            let (status, _) =
                send(&app, "POST", "/pipeline/u1", Some(echo_pipeline(pipeline))).await;
            assert_eq!(status, StatusCode::CREATED);

            let hook = json!({
                "name": format!("on-{pipeline}"),
                "type": "Webhook",
                "pipeline": pipeline
            });
            let (status, _) = send(&app, "POST", "/trigger/u1", Some(hook)).await;
            assert_eq!(status, StatusCode::CREATED);

            let uri = format!("/trigger/u1/pipeline/{pipeline}/on-{pipeline}");
            let (status, _) = send(&app, "DELETE", &uri, None).await;
            assert_eq!(status, StatusCode::NO_CONTENT, "pipeline {pipeline}");
        }

        let (_, body) = send(&app, "GET", "/trigger/u1", None).await;
        assert!(body.as_array().unwrap().is_empty());
        engine.shutdown();
    }

    #[tokio::test]
    async fn test_rejections_name_the_kind() {
        let (app, _) = app();
        send(&app, "POST", "/pipeline/u1", Some(echo_pipeline("p1"))).await;

        let (status, body) = send(
            &app,
            "POST",
            "/trigger/u1",
            Some(json!({"name": "t", "type": "Telepathy", "pipeline": "p1"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["kind"], "InvalidTriggerType");

        let (status, body) = send(
            &app,
            "POST",
            "/trigger/u1",
            Some(json!({"name": "t", "type": "Schedule", "pipeline": "p1", "payload": {}})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["kind"], "InvalidPayload");

        let malformed = json!({
            "name": "bad",
            "tasks": [{"task": {
                "id": 1,
                "name": "mail",
                "type": "send_email",
                "isPredefined": true
            }}]
        });
        let (status, body) = send(&app, "POST", "/pipeline/u1", Some(malformed)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["kind"], "MalformedTask");

        let (status, _) = send(&app, "GET", "/trigger/definition/Telepathy", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_catalog_routes() {
        let (app, _) = app();

        let (status, body) = send(&app, "GET", "/trigger/types", None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.get("scheduler").is_some());

        let (status, body) = send(&app, "GET", "/trigger/definition/GithubCommit", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["service"], "github");
    }

    #[tokio::test]
    async fn test_manual_execution_and_lookup() {
        let (app, _) = app();
        send(&app, "POST", "/pipeline/u1", Some(echo_pipeline("p1"))).await;

        let (status, body) = send(&app, "GET", "/execution/u1", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["kind"], "NotFound");

        let start = json!({"input": {"n": 1}});
        let (status, body) = send(&app, "POST", "/execution/u1/p1", Some(start)).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        let id = body["id"].as_str().unwrap().to_string();

        let (status, body) = send(&app, "GET", &format!("/execution/u1/{id}"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["pipeline"], "p1");

        // runs are scoped to their account
        let (status, _) = send(&app, "GET", &format!("/execution/u2/{id}"), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = send(&app, "GET", "/execution/u1/not-a-uuid", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = send(&app, "GET", "/execution/u1", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_array().unwrap().len(), 1);

        let (status, _) = send(&app, "POST", "/execution/u1/missing", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_signal_route() {
        let (app, _) = app();
        send(&app, "POST", "/pipeline/u1", Some(echo_pipeline("p1"))).await;
        send(
            &app,
            "POST",
            "/trigger/u1",
            Some(json!({"name": "hook", "type": "Webhook", "pipeline": "p1"})),
        )
        .await;

        let signal = json!({"ref": "main"});
        let (status, body) = send(&app, "POST", "/trigger/u1/signal/hook", Some(signal)).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["input"]["ref"], "main");

        let (status, _) = send(&app, "POST", "/trigger/u1/signal/nope", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body) = send(&app, "POST", "/trigger/u1/resume", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["started"], 0);
    }
}
