//! Pipeline Service
//!
//! Business logic for pipeline management. Pipelines are the targets of
//! triggers, so a pipeline still referenced by a trigger cannot be deleted.

use std::sync::Arc;

use conduit_core::domain::pipeline::Pipeline;
use conduit_core::dto::pipeline::CreatePipeline;
use conduit_core::error::TaskError;
use conduit_runner::Runner;
use thiserror::Error;

use crate::repository::{PipelineStore, StoreError, TriggerStore};

/// Service error type
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("pipeline {0} not found")]
    NotFound(String),

    #[error("{0}")]
    ValidationError(String),

    #[error(transparent)]
    MalformedTask(#[from] TaskError),

    #[error("pipeline {0} already exists")]
    Duplicate(String),

    #[error("pipeline {name} is used by {triggers} trigger(s)")]
    InUse { name: String, triggers: usize },

    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for PipelineError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Duplicate(what) => PipelineError::Duplicate(what),
            other => PipelineError::Store(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;

#[derive(Clone)]
pub struct PipelineService {
    pipelines: Arc<dyn PipelineStore>,
    triggers: Arc<dyn TriggerStore>,
    runner: Arc<Runner>,
}

impl PipelineService {
    pub fn new(
        pipelines: Arc<dyn PipelineStore>,
        triggers: Arc<dyn TriggerStore>,
        runner: Arc<Runner>,
    ) -> Self {
        Self {
            pipelines,
            triggers,
            runner,
        }
    }

    /// Create a new pipeline
    pub async fn create_pipeline(&self, account_id: &str, req: CreatePipeline) -> Result<Pipeline> {
        validate_pipeline_request(&req)?;

        let pipeline = Pipeline {
            account_id: account_id.to_string(),
            name: req.name.trim().to_string(),
            description: req.description,
            policy: req.policy,
            timeout_seconds: req.timeout_seconds,
            tasks: req.tasks,
            created_at: chrono::Utc::now(),
        };

        pipeline.validate_tasks()?;
        // operations must exist on this runner
        for entry in &pipeline.tasks {
            self.runner.validate(&entry.task)?;
        }

        self.pipelines.create(&pipeline).await?;

        tracing::info!(
            "Pipeline created: {}/{} ({} task(s))",
            account_id,
            pipeline.name,
            pipeline.tasks.len()
        );

        Ok(pipeline)
    }

    /// Get a pipeline by name
    pub async fn get_pipeline(&self, account_id: &str, name: &str) -> Result<Pipeline> {
        self.pipelines
            .find(account_id, name)
            .await?
            .ok_or_else(|| PipelineError::NotFound(format!("{account_id}/{name}")))
    }

    /// List the pipelines of an account
    pub async fn list_pipelines(&self, account_id: &str) -> Result<Vec<Pipeline>> {
        Ok(self.pipelines.list(account_id).await?)
    }

    /// Delete a pipeline no trigger points at
    pub async fn delete_pipeline(&self, account_id: &str, name: &str) -> Result<()> {
        let triggers = self.triggers.list_for_pipeline(account_id, name).await?;
        if !triggers.is_empty() {
            return Err(PipelineError::InUse {
                name: name.to_string(),
                triggers: triggers.len(),
            });
        }

        if !self.pipelines.delete(account_id, name).await? {
            return Err(PipelineError::NotFound(format!("{account_id}/{name}")));
        }

        tracing::info!("Pipeline deleted: {}/{}", account_id, name);

        Ok(())
    }
}

// =============================================================================
// Validation
// =============================================================================

fn validate_pipeline_request(req: &CreatePipeline) -> Result<()> {
    if req.name.trim().is_empty() {
        return Err(PipelineError::ValidationError(
            "Pipeline name cannot be empty".to_string(),
        ));
    }

    if req.name.len() > 255 {
        return Err(PipelineError::ValidationError(
            "Pipeline name is too long (max 255 characters)".to_string(),
        ));
    }

    if req.tasks.is_empty() {
        return Err(PipelineError::ValidationError(
            "Pipeline must declare at least one task".to_string(),
        ));
    }

    if req.timeout_seconds == Some(0) {
        return Err(PipelineError::ValidationError(
            "Pipeline timeout must be greater than 0".to_string(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::{MemoryPipelineStore, MemoryTriggerStore};
    use conduit_core::domain::pipeline::{ExecutionPolicy, PipelineTask};
    use conduit_core::domain::task::{Task, TaskBody};
    use conduit_core::domain::trigger::{Trigger, TriggerSpec, WebhookPayload};
    use conduit_runner::RunnerConfig;
    use serde_json::json;

    fn echo(id: u32) -> Task {
        Task::predefined(
            id,
            format!("echo-{id}"),
            "echo",
            json!({"message": "hi"}).as_object().cloned().unwrap(),
        )
    }

    fn request(name: &str, tasks: Vec<Task>) -> CreatePipeline {
        CreatePipeline {
            name: name.to_string(),
            description: None,
            policy: ExecutionPolicy::Sequential,
            timeout_seconds: None,
            tasks: tasks.into_iter().map(PipelineTask::required).collect(),
        }
    }

    fn service() -> (PipelineService, Arc<MemoryTriggerStore>) {
        let triggers = Arc::new(MemoryTriggerStore::new());
        let service = PipelineService::new(
            Arc::new(MemoryPipelineStore::new()),
            triggers.clone(),
            Arc::new(Runner::with_podman(RunnerConfig::default())),
        );
        (service, triggers)
    }

    #[test]
    fn test_validate_empty_name() {
        let result = validate_pipeline_request(&request("  ", vec![echo(1)]));
        assert!(matches!(result, Err(PipelineError::ValidationError(_))));
    }

    #[test]
    fn test_validate_long_name() {
        let result = validate_pipeline_request(&request(&"p".repeat(256), vec![echo(1)]));
        assert!(matches!(result, Err(PipelineError::ValidationError(_))));
    }

    #[test]
    fn test_validate_no_tasks() {
        let result = validate_pipeline_request(&request("build", vec![]));
        assert!(matches!(result, Err(PipelineError::ValidationError(_))));
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let (service, _) = service();
        service
            .create_pipeline("u1", request("build", vec![echo(1), echo(2)]))
            .await
            .unwrap();

        let pipeline = service.get_pipeline("u1", "build").await.unwrap();
        assert_eq!(pipeline.tasks.len(), 2);
        assert!(matches!(
            service.get_pipeline("u2", "build").await,
            Err(PipelineError::NotFound(_))
        ));
        assert!(matches!(
            service
                .create_pipeline("u1", request("build", vec![echo(1)]))
                .await,
            Err(PipelineError::Duplicate(_))
        ));
    }

    #[tokio::test]
    async fn test_malformed_tasks_rejected() {
        let (service, _) = service();

        let duplicate_ids = request("dup", vec![echo(1), echo(1)]);
        assert!(matches!(
            service.create_pipeline("u1", duplicate_ids).await,
            Err(PipelineError::MalformedTask(_))
        ));

        let unknown_op = request(
            "mail",
            vec![Task::predefined(1, "mail", "send_email", TaskBody::new())],
        );
        assert!(matches!(
            service.create_pipeline("u1", unknown_op).await,
            Err(PipelineError::MalformedTask(_))
        ));

        let mut no_image = Task::custom(1, "build", "alpine", vec!["make".to_string()]);
        no_image.image = None;
        assert!(matches!(
            service.create_pipeline("u1", request("custom", vec![no_image])).await,
            Err(PipelineError::MalformedTask(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_refuses_referenced_pipeline() {
        let (service, triggers) = service();
        service
            .create_pipeline("u1", request("build", vec![echo(1)]))
            .await
            .unwrap();
        triggers
            .add(&Trigger {
                account_id: "u1".to_string(),
                name: "hook".to_string(),
                pipeline: "build".to_string(),
                spec: TriggerSpec::Webhook(WebhookPayload {}),
                created_at: chrono::Utc::now(),
            })
            .await
            .unwrap();

        assert!(matches!(
            service.delete_pipeline("u1", "build").await,
            Err(PipelineError::InUse { triggers: 1, .. })
        ));

        triggers.delete("u1", "build", "hook").await.unwrap();
        service.delete_pipeline("u1", "build").await.unwrap();
        assert!(matches!(
            service.delete_pipeline("u1", "build").await,
            Err(PipelineError::NotFound(_))
        ));
    }
}
