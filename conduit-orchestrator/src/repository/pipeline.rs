//! Pipeline Repository
//!
//! Handles all database operations related to pipelines.

use async_trait::async_trait;
use conduit_core::domain::pipeline::{ExecutionPolicy, Pipeline};
use sqlx::PgPool;

use super::{PipelineStore, StoreError, StoreResult};

pub struct PgPipelineStore {
    pool: PgPool,
}

impl PgPipelineStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PipelineStore for PgPipelineStore {
    async fn create(&self, pipeline: &Pipeline) -> StoreResult<()> {
        let tasks = serde_json::to_value(&pipeline.tasks)?;

        sqlx::query(
            r#"
            INSERT INTO pipelines (
                account_id, name, description, policy, timeout_seconds, tasks, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(&pipeline.account_id)
        .bind(&pipeline.name)
        .bind(&pipeline.description)
        .bind(policy_to_string(pipeline.policy))
        .bind(pipeline.timeout_seconds.map(|t| t as i64))
        .bind(tasks)
        .bind(pipeline.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            StoreError::from_insert(
                e,
                format!("pipeline {}/{}", pipeline.account_id, pipeline.name),
            )
        })?;

        Ok(())
    }

    async fn find(&self, account_id: &str, name: &str) -> StoreResult<Option<Pipeline>> {
        let row = sqlx::query_as::<_, PipelineRow>(
            r#"
            SELECT account_id, name, description, policy, timeout_seconds, tasks, created_at
            FROM pipelines
            WHERE account_id = $1 AND name = $2
            "#,
        )
        .bind(account_id)
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Pipeline::try_from).transpose()
    }

    async fn list(&self, account_id: &str) -> StoreResult<Vec<Pipeline>> {
        let rows = sqlx::query_as::<_, PipelineRow>(
            r#"
            SELECT account_id, name, description, policy, timeout_seconds, tasks, created_at
            FROM pipelines
            WHERE account_id = $1
            ORDER BY created_at DESC
            "#,
        )
        .bind(account_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Pipeline::try_from).collect()
    }

    async fn delete(&self, account_id: &str, name: &str) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM pipelines WHERE account_id = $1 AND name = $2")
            .bind(account_id)
            .bind(name)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct PipelineRow {
    account_id: String,
    name: String,
    description: Option<String>,
    policy: String,
    timeout_seconds: Option<i64>,
    tasks: serde_json::Value,
    created_at: chrono::DateTime<chrono::Utc>,
}

impl TryFrom<PipelineRow> for Pipeline {
    type Error = StoreError;

    fn try_from(row: PipelineRow) -> Result<Self, Self::Error> {
        Ok(Pipeline {
            account_id: row.account_id,
            name: row.name,
            description: row.description,
            policy: string_to_policy(&row.policy),
            timeout_seconds: row.timeout_seconds.map(|t| t as u64),
            tasks: serde_json::from_value(row.tasks)?,
            created_at: row.created_at,
        })
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

fn policy_to_string(policy: ExecutionPolicy) -> &'static str {
    match policy {
        ExecutionPolicy::Sequential => "Sequential",
        ExecutionPolicy::Parallel => "Parallel",
    }
}

fn string_to_policy(s: &str) -> ExecutionPolicy {
    match s {
        "Parallel" => ExecutionPolicy::Parallel,
        _ => ExecutionPolicy::Sequential,
    }
}
