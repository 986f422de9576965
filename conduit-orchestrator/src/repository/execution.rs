//! Execution Repository
//!
//! Executions are written once when the run starts and then replaced as
//! task results arrive. Results are stored as one JSONB array.

use async_trait::async_trait;
use conduit_core::domain::execution::{Execution, ExecutionStatus};
use sqlx::PgPool;
use uuid::Uuid;

use super::{ExecutionStore, StoreError, StoreResult};

pub struct PgExecutionStore {
    pool: PgPool,
}

impl PgExecutionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ExecutionStore for PgExecutionStore {
    async fn create(&self, execution: &Execution) -> StoreResult<()> {
        let results = serde_json::to_value(&execution.results)?;

        sqlx::query(
            r#"
            INSERT INTO executions (
                id, account_id, pipeline, status, input, results,
                started_at, finished_at, error
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(execution.id)
        .bind(&execution.account_id)
        .bind(&execution.pipeline)
        .bind(execution.status.as_str())
        .bind(&execution.input)
        .bind(results)
        .bind(execution.started_at)
        .bind(execution.finished_at)
        .bind(&execution.error)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::from_insert(e, format!("execution {}", execution.id)))?;

        Ok(())
    }

    async fn update(&self, execution: &Execution) -> StoreResult<()> {
        let results = serde_json::to_value(&execution.results)?;

        let result = sqlx::query(
            r#"
            UPDATE executions
            SET status = $1, results = $2, finished_at = $3, error = $4
            WHERE id = $5
            "#,
        )
        .bind(execution.status.as_str())
        .bind(results)
        .bind(execution.finished_at)
        .bind(&execution.error)
        .bind(execution.id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("execution {}", execution.id)));
        }

        Ok(())
    }

    async fn find(&self, account_id: &str, id: Uuid) -> StoreResult<Option<Execution>> {
        let row = sqlx::query_as::<_, ExecutionRow>(
            r#"
            SELECT id, account_id, pipeline, status, input, results,
                   started_at, finished_at, error
            FROM executions
            WHERE id = $1 AND account_id = $2
            "#,
        )
        .bind(id)
        .bind(account_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Execution::try_from).transpose()
    }

    async fn latest(&self, account_id: &str, limit: usize) -> StoreResult<Vec<Execution>> {
        let rows = sqlx::query_as::<_, ExecutionRow>(
            r#"
            SELECT id, account_id, pipeline, status, input, results,
                   started_at, finished_at, error
            FROM executions
            WHERE account_id = $1
            ORDER BY started_at DESC
            LIMIT $2
            "#,
        )
        .bind(account_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Execution::try_from).collect()
    }
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct ExecutionRow {
    id: Uuid,
    account_id: String,
    pipeline: String,
    status: String,
    input: serde_json::Value,
    results: serde_json::Value,
    started_at: chrono::DateTime<chrono::Utc>,
    finished_at: Option<chrono::DateTime<chrono::Utc>>,
    error: Option<String>,
}

impl TryFrom<ExecutionRow> for Execution {
    type Error = StoreError;

    fn try_from(row: ExecutionRow) -> Result<Self, Self::Error> {
        // An unknown status can only come from a newer schema; surface it as failed
        let status = ExecutionStatus::parse(&row.status).unwrap_or(ExecutionStatus::Failed);

        Ok(Execution {
            id: row.id,
            account_id: row.account_id,
            pipeline: row.pipeline,
            status,
            input: row.input,
            results: serde_json::from_value(row.results)?,
            started_at: row.started_at,
            finished_at: row.finished_at,
            error: row.error,
        })
    }
}
