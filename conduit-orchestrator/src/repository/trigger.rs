//! Trigger Repository
//!
//! Postgres-backed trigger rows. The kind is kept in its own column for
//! the by-type projection; the typed spec is stored as JSONB.

use async_trait::async_trait;
use conduit_core::domain::trigger::{Trigger, TriggerType};
use sqlx::PgPool;

use super::{StoreError, StoreResult, TriggerStore};

const SELECT_TRIGGER: &str = r#"
    SELECT account_id, name, pipeline, spec, created_at
    FROM triggers
"#;

pub struct PgTriggerStore {
    pool: PgPool,
}

impl PgTriggerStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TriggerStore for PgTriggerStore {
    async fn add(&self, trigger: &Trigger) -> StoreResult<()> {
        let spec = serde_json::to_value(&trigger.spec)?;

        sqlx::query(
            r#"
            INSERT INTO triggers (account_id, name, pipeline, trigger_type, spec, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(&trigger.account_id)
        .bind(&trigger.name)
        .bind(&trigger.pipeline)
        .bind(trigger.trigger_type().as_str())
        .bind(spec)
        .bind(trigger.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::from_insert(e, format!("trigger {}", trigger.key())))?;

        Ok(())
    }

    async fn delete(&self, account_id: &str, pipeline: &str, name: &str) -> StoreResult<Trigger> {
        let row = sqlx::query_as::<_, TriggerRow>(
            r#"
            DELETE FROM triggers
            WHERE account_id = $1 AND pipeline = $2 AND name = $3
            RETURNING account_id, name, pipeline, spec, created_at
            "#,
        )
        .bind(account_id)
        .bind(pipeline)
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Trigger::try_from(row),
            None => Err(StoreError::NotFound(format!("trigger {account_id}/{name}"))),
        }
    }

    async fn get(&self, account_id: &str, name: &str) -> StoreResult<Option<Trigger>> {
        let sql = format!("{SELECT_TRIGGER} WHERE account_id = $1 AND name = $2");
        let row = sqlx::query_as::<_, TriggerRow>(&sql)
            .bind(account_id)
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;

        row.map(Trigger::try_from).transpose()
    }

    async fn list_for_account(&self, account_id: &str) -> StoreResult<Vec<Trigger>> {
        let sql = format!("{SELECT_TRIGGER} WHERE account_id = $1 ORDER BY name");
        let rows = sqlx::query_as::<_, TriggerRow>(&sql)
            .bind(account_id)
            .fetch_all(&self.pool)
            .await?;

        into_triggers(rows)
    }

    async fn list_by_type(&self, account_id: &str, kind: TriggerType) -> StoreResult<Vec<Trigger>> {
        let sql =
            format!("{SELECT_TRIGGER} WHERE account_id = $1 AND trigger_type = $2 ORDER BY name");
        let rows = sqlx::query_as::<_, TriggerRow>(&sql)
            .bind(account_id)
            .bind(kind.as_str())
            .fetch_all(&self.pool)
            .await?;

        into_triggers(rows)
    }

    async fn list_for_pipeline(
        &self,
        account_id: &str,
        pipeline: &str,
    ) -> StoreResult<Vec<Trigger>> {
        let sql =
            format!("{SELECT_TRIGGER} WHERE account_id = $1 AND pipeline = $2 ORDER BY name");
        let rows = sqlx::query_as::<_, TriggerRow>(&sql)
            .bind(account_id)
            .bind(pipeline)
            .fetch_all(&self.pool)
            .await?;

        into_triggers(rows)
    }

    async fn list_all(&self) -> StoreResult<Vec<Trigger>> {
        let sql = format!("{SELECT_TRIGGER} ORDER BY account_id, name");
        let rows = sqlx::query_as::<_, TriggerRow>(&sql)
            .fetch_all(&self.pool)
            .await?;

        into_triggers(rows)
    }
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct TriggerRow {
    account_id: String,
    name: String,
    pipeline: String,
    spec: serde_json::Value,
    created_at: chrono::DateTime<chrono::Utc>,
}

fn into_triggers(rows: Vec<TriggerRow>) -> StoreResult<Vec<Trigger>> {
    rows.into_iter().map(Trigger::try_from).collect()
}

impl TryFrom<TriggerRow> for Trigger {
    type Error = StoreError;

    fn try_from(row: TriggerRow) -> Result<Self, Self::Error> {
        Ok(Trigger {
            account_id: row.account_id,
            name: row.name,
            pipeline: row.pipeline,
            spec: serde_json::from_value(row.spec)?,
            created_at: row.created_at,
        })
    }
}
