//! Database bootstrap

use std::time::Duration;

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

pub async fn create_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(5))
        .connect(database_url)
        .await
}

pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
    // Create pipelines table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS pipelines (
            account_id VARCHAR(255) NOT NULL,
            name VARCHAR(255) NOT NULL,
            description TEXT,
            policy VARCHAR(50) NOT NULL,
            timeout_seconds BIGINT,
            tasks JSONB NOT NULL DEFAULT '[]',
            created_at TIMESTAMPTZ NOT NULL,
            PRIMARY KEY (account_id, name)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create triggers table; the unique key backs concurrent registrations
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS triggers (
            account_id VARCHAR(255) NOT NULL,
            name VARCHAR(255) NOT NULL,
            pipeline VARCHAR(255) NOT NULL,
            trigger_type VARCHAR(50) NOT NULL,
            spec JSONB NOT NULL,
            created_at TIMESTAMPTZ NOT NULL,
            CONSTRAINT triggers_account_name_key UNIQUE (account_id, name)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create executions table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS executions (
            id UUID PRIMARY KEY,
            account_id VARCHAR(255) NOT NULL,
            pipeline VARCHAR(255) NOT NULL,
            status VARCHAR(50) NOT NULL,
            input JSONB NOT NULL DEFAULT 'null',
            results JSONB NOT NULL DEFAULT '[]',
            started_at TIMESTAMPTZ NOT NULL,
            finished_at TIMESTAMPTZ,
            error TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_triggers_account_type ON triggers(account_id, trigger_type)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_triggers_account_pipeline ON triggers(account_id, pipeline)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_executions_account_started ON executions(account_id, started_at DESC)",
    )
    .execute(pool)
    .await?;

    tracing::info!("Database migrations completed successfully");
    Ok(())
}
