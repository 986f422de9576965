//! Repository Module
//!
//! Data access layer for the orchestrator. Every store is a trait so the
//! services run unchanged on postgres or in memory; both implementations
//! must be safe for concurrent use from many callers.

pub mod execution;
pub mod memory;
pub mod pipeline;
pub mod trigger;

use async_trait::async_trait;
use conduit_core::domain::execution::Execution;
use conduit_core::domain::pipeline::Pipeline;
use conduit_core::domain::trigger::{Trigger, TriggerType};
use thiserror::Error;
use uuid::Uuid;

pub use execution::PgExecutionStore;
pub use memory::{MemoryExecutionStore, MemoryPipelineStore, MemoryTriggerStore};
pub use pipeline::PgPipelineStore;
pub use trigger::PgTriggerStore;

/// Store error type
#[derive(Debug, Error)]
pub enum StoreError {
    /// A row with the same key already exists
    #[error("{0} already exists")]
    Duplicate(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("corrupt row: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    /// Maps a unique violation to [`StoreError::Duplicate`]
    pub(crate) fn from_insert(err: sqlx::Error, what: impl Into<String>) -> Self {
        match &err {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                StoreError::Duplicate(what.into())
            }
            _ => StoreError::Database(err),
        }
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Trigger rows keyed by `(account_id, name)`
#[async_trait]
pub trait TriggerStore: Send + Sync {
    /// Fails with `Duplicate` when the key is taken
    async fn add(&self, trigger: &Trigger) -> StoreResult<()>;

    /// Removes the trigger named `name` targeting `pipeline`; fails with
    /// `NotFound` when there is no such row
    async fn delete(&self, account_id: &str, pipeline: &str, name: &str) -> StoreResult<Trigger>;

    async fn get(&self, account_id: &str, name: &str) -> StoreResult<Option<Trigger>>;

    async fn list_for_account(&self, account_id: &str) -> StoreResult<Vec<Trigger>>;

    async fn list_by_type(&self, account_id: &str, kind: TriggerType) -> StoreResult<Vec<Trigger>>;

    async fn list_for_pipeline(&self, account_id: &str, pipeline: &str)
    -> StoreResult<Vec<Trigger>>;

    /// Every trigger of every account, used when resuming at start-up
    async fn list_all(&self) -> StoreResult<Vec<Trigger>>;
}

/// Pipeline rows keyed by `(account_id, name)`
#[async_trait]
pub trait PipelineStore: Send + Sync {
    async fn create(&self, pipeline: &Pipeline) -> StoreResult<()>;

    async fn find(&self, account_id: &str, name: &str) -> StoreResult<Option<Pipeline>>;

    async fn list(&self, account_id: &str) -> StoreResult<Vec<Pipeline>>;

    /// Returns false when nothing was deleted
    async fn delete(&self, account_id: &str, name: &str) -> StoreResult<bool>;
}

/// Execution rows with their task results
#[async_trait]
pub trait ExecutionStore: Send + Sync {
    async fn create(&self, execution: &Execution) -> StoreResult<()>;

    /// Replaces the stored snapshot of an execution
    async fn update(&self, execution: &Execution) -> StoreResult<()>;

    async fn find(&self, account_id: &str, id: Uuid) -> StoreResult<Option<Execution>>;

    /// Most recent executions of an account, newest first
    async fn latest(&self, account_id: &str, limit: usize) -> StoreResult<Vec<Execution>>;
}
