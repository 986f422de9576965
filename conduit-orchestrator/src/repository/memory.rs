//! In-memory stores
//!
//! Default backend and the backend used by tests. Each store is a map
//! behind a `tokio::sync::RwLock`; the key check and the insert happen
//! under one write lock, so concurrent adds of the same key cannot both
//! succeed.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use conduit_core::domain::execution::Execution;
use conduit_core::domain::pipeline::Pipeline;
use conduit_core::domain::trigger::{Trigger, TriggerKey, TriggerType};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{ExecutionStore, PipelineStore, StoreError, StoreResult, TriggerStore};

// =============================================================================
// Triggers
// =============================================================================

#[derive(Default)]
pub struct MemoryTriggerStore {
    rows: RwLock<BTreeMap<TriggerKey, Trigger>>,
}

impl MemoryTriggerStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn select(&self, filter: impl Fn(&Trigger) -> bool) -> Vec<Trigger> {
        self.rows
            .read()
            .await
            .values()
            .filter(|t| filter(t))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl TriggerStore for MemoryTriggerStore {
    async fn add(&self, trigger: &Trigger) -> StoreResult<()> {
        let mut rows = self.rows.write().await;
        let key = trigger.key();
        if rows.contains_key(&key) {
            return Err(StoreError::Duplicate(format!("trigger {key}")));
        }
        rows.insert(key, trigger.clone());
        Ok(())
    }

    async fn delete(&self, account_id: &str, pipeline: &str, name: &str) -> StoreResult<Trigger> {
        let mut rows = self.rows.write().await;
        let key = TriggerKey::new(account_id, name);
        match rows.get(&key) {
            Some(trigger) if trigger.pipeline == pipeline => {}
            _ => return Err(StoreError::NotFound(format!("trigger {key}"))),
        }
        rows.remove(&key)
            .ok_or_else(|| StoreError::NotFound(format!("trigger {key}")))
    }

    async fn get(&self, account_id: &str, name: &str) -> StoreResult<Option<Trigger>> {
        let key = TriggerKey::new(account_id, name);
        Ok(self.rows.read().await.get(&key).cloned())
    }

    async fn list_for_account(&self, account_id: &str) -> StoreResult<Vec<Trigger>> {
        Ok(self.select(|t| t.account_id == account_id).await)
    }

    async fn list_by_type(&self, account_id: &str, kind: TriggerType) -> StoreResult<Vec<Trigger>> {
        Ok(self
            .select(|t| t.account_id == account_id && t.trigger_type() == kind)
            .await)
    }

    async fn list_for_pipeline(
        &self,
        account_id: &str,
        pipeline: &str,
    ) -> StoreResult<Vec<Trigger>> {
        Ok(self
            .select(|t| t.account_id == account_id && t.pipeline == pipeline)
            .await)
    }

    async fn list_all(&self) -> StoreResult<Vec<Trigger>> {
        Ok(self.select(|_| true).await)
    }
}

// =============================================================================
// Pipelines
// =============================================================================

#[derive(Default)]
pub struct MemoryPipelineStore {
    rows: RwLock<BTreeMap<(String, String), Pipeline>>,
}

impl MemoryPipelineStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PipelineStore for MemoryPipelineStore {
    async fn create(&self, pipeline: &Pipeline) -> StoreResult<()> {
        let mut rows = self.rows.write().await;
        let key = (pipeline.account_id.clone(), pipeline.name.clone());
        if rows.contains_key(&key) {
            return Err(StoreError::Duplicate(format!(
                "pipeline {}/{}",
                pipeline.account_id, pipeline.name
            )));
        }
        rows.insert(key, pipeline.clone());
        Ok(())
    }

    async fn find(&self, account_id: &str, name: &str) -> StoreResult<Option<Pipeline>> {
        let key = (account_id.to_string(), name.to_string());
        Ok(self.rows.read().await.get(&key).cloned())
    }

    async fn list(&self, account_id: &str) -> StoreResult<Vec<Pipeline>> {
        Ok(self
            .rows
            .read()
            .await
            .values()
            .filter(|p| p.account_id == account_id)
            .cloned()
            .collect())
    }

    async fn delete(&self, account_id: &str, name: &str) -> StoreResult<bool> {
        let key = (account_id.to_string(), name.to_string());
        Ok(self.rows.write().await.remove(&key).is_some())
    }
}

// =============================================================================
// Executions
// =============================================================================

#[derive(Default)]
pub struct MemoryExecutionStore {
    rows: RwLock<HashMap<Uuid, Execution>>,
}

impl MemoryExecutionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ExecutionStore for MemoryExecutionStore {
    async fn create(&self, execution: &Execution) -> StoreResult<()> {
        let mut rows = self.rows.write().await;
        if rows.contains_key(&execution.id) {
            return Err(StoreError::Duplicate(format!("execution {}", execution.id)));
        }
        rows.insert(execution.id, execution.clone());
        Ok(())
    }

    async fn update(&self, execution: &Execution) -> StoreResult<()> {
        let mut rows = self.rows.write().await;
        match rows.get_mut(&execution.id) {
            Some(row) => {
                *row = execution.clone();
                Ok(())
            }
            None => Err(StoreError::NotFound(format!("execution {}", execution.id))),
        }
    }

    async fn find(&self, account_id: &str, id: Uuid) -> StoreResult<Option<Execution>> {
        Ok(self
            .rows
            .read()
            .await
            .get(&id)
            .filter(|e| e.account_id == account_id)
            .cloned())
    }

    async fn latest(&self, account_id: &str, limit: usize) -> StoreResult<Vec<Execution>> {
        let mut executions: Vec<Execution> = self
            .rows
            .read()
            .await
            .values()
            .filter(|e| e.account_id == account_id)
            .cloned()
            .collect();
        executions.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        executions.truncate(limit);
        Ok(executions)
    }
}
