//! Trigger Service
//!
//! The trigger registry: validates registrations against the trigger
//! definition catalog, persists them, and hands them to the engine.
//! Registering a Schedule trigger starts its recurring check; registering
//! an event trigger starts the checking loop of its account.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::SubsecRound;
use conduit_core::domain::catalog::{TriggerCatalog, TriggerDefinition, TriggerSummary};
use conduit_core::domain::execution::Execution;
use conduit_core::domain::trigger::{Trigger, TriggerKey, TriggerSpec, TriggerType};
use conduit_core::dto::trigger::CreateTrigger;
use serde_json::Value;
use thiserror::Error;

use crate::engine::{TriggerEngine, TriggerStatus};
use crate::repository::{PipelineStore, StoreError, TriggerStore};
use crate::service::execution::ExecutionError;

/// Service error type
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("invalid trigger type: {0}")]
    InvalidTriggerType(String),

    #[error("invalid trigger payload: {0}")]
    InvalidPayload(String),

    #[error("{0}")]
    ValidationError(String),

    #[error("trigger {0} already exists")]
    DuplicateTrigger(TriggerKey),

    #[error("{0} not found")]
    NotFound(String),

    #[error(transparent)]
    Dispatch(#[from] ExecutionError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type Result<T> = std::result::Result<T, RegistryError>;

#[derive(Clone)]
pub struct TriggerService {
    triggers: Arc<dyn TriggerStore>,
    pipelines: Arc<dyn PipelineStore>,
    catalog: Arc<TriggerCatalog>,
    engine: TriggerEngine,
}

impl TriggerService {
    pub fn new(
        triggers: Arc<dyn TriggerStore>,
        pipelines: Arc<dyn PipelineStore>,
        catalog: Arc<TriggerCatalog>,
        engine: TriggerEngine,
    ) -> Self {
        Self {
            triggers,
            pipelines,
            catalog,
            engine,
        }
    }

    pub fn engine(&self) -> &TriggerEngine {
        &self.engine
    }

    /// Parses a type name against the active catalog
    fn kind(&self, type_name: &str) -> Result<TriggerType> {
        let kind: TriggerType = type_name
            .parse()
            .map_err(|_| RegistryError::InvalidTriggerType(type_name.to_string()))?;

        if !self.catalog.contains(kind) {
            return Err(RegistryError::InvalidTriggerType(type_name.to_string()));
        }

        Ok(kind)
    }

    // =========================================================================
    // Registry
    // =========================================================================

    /// Registers a trigger and starts checking it
    pub async fn add_trigger(&self, account_id: &str, req: CreateTrigger) -> Result<Trigger> {
        let name = req.name.trim();
        if name.is_empty() {
            return Err(RegistryError::ValidationError(
                "Trigger name cannot be empty".to_string(),
            ));
        }

        let kind = self.kind(&req.trigger_type)?;
        let spec = TriggerSpec::decode(kind, req.payload).map_err(RegistryError::InvalidPayload)?;

        if self.pipelines.find(account_id, &req.pipeline).await?.is_none() {
            return Err(RegistryError::NotFound(format!(
                "pipeline {}/{}",
                account_id, req.pipeline
            )));
        }

        let trigger = Trigger {
            account_id: account_id.to_string(),
            name: name.to_string(),
            pipeline: req.pipeline,
            spec,
            // stores keep microseconds; the row read back must compare equal
            created_at: chrono::Utc::now().trunc_subsecs(6),
        };

        self.triggers.add(&trigger).await.map_err(|e| match e {
            StoreError::Duplicate(_) => RegistryError::DuplicateTrigger(trigger.key()),
            other => RegistryError::Store(other),
        })?;

        tracing::info!(
            "Trigger registered: {} ({}) -> pipeline {}",
            trigger.key(),
            kind,
            trigger.pipeline
        );

        self.engine.track(&trigger);

        // a delete that landed between the insert and `track` already ran
        // its stop; undo the tracking so no loop outlives the row
        match self.triggers.get(account_id, &trigger.name).await? {
            Some(stored) if stored.created_at == trigger.created_at => {}
            current => {
                tracing::warn!("Trigger {} was deleted while registering", trigger.key());
                self.engine.stop(&trigger.key());
                if let Some(current) = current {
                    self.engine.track(&current);
                }
            }
        }
        Ok(trigger)
    }

    /// Deletes a trigger and stops its checking
    pub async fn delete_trigger(&self, account_id: &str, name: &str, pipeline: &str) -> Result<()> {
        let trigger = self
            .triggers
            .delete(account_id, pipeline, name)
            .await
            .map_err(|e| match e {
                StoreError::NotFound(what) => RegistryError::NotFound(what),
                other => RegistryError::Store(other),
            })?;

        self.engine.stop(&trigger.key());
        tracing::info!("Trigger deleted: {}", trigger.key());
        Ok(())
    }

    pub async fn get_all_triggers(&self, account_id: &str) -> Result<Vec<Trigger>> {
        Ok(self.triggers.list_for_account(account_id).await?)
    }

    pub async fn get_triggers_by_type(
        &self,
        account_id: &str,
        type_name: &str,
    ) -> Result<Vec<Trigger>> {
        let kind = self.kind(type_name)?;
        Ok(self.triggers.list_by_type(account_id, kind).await?)
    }

    /// Triggers of one pipeline keyed by trigger name
    pub async fn get_triggers_for_pipeline(
        &self,
        account_id: &str,
        pipeline: &str,
    ) -> Result<BTreeMap<String, Trigger>> {
        let triggers = self.triggers.list_for_pipeline(account_id, pipeline).await?;
        Ok(triggers.into_iter().map(|t| (t.name.clone(), t)).collect())
    }

    // =========================================================================
    // Catalog
    // =========================================================================

    /// Available trigger kinds grouped by service
    pub fn trigger_types(&self) -> BTreeMap<String, Vec<TriggerSummary>> {
        self.catalog.by_service()
    }

    pub fn definition_for(&self, type_name: &str) -> Result<TriggerDefinition> {
        let kind = self.kind(type_name)?;
        self.catalog
            .get(kind)
            .cloned()
            .ok_or_else(|| RegistryError::InvalidTriggerType(type_name.to_string()))
    }

    // =========================================================================
    // Engine
    // =========================================================================

    /// Fires a Webhook trigger with `payload` as the run input
    pub async fn signal(&self, account_id: &str, name: &str, payload: Value) -> Result<Execution> {
        let trigger = self
            .triggers
            .get(account_id, name)
            .await?
            .ok_or_else(|| RegistryError::NotFound(format!("trigger {account_id}/{name}")))?;

        match trigger.spec {
            TriggerSpec::Webhook(_) => {}
            TriggerSpec::Schedule(_) | TriggerSpec::HttpPoll(_) | TriggerSpec::GithubCommit(_) => {
                return Err(RegistryError::InvalidTriggerType(format!(
                    "{} is a {} trigger, only Webhook triggers accept signals",
                    trigger.key(),
                    trigger.trigger_type()
                )));
            }
        }

        tracing::info!("Signal received for trigger {}", trigger.key());
        Ok(self.engine.fire(&trigger, payload).await?)
    }

    /// Restarts the schedules of an account; returns the number started
    pub async fn resume_schedules(&self, account_id: &str) -> Result<usize> {
        Ok(self.engine.resume_schedules(account_id).await?)
    }

    pub fn trigger_status(&self, account_id: &str) -> BTreeMap<String, TriggerStatus> {
        self.engine.statuses(account_id)
    }
}
