//! Trigger Engine
//!
//! Background loops deciding when pipelines run:
//! - one schedule loop per Schedule trigger, sleeping until the next fire time
//! - one event checking loop per account, querying the providers of all the
//!   account's event triggers on every pass
//!
//! Every loop holds a child of the engine's root cancellation token.
//! Deleting a trigger cancels its loop; shutting the engine down cancels all
//! of them. Loop failures are recorded on the trigger status board and never
//! end the loop.

mod checking;
pub mod provider;
mod schedule;
pub mod status;

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use conduit_core::domain::execution::Execution;
use conduit_core::domain::trigger::{Trigger, TriggerKey, TriggerSpec};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::repository::{StoreResult, TriggerStore};
use crate::service::execution::ExecutionError;

pub use provider::{EventProvider, Observation, ProviderError, ProviderSet};
pub use status::{StatusBoard, TriggerState, TriggerStatus};

/// Starts pipeline runs on behalf of the engine
#[async_trait]
pub trait Dispatcher: Send + Sync {
    async fn dispatch(
        &self,
        account_id: &str,
        pipeline: &str,
        input: Value,
    ) -> Result<Execution, ExecutionError>;
}

/// Engine timing
#[derive(Debug, Clone, Copy)]
pub struct EngineSettings {
    /// Pause between two event checking passes of one account
    pub check_interval: Duration,
    /// Upper bound of one provider call
    pub provider_timeout: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(60),
            provider_timeout: Duration::from_secs(10),
        }
    }
}

pub(crate) struct EngineInner {
    dispatcher: Arc<dyn Dispatcher>,
    triggers: Arc<dyn TriggerStore>,
    providers: ProviderSet,
    settings: EngineSettings,
    status: StatusBoard,
    root: CancellationToken,
    schedules: Mutex<HashMap<TriggerKey, CancellationToken>>,
    accounts: Mutex<HashMap<String, CancellationToken>>,
    /// Last cursor seen per event trigger
    cursors: Mutex<HashMap<TriggerKey, Cursor>>,
}

/// Cursor of one event trigger, tied to the row it was observed for so a
/// trigger re-created under the same name starts from a fresh seed
#[derive(Debug, Clone)]
struct Cursor {
    created_at: DateTime<Utc>,
    value: String,
}

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl EngineInner {
    /// Cursor last recorded for this row of the trigger
    fn cursor(&self, trigger: &Trigger) -> Option<String> {
        locked(&self.cursors)
            .get(&trigger.key())
            .filter(|cursor| cursor.created_at == trigger.created_at)
            .map(|cursor| cursor.value.clone())
    }

    /// Records a cursor unless the trigger stopped or was replaced by a
    /// newer row while it was being checked
    fn remember_cursor(&self, trigger: &Trigger, value: String) {
        let key = trigger.key();
        let mut cursors = locked(&self.cursors);
        if !self.status.contains(&key) {
            debug!("Trigger {} stopped during its check; cursor dropped", key);
            return;
        }
        if cursors
            .get(&key)
            .is_some_and(|cursor| cursor.created_at > trigger.created_at)
        {
            return;
        }
        cursors.insert(
            key,
            Cursor {
                created_at: trigger.created_at,
                value,
            },
        );
    }

    /// Starts a run of the trigger's pipeline and records the outcome
    async fn fire(&self, trigger: &Trigger, input: Value) -> Result<Execution, ExecutionError> {
        let key = trigger.key();
        self.status.set_state(&key, TriggerState::Due);

        match self
            .dispatcher
            .dispatch(&trigger.account_id, &trigger.pipeline, input)
            .await
        {
            Ok(execution) => {
                info!(
                    "Trigger {} dispatched execution {} of pipeline {}",
                    key, execution.id, trigger.pipeline
                );
                self.status.dispatched(&key);
                Ok(execution)
            }
            Err(e) => {
                warn!("Trigger {} could not dispatch {}: {}", key, trigger.pipeline, e);
                self.status.failed(&key, format!("dispatch failed: {e}"));
                Err(e)
            }
        }
    }
}

/// Handle to the trigger engine; cheap to clone
#[derive(Clone)]
pub struct TriggerEngine {
    inner: Arc<EngineInner>,
}

impl TriggerEngine {
    pub fn new(
        dispatcher: Arc<dyn Dispatcher>,
        triggers: Arc<dyn TriggerStore>,
        providers: ProviderSet,
        settings: EngineSettings,
    ) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                dispatcher,
                triggers,
                providers,
                settings,
                status: StatusBoard::default(),
                root: CancellationToken::new(),
                schedules: Mutex::new(HashMap::new()),
                accounts: Mutex::new(HashMap::new()),
                cursors: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Starts whatever checking the trigger kind needs
    pub fn track(&self, trigger: &Trigger) {
        self.inner.status.register(&trigger.key());

        match &trigger.spec {
            TriggerSpec::Schedule(_) => {
                self.start_scheduling(trigger);
            }
            TriggerSpec::HttpPoll(_) | TriggerSpec::GithubCommit(_) => {
                self.start_checking(&trigger.account_id);
            }
            TriggerSpec::Webhook(_) => {}
        }
    }

    /// Starts the recurring check of a Schedule trigger
    ///
    /// Returns false when the trigger is already scheduled or is not a
    /// valid Schedule trigger.
    pub fn start_scheduling(&self, trigger: &Trigger) -> bool {
        let TriggerSpec::Schedule(payload) = &trigger.spec else {
            return false;
        };
        let key = trigger.key();

        let cadence = match payload.cadence() {
            Ok(cadence) => cadence,
            Err(e) => {
                warn!("Trigger {} has an invalid schedule: {}", key, e);
                self.inner.status.register(&key);
                self.inner.status.failed(&key, e);
                return false;
            }
        };

        let token = {
            let mut schedules = locked(&self.inner.schedules);
            if schedules.contains_key(&key) {
                debug!("Trigger {} is already scheduled", key);
                return false;
            }
            let token = self.inner.root.child_token();
            schedules.insert(key.clone(), token.clone());
            token
        };

        self.inner.status.register(&key);
        info!("Scheduling trigger {}", key);
        tokio::spawn(schedule::run(
            Arc::clone(&self.inner),
            trigger.clone(),
            cadence,
            token,
        ));
        true
    }

    /// Starts the event checking loop of an account
    ///
    /// Returns false when the account is already being checked.
    pub fn start_checking(&self, account_id: &str) -> bool {
        let token = {
            let mut accounts = locked(&self.inner.accounts);
            if accounts.contains_key(account_id) {
                return false;
            }
            let token = self.inner.root.child_token();
            accounts.insert(account_id.to_string(), token.clone());
            token
        };

        info!("Starting event checking for account {}", account_id);
        tokio::spawn(checking::run(
            Arc::clone(&self.inner),
            account_id.to_string(),
            token,
        ));
        true
    }

    /// Stops checking a deleted trigger
    pub fn stop(&self, key: &TriggerKey) {
        if let Some(token) = locked(&self.inner.schedules).remove(key) {
            token.cancel();
            info!("Stopped schedule of trigger {}", key);
        }
        // a check still in flight looks the status up under the cursor lock
        let mut cursors = locked(&self.inner.cursors);
        cursors.remove(key);
        self.inner.status.remove(key);
    }

    /// Dispatches a trigger's pipeline immediately
    pub async fn fire(&self, trigger: &Trigger, input: Value) -> Result<Execution, ExecutionError> {
        self.inner.status.register(&trigger.key());
        self.inner.fire(trigger, input).await
    }

    /// Starts the schedule of every stored Schedule trigger of the account
    /// that is not running yet; returns the number started
    pub async fn resume_schedules(&self, account_id: &str) -> StoreResult<usize> {
        let triggers = self.inner.triggers.list_for_account(account_id).await?;
        Ok(self.resume(&triggers))
    }

    /// Resumes every stored trigger of every account
    pub async fn resume_all(&self) -> StoreResult<usize> {
        let triggers = self.inner.triggers.list_all().await?;
        let started = self.resume(&triggers);
        info!(
            "Resumed {} schedule(s) out of {} stored trigger(s)",
            started,
            triggers.len()
        );
        Ok(started)
    }

    fn resume(&self, triggers: &[Trigger]) -> usize {
        let mut started = 0;
        for trigger in triggers {
            self.inner.status.register(&trigger.key());
            match &trigger.spec {
                TriggerSpec::Schedule(_) => {
                    if self.start_scheduling(trigger) {
                        started += 1;
                    }
                }
                TriggerSpec::HttpPoll(_) | TriggerSpec::GithubCommit(_) => {
                    self.start_checking(&trigger.account_id);
                }
                TriggerSpec::Webhook(_) => {}
            }
        }
        started
    }

    pub fn is_scheduled(&self, key: &TriggerKey) -> bool {
        locked(&self.inner.schedules).contains_key(key)
    }

    pub fn is_checking(&self, account_id: &str) -> bool {
        locked(&self.inner.accounts).contains_key(account_id)
    }

    pub fn status(&self, key: &TriggerKey) -> Option<TriggerStatus> {
        self.inner.status.get(key)
    }

    /// Statuses of an account's triggers keyed by name
    pub fn statuses(&self, account_id: &str) -> BTreeMap<String, TriggerStatus> {
        self.inner.status.for_account(account_id)
    }

    /// Cancels every loop
    pub fn shutdown(&self) {
        info!("Shutting down trigger engine");
        self.inner.root.cancel();
        locked(&self.inner.schedules).clear();
        locked(&self.inner.accounts).clear();
    }
}
