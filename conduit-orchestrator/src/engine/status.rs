//! Per-trigger checking status

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use conduit_core::domain::trigger::TriggerKey;
use serde::{Deserialize, Serialize};

/// Where a trigger is in its checking cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TriggerState {
    Registered,
    Checking,
    Due,
    NotDue,
    Dispatched,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerStatus {
    pub state: TriggerState,
    pub last_checked_at: Option<DateTime<Utc>>,
    pub last_dispatched_at: Option<DateTime<Utc>>,
    pub dispatch_count: u64,
    /// Error of the last check or dispatch; cleared by the next success
    pub last_error: Option<String>,
}

impl Default for TriggerStatus {
    fn default() -> Self {
        Self {
            state: TriggerState::Registered,
            last_checked_at: None,
            last_dispatched_at: None,
            dispatch_count: 0,
            last_error: None,
        }
    }
}

/// Status of every tracked trigger
#[derive(Debug, Default)]
pub struct StatusBoard {
    entries: Mutex<HashMap<TriggerKey, TriggerStatus>>,
}

impl StatusBoard {
    fn lock(&self) -> MutexGuard<'_, HashMap<TriggerKey, TriggerStatus>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Starts tracking a trigger; an existing entry is kept
    pub fn register(&self, key: &TriggerKey) {
        self.lock().entry(key.clone()).or_default();
    }

    pub fn remove(&self, key: &TriggerKey) {
        self.lock().remove(key);
    }

    pub fn set_state(&self, key: &TriggerKey, state: TriggerState) {
        if let Some(status) = self.lock().get_mut(key) {
            status.state = state;
        }
    }

    /// Records a completed check that found nothing to do
    pub fn not_due(&self, key: &TriggerKey) {
        if let Some(status) = self.lock().get_mut(key) {
            status.state = TriggerState::NotDue;
            status.last_checked_at = Some(Utc::now());
            status.last_error = None;
        }
    }

    pub fn dispatched(&self, key: &TriggerKey) {
        if let Some(status) = self.lock().get_mut(key) {
            let now = Utc::now();
            status.state = TriggerState::Dispatched;
            status.last_checked_at = Some(now);
            status.last_dispatched_at = Some(now);
            status.dispatch_count += 1;
            status.last_error = None;
        }
    }

    pub fn failed(&self, key: &TriggerKey, error: impl Into<String>) {
        if let Some(status) = self.lock().get_mut(key) {
            status.state = TriggerState::Checking;
            status.last_checked_at = Some(Utc::now());
            status.last_error = Some(error.into());
        }
    }

    pub fn contains(&self, key: &TriggerKey) -> bool {
        self.lock().contains_key(key)
    }

    pub fn get(&self, key: &TriggerKey) -> Option<TriggerStatus> {
        self.lock().get(key).cloned()
    }

    /// Statuses of one account keyed by trigger name
    pub fn for_account(&self, account_id: &str) -> BTreeMap<String, TriggerStatus> {
        self.lock()
            .iter()
            .filter(|(key, _)| key.account_id == account_id)
            .map(|(key, status)| (key.name.clone(), status.clone()))
            .collect()
    }
}
