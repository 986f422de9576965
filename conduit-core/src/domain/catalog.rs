//! Trigger definition catalog
//!
//! Static, process-wide description of the trigger kinds a deployment
//! offers. Loaded once at start-up and never mutated.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use serde::{Deserialize, Serialize};

use super::trigger::TriggerType;

/// Catalog entry describing one available trigger kind
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerDefinition {
    #[serde(rename = "type")]
    pub trigger_type: TriggerType,
    pub service: String,
    pub icon_url: String,
    pub description: String,
}

/// Short form of a definition, grouped by service in listings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerSummary {
    #[serde(rename = "type")]
    pub trigger_type: TriggerType,
    pub icon_url: String,
    pub description: String,
}

static BUILTIN: LazyLock<TriggerCatalog> = LazyLock::new(|| {
    TriggerCatalog::new(vec![
        definition(
            TriggerType::Schedule,
            "scheduler",
            "https://cdn.conduit.dev/icons/schedule.svg",
            "Runs the pipeline on a fixed interval or a cron expression",
        ),
        definition(
            TriggerType::HttpPoll,
            "http",
            "https://cdn.conduit.dev/icons/http.svg",
            "Polls a JSON endpoint and runs the pipeline when the response changes",
        ),
        definition(
            TriggerType::GithubCommit,
            "github",
            "https://cdn.conduit.dev/icons/github.svg",
            "Runs the pipeline when a new commit lands on a branch",
        ),
        definition(
            TriggerType::Webhook,
            "webhook",
            "https://cdn.conduit.dev/icons/webhook.svg",
            "Runs the pipeline when a signal is posted to the trigger",
        ),
    ])
});

fn definition(
    trigger_type: TriggerType,
    service: &str,
    icon_url: &str,
    description: &str,
) -> TriggerDefinition {
    TriggerDefinition {
        trigger_type,
        service: service.to_string(),
        icon_url: icon_url.to_string(),
        description: description.to_string(),
    }
}

/// The set of trigger kinds available to a process
#[derive(Debug, Clone)]
pub struct TriggerCatalog {
    definitions: Vec<TriggerDefinition>,
}

impl TriggerCatalog {
    pub fn new(definitions: Vec<TriggerDefinition>) -> Self {
        Self { definitions }
    }

    /// Every built-in trigger kind
    pub fn builtin() -> &'static TriggerCatalog {
        &BUILTIN
    }

    /// The built-in catalog reduced to the given kinds
    pub fn restricted_to(kinds: &[TriggerType]) -> Self {
        Self::new(
            BUILTIN
                .definitions
                .iter()
                .filter(|d| kinds.contains(&d.trigger_type))
                .cloned()
                .collect(),
        )
    }

    pub fn get(&self, kind: TriggerType) -> Option<&TriggerDefinition> {
        self.definitions.iter().find(|d| d.trigger_type == kind)
    }

    pub fn contains(&self, kind: TriggerType) -> bool {
        self.get(kind).is_some()
    }

    pub fn definitions(&self) -> &[TriggerDefinition] {
        &self.definitions
    }

    /// Definitions grouped by the service that provides them
    pub fn by_service(&self) -> BTreeMap<String, Vec<TriggerSummary>> {
        let mut grouped: BTreeMap<String, Vec<TriggerSummary>> = BTreeMap::new();
        for def in &self.definitions {
            grouped
                .entry(def.service.clone())
                .or_default()
                .push(TriggerSummary {
                    trigger_type: def.trigger_type,
                    icon_url: def.icon_url.clone(),
                    description: def.description.clone(),
                });
        }
        grouped
    }
}

impl Default for TriggerCatalog {
    fn default() -> Self {
        BUILTIN.clone()
    }
}
