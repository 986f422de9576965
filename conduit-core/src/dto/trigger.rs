//! Trigger DTOs

use serde::{Deserialize, Serialize};

/// Request to register a trigger
///
/// `trigger_type` and `payload` stay untyped on the wire; the registry
/// decodes them against the trigger definition catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTrigger {
    pub name: String,
    #[serde(rename = "type")]
    pub trigger_type: String,
    pub pipeline: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}
