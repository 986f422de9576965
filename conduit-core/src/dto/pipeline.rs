//! Pipeline DTOs

use serde::{Deserialize, Serialize};

use crate::domain::pipeline::{ExecutionPolicy, PipelineTask};

/// Request to create a pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePipeline {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub policy: ExecutionPolicy,
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
    pub tasks: Vec<PipelineTask>,
}
