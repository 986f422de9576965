//! Execution DTOs

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::execution::{Execution, ExecutionStatus};

/// Request to start a pipeline run by hand
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StartExecution {
    #[serde(default)]
    pub input: serde_json::Value,
}

/// Execution summary for listings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionSummary {
    pub id: Uuid,
    pub pipeline: String,
    pub status: ExecutionStatus,
    pub task_count: usize,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub finished_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl From<&Execution> for ExecutionSummary {
    fn from(execution: &Execution) -> Self {
        ExecutionSummary {
            id: execution.id,
            pipeline: execution.pipeline.clone(),
            status: execution.status,
            task_count: execution.results.len(),
            started_at: execution.started_at,
            finished_at: execution.finished_at,
        }
    }
}
