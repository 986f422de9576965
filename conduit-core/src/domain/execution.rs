//! Execution domain types
//!
//! One [`Execution`] is one run of a pipeline. The aggregator owns it while
//! the run is in flight; the execution store owns it afterwards.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::task::TaskResult;

/// Overall status of a pipeline run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl ExecutionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, ExecutionStatus::Completed | ExecutionStatus::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ExecutionStatus::Pending => "Pending",
            ExecutionStatus::Running => "Running",
            ExecutionStatus::Completed => "Completed",
            ExecutionStatus::Failed => "Failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Pending" => Some(ExecutionStatus::Pending),
            "Running" => Some(ExecutionStatus::Running),
            "Completed" => Some(ExecutionStatus::Completed),
            "Failed" => Some(ExecutionStatus::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One run of a pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Execution {
    pub id: Uuid,
    pub account_id: String,
    pub pipeline: String,
    pub status: ExecutionStatus,
    /// Initial input of the run
    pub input: serde_json::Value,
    /// Task results in task `id` order
    pub results: Vec<TaskResult>,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub finished_at: Option<chrono::DateTime<chrono::Utc>>,
    pub error: Option<String>,
}

impl Execution {
    /// Creates a new pending execution
    pub fn pending(account_id: &str, pipeline: &str, input: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            account_id: account_id.to_string(),
            pipeline: pipeline.to_string(),
            status: ExecutionStatus::Pending,
            input,
            results: Vec::new(),
            started_at: chrono::Utc::now(),
            finished_at: None,
            error: None,
        }
    }

    /// Marks the run failed while tasks may still be reporting. The first
    /// error wins.
    pub fn mark_failed(&mut self, error: impl Into<String>) {
        self.status = ExecutionStatus::Failed;
        if self.error.is_none() {
            self.error = Some(error.into());
        }
    }

    /// Moves the execution to a terminal status. A run that already failed
    /// stays failed.
    pub fn finish(&mut self, status: ExecutionStatus) {
        if self.status != ExecutionStatus::Failed {
            self.status = status;
        }
        self.finished_at = Some(chrono::Utc::now());
    }
}
