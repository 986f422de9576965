//! Errors shared between the orchestrator and the runner

use thiserror::Error;

/// A task whose populated fields disagree with its `isPredefined` flag,
/// or that names something the runner cannot execute.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskError {
    #[error("malformed task '{task}': {reason}")]
    MalformedTask { task: String, reason: String },
}

impl TaskError {
    pub fn malformed(task: impl Into<String>, reason: impl Into<String>) -> Self {
        TaskError::MalformedTask {
            task: task.into(),
            reason: reason.into(),
        }
    }
}
