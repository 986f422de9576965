//! Pipeline domain types
//!
//! Pipelines are defined by users outside the scheduling core. The core only
//! needs to resolve a pipeline name to the tasks it runs and the policy used
//! to run them.

use serde::{Deserialize, Serialize};

use super::task::Task;
use crate::error::TaskError;

/// Pipeline definition owned by an account
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pipeline {
    pub account_id: String,
    pub name: String,
    pub description: Option<String>,
    pub policy: ExecutionPolicy,
    /// Whole-run deadline; `None` means no limit beyond per-task timeouts
    pub timeout_seconds: Option<u64>,
    pub tasks: Vec<PipelineTask>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// How the tasks of one run are scheduled
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionPolicy {
    #[default]
    Sequential,
    Parallel,
}

/// A task as it appears in a pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineTask {
    pub task: Task,
    /// A failure of a required task fails the whole run
    #[serde(default = "default_required")]
    pub required: bool,
}

fn default_required() -> bool {
    true
}

impl PipelineTask {
    pub fn required(task: Task) -> Self {
        Self {
            task,
            required: true,
        }
    }

    pub fn optional(task: Task) -> Self {
        Self {
            task,
            required: false,
        }
    }
}

impl Pipeline {
    /// Tasks in `id` order
    pub fn ordered_tasks(&self) -> Vec<PipelineTask> {
        let mut tasks = self.tasks.clone();
        tasks.sort_by_key(|t| t.task.id);
        tasks
    }

    /// Validates every task of the pipeline and the uniqueness of task ids
    pub fn validate_tasks(&self) -> Result<(), TaskError> {
        let mut seen = std::collections::HashSet::new();
        for entry in &self.tasks {
            entry.task.validate()?;
            if !seen.insert(entry.task.id) {
                return Err(TaskError::malformed(
                    &entry.task.name,
                    format!("duplicate task id {}", entry.task.id),
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::task::TaskBody;

    fn pipeline(tasks: Vec<PipelineTask>) -> Pipeline {
        Pipeline {
            account_id: "u1".to_string(),
            name: "p1".to_string(),
            description: None,
            policy: ExecutionPolicy::Sequential,
            timeout_seconds: None,
            tasks,
            created_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn test_ordered_tasks_sorts_by_id() {
        let p = pipeline(vec![
            PipelineTask::required(Task::predefined(3, "c", "echo", TaskBody::new())),
            PipelineTask::required(Task::predefined(1, "a", "echo", TaskBody::new())),
            PipelineTask::optional(Task::predefined(2, "b", "echo", TaskBody::new())),
        ]);

        let ids: Vec<u32> = p.ordered_tasks().iter().map(|t| t.task.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let p = pipeline(vec![
            PipelineTask::required(Task::predefined(1, "a", "echo", TaskBody::new())),
            PipelineTask::required(Task::predefined(1, "b", "echo", TaskBody::new())),
        ]);
        assert!(p.validate_tasks().is_err());
    }

    #[test]
    fn test_required_defaults_to_true() {
        let entry: PipelineTask = serde_json::from_value(serde_json::json!({
            "task": {
                "name": "a",
                "id": 1,
                "type": "echo",
                "isPredefined": true
            }
        }))
        .unwrap();
        assert!(entry.required);
    }
}
