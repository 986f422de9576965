//! Task execution contract
//!
//! A [`Task`] is one unit of work inside a pipeline run. It is either a
//! predefined (built-in) operation fed with `body`, or a custom script run
//! inside an isolated environment built from `image`.
//!
//! The wire shape keeps every field of the contract so tasks can move across
//! process boundaries untouched; [`Task::validate`] turns it into a typed
//! [`TaskKind`] view and rejects inconsistent combinations.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::TaskError;

/// Input payload of a task. Decoded into a typed input by the operation
/// that consumes it.
pub type TaskBody = Map<String, Value>;

/// `type` value used by tasks that run a custom script
pub const CUSTOM_TASK_TYPE: &str = "custom";

/// Task definition as dispatched to the runner
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub name: String,

    /// Sequence position within the run
    pub id: u32,

    /// Predefined operation name, or `"custom"`
    #[serde(rename = "type")]
    pub task_type: String,

    /// Execution environment reference, required for custom tasks
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,

    /// Zero means "use the runner default"
    #[serde(default)]
    pub timeout_seconds: u64,

    #[serde(default)]
    pub body: TaskBody,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_account: Option<String>,

    #[serde(default)]
    pub environment_variables: Vec<String>,

    #[serde(default)]
    pub script: Vec<String>,

    pub is_predefined: bool,
}

/// Validated view of a task
#[derive(Debug, Clone, Copy)]
pub enum TaskKind<'a> {
    Predefined {
        operation: &'a str,
        body: &'a TaskBody,
    },
    Custom {
        image: &'a str,
        script: &'a [String],
        environment_variables: &'a [String],
        service_account: Option<&'a str>,
    },
}

impl Task {
    /// Builds a predefined task invoking the named built-in operation
    pub fn predefined(
        id: u32,
        name: impl Into<String>,
        operation: impl Into<String>,
        body: TaskBody,
    ) -> Self {
        Self {
            name: name.into(),
            id,
            task_type: operation.into(),
            image: None,
            timeout_seconds: 0,
            body,
            service_account: None,
            environment_variables: Vec::new(),
            script: Vec::new(),
            is_predefined: true,
        }
    }

    /// Builds a custom task running `script` inside `image`
    pub fn custom(
        id: u32,
        name: impl Into<String>,
        image: impl Into<String>,
        script: Vec<String>,
    ) -> Self {
        Self {
            name: name.into(),
            id,
            task_type: CUSTOM_TASK_TYPE.to_string(),
            image: Some(image.into()),
            timeout_seconds: 0,
            body: TaskBody::new(),
            service_account: None,
            environment_variables: Vec::new(),
            script,
            is_predefined: false,
        }
    }

    pub fn with_timeout(mut self, seconds: u64) -> Self {
        self.timeout_seconds = seconds;
        self
    }

    pub fn with_env(mut self, variable: impl Into<String>) -> Self {
        self.environment_variables.push(variable.into());
        self
    }

    pub fn with_service_account(mut self, account: impl Into<String>) -> Self {
        self.service_account = Some(account.into());
        self
    }

    /// Checks the `is_predefined` flag against the populated fields
    pub fn validate(&self) -> Result<TaskKind<'_>, TaskError> {
        if self.name.trim().is_empty() {
            return Err(TaskError::malformed(
                format!("#{}", self.id),
                "task name cannot be empty",
            ));
        }

        if self.is_predefined {
            if !self.script.is_empty() {
                return Err(TaskError::malformed(
                    &self.name,
                    "predefined task cannot carry a script",
                ));
            }
            if self.image.is_some() {
                return Err(TaskError::malformed(
                    &self.name,
                    "predefined task cannot carry an image",
                ));
            }
            if self.task_type.trim().is_empty() || self.task_type == CUSTOM_TASK_TYPE {
                return Err(TaskError::malformed(
                    &self.name,
                    "predefined task must name a built-in operation",
                ));
            }
            return Ok(TaskKind::Predefined {
                operation: &self.task_type,
                body: &self.body,
            });
        }

        let image = match self.image.as_deref().map(str::trim) {
            Some(image) if !image.is_empty() => image,
            _ => {
                return Err(TaskError::malformed(
                    &self.name,
                    "custom task requires an image",
                ));
            }
        };

        if self.script.is_empty() {
            return Err(TaskError::malformed(
                &self.name,
                "custom task requires a script",
            ));
        }

        if let Some(bad) = self
            .environment_variables
            .iter()
            .find(|v| !v.contains('=') || v.starts_with('='))
        {
            return Err(TaskError::malformed(
                &self.name,
                format!("environment variable '{bad}' is not KEY=VALUE"),
            ));
        }

        Ok(TaskKind::Custom {
            image,
            script: &self.script,
            environment_variables: &self.environment_variables,
            service_account: self.service_account.as_deref(),
        })
    }
}

/// Outcome status of one task execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskStatus {
    Success,
    Failed,
    TimedOut,
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Success => write!(f, "Success"),
            TaskStatus::Failed => write!(f, "Failed"),
            TaskStatus::TimedOut => write!(f, "TimedOut"),
        }
    }
}

/// Result of one task execution, immutable once written
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskResult {
    pub name: String,
    pub id: u32,
    #[serde(rename = "type")]
    pub task_type: String,
    pub account_id: String,
    pub log: String,
    /// Only populated when status is not `Success`
    pub error: Option<String>,
    pub status: TaskStatus,
}

impl TaskResult {
    pub fn success(task: &Task, account_id: &str, log: String) -> Self {
        Self::build(task, account_id, log, None, TaskStatus::Success)
    }

    pub fn failed(task: &Task, account_id: &str, log: String, error: impl Into<String>) -> Self {
        Self::build(task, account_id, log, Some(error.into()), TaskStatus::Failed)
    }

    pub fn timed_out(task: &Task, account_id: &str, log: String, error: impl Into<String>) -> Self {
        Self::build(task, account_id, log, Some(error.into()), TaskStatus::TimedOut)
    }

    fn build(
        task: &Task,
        account_id: &str,
        log: String,
        error: Option<String>,
        status: TaskStatus,
    ) -> Self {
        Self {
            name: task.name.clone(),
            id: task.id,
            task_type: task.task_type.clone(),
            account_id: account_id.to_string(),
            log,
            error,
            status,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == TaskStatus::Success
    }
}

/// Per-run information handed to the runner alongside the task
#[derive(Debug, Clone, Default)]
pub struct TaskContext {
    pub account_id: String,
    pub execution_id: uuid::Uuid,
    /// Initial input of the run (the triggering payload for event triggers)
    pub input: Value,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_predefined_task_validates() {
        let task = Task::predefined(1, "greet", "echo", TaskBody::new());
        assert!(matches!(
            task.validate(),
            Ok(TaskKind::Predefined {
                operation: "echo",
                ..
            })
        ));
    }

    #[test]
    fn test_predefined_with_script_is_malformed() {
        let mut task = Task::predefined(1, "greet", "echo", TaskBody::new());
        task.script = vec!["echo hi".to_string()];
        assert!(matches!(
            task.validate(),
            Err(TaskError::MalformedTask { .. })
        ));
    }

    #[test]
    fn test_custom_without_image_is_malformed() {
        let mut task = Task::custom(2, "build", "alpine", vec!["make".to_string()]);
        task.image = None;
        let err = task.validate().unwrap_err();
        assert!(err.to_string().contains("requires an image"));

        task.image = Some("  ".to_string());
        assert!(task.validate().is_err());
    }

    #[test]
    fn test_custom_env_must_be_key_value() {
        let task = Task::custom(2, "build", "alpine", vec!["make".to_string()]).with_env("NOPE");
        assert!(task.validate().is_err());

        let task = Task::custom(2, "build", "alpine", vec!["make".to_string()]).with_env("A=1");
        assert!(matches!(task.validate(), Ok(TaskKind::Custom { .. })));
    }

    #[test]
    fn test_wire_format_field_names() {
        let task = Task::custom(3, "build", "alpine", vec!["ls".to_string()])
            .with_timeout(10)
            .with_service_account("ci");
        let value = serde_json::to_value(&task).unwrap();

        assert_eq!(value["type"], "custom");
        assert_eq!(value["timeoutSeconds"], 10);
        assert_eq!(value["serviceAccount"], "ci");
        assert_eq!(value["isPredefined"], false);
        assert_eq!(value["environmentVariables"], json!([]));
    }

    #[test]
    fn test_result_status_is_verbatim() {
        let task = Task::predefined(1, "wait", "delay", TaskBody::new());
        let result = TaskResult::timed_out(&task, "u1", String::new(), "deadline exceeded");
        let value = serde_json::to_value(&result).unwrap();

        assert_eq!(value["status"], "TimedOut");
        assert_eq!(value["accountId"], "u1");
        assert_eq!(value["error"], "deadline exceeded");

        let ok = TaskResult::success(&task, "u1", String::new());
        assert!(ok.error.is_none());
        assert!(ok.is_success());
    }
}
