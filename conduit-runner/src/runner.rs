//! Task runner
//!
//! Turns one dispatched [`Task`] into a [`TaskResult`]:
//! 1. validate the task shape (and, for predefined tasks, the operation body)
//! 2. run the built-in operation, or build an isolated environment and run
//!    the script inside it
//! 3. enforce the task deadline; the environment is released on every path
//! 4. map the outcome to `Success`, `Failed` or `TimedOut`
//!
//! Only validation errors are returned as `Err`. Everything that happens
//! after validation, including environment failures and timeouts, is
//! reported inside the result.

use std::sync::Arc;
use std::time::Duration;

use conduit_core::domain::log::LogLevel;
use conduit_core::domain::task::{Task, TaskBody, TaskContext, TaskKind, TaskResult};
use conduit_core::error::TaskError;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::RunnerConfig;
use crate::environment::{EnvironmentLease, EnvironmentProvider, EnvironmentSpec, PodmanProvider};
use crate::log_buffer::TaskLog;
use crate::operations::OperationRegistry;

/// How a validated task ended
#[derive(Debug)]
enum Outcome {
    Succeeded,
    Failed(String),
    TimedOut(Duration),
}

/// Executes single tasks
pub struct Runner {
    config: RunnerConfig,
    operations: OperationRegistry,
    environments: Arc<dyn EnvironmentProvider>,
}

impl Runner {
    pub fn new(
        config: RunnerConfig,
        operations: OperationRegistry,
        environments: Arc<dyn EnvironmentProvider>,
    ) -> Self {
        Self {
            config,
            operations,
            environments,
        }
    }

    /// Runner with the built-in operations and podman environments
    pub fn with_podman(config: RunnerConfig) -> Self {
        let operations = OperationRegistry::builtin(&config);
        let environments = Arc::new(PodmanProvider::new(config.podman_binary.clone()));
        Self::new(config, operations, environments)
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Checks that the task can be executed by this runner
    pub fn validate<'t>(&self, task: &'t Task) -> Result<TaskKind<'t>, TaskError> {
        let kind = task.validate()?;

        if let TaskKind::Predefined { operation, body } = kind {
            let op = self.operations.get(operation).ok_or_else(|| {
                TaskError::malformed(&task.name, format!("unknown operation '{operation}'"))
            })?;
            op.validate(body).map_err(|reason| {
                TaskError::malformed(&task.name, format!("invalid {operation} body: {reason}"))
            })?;
        }

        Ok(kind)
    }

    /// Executes one task
    pub async fn execute(&self, ctx: &TaskContext, task: &Task) -> Result<TaskResult, TaskError> {
        let kind = self.validate(task)?;
        let deadline = self.config.deadline_for(task.timeout_seconds);
        let log = TaskLog::new(&task.name);

        info!(
            "Executing task {} '{}' ({}) for account {}",
            task.id, task.name, task.task_type, ctx.account_id
        );

        let outcome = match kind {
            TaskKind::Predefined { operation, body } => {
                self.run_predefined(ctx, operation, body, deadline, &log).await
            }
            TaskKind::Custom {
                image,
                script,
                environment_variables,
                service_account,
            } => {
                let spec = EnvironmentSpec {
                    name: format!("conduit-{}-{}", task.id, Uuid::new_v4().simple()),
                    image: image.to_string(),
                    environment_variables: seed_variables(ctx, environment_variables),
                    service_account: service_account.map(str::to_string),
                };
                self.run_custom(spec, script, deadline, &log).await
            }
        };

        let rendered = |log: &TaskLog| log.render(self.config.max_log_bytes);
        let result = match outcome {
            Outcome::Succeeded => {
                log.info("Task completed successfully");
                TaskResult::success(task, &ctx.account_id, rendered(&log))
            }
            Outcome::Failed(error) => {
                log.error(&error);
                TaskResult::failed(task, &ctx.account_id, rendered(&log), error)
            }
            Outcome::TimedOut(after) => {
                let error = format!(
                    "task '{}' timed out after {}s",
                    task.name,
                    after.as_secs()
                );
                log.error(&error);
                TaskResult::timed_out(task, &ctx.account_id, rendered(&log), error)
            }
        };

        info!("Task {} '{}' finished: {}", task.id, task.name, result.status);
        Ok(result)
    }

    async fn run_predefined(
        &self,
        ctx: &TaskContext,
        operation: &str,
        body: &TaskBody,
        deadline: Duration,
        log: &TaskLog,
    ) -> Outcome {
        let Some(op) = self.operations.get(operation) else {
            return Outcome::Failed(format!("unknown operation '{operation}'"));
        };

        log.info(format!("Invoking built-in operation '{}'", operation));

        match tokio::time::timeout(deadline, op.invoke(ctx, body, log)).await {
            Ok(Ok(())) => Outcome::Succeeded,
            Ok(Err(e)) => Outcome::Failed(format!("{e:#}")),
            Err(_) => Outcome::TimedOut(deadline),
        }
    }

    async fn run_custom(
        &self,
        spec: EnvironmentSpec,
        script: &[String],
        deadline: Duration,
        log: &TaskLog,
    ) -> Outcome {
        log.info(format!("Creating environment from image {}", spec.image));

        // creation counts against the task deadline; a provider dropped
        // mid-creation cleans up after itself
        let started = Instant::now();
        let creating = self.environments.create(&spec);
        let environment = match tokio::time::timeout(deadline, creating).await {
            Ok(Ok(environment)) => environment,
            Ok(Err(e)) => {
                warn!("Environment for {} could not be created: {}", spec.name, e);
                return Outcome::Failed(format!("environment failure: {e}"));
            }
            Err(_) => {
                warn!("Environment {} was not ready within {:?}", spec.name, deadline);
                log.error("Environment creation did not finish before the task deadline");
                return Outcome::TimedOut(deadline);
            }
        };

        let mut lease = EnvironmentLease::new(environment);
        debug!("Environment {} ready", lease.id());

        let remaining = deadline.saturating_sub(started.elapsed());
        let outcome = match tokio::time::timeout(remaining, lease.run(script)).await {
            Ok(Ok(report)) => {
                log.output(LogLevel::Info, &report.stdout);
                log.output(LogLevel::Warning, &report.stderr);
                if report.success() {
                    Outcome::Succeeded
                } else {
                    Outcome::Failed(format!("script exited with code {}", report.exit_code))
                }
            }
            Ok(Err(e)) => Outcome::Failed(e.to_string()),
            Err(_) => Outcome::TimedOut(deadline),
        };

        if let Err(e) = lease.release().await {
            warn!("{}", e);
            log.warning(e.to_string());
        }

        outcome
    }
}

/// Task variables plus the run identity and input
fn seed_variables(ctx: &TaskContext, declared: &[String]) -> Vec<String> {
    let mut variables = declared.to_vec();
    variables.push(format!("CONDUIT_ACCOUNT_ID={}", ctx.account_id));
    variables.push(format!("CONDUIT_EXECUTION_ID={}", ctx.execution_id));
    if !ctx.input.is_null() {
        variables.push(format!("CONDUIT_INPUT={}", ctx.input));
    }
    variables
}
