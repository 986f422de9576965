//! Execution Service
//!
//! Aggregates the task results of pipeline runs. A run starts `Pending`,
//! becomes `Running` once every task passed validation, and fans its tasks
//! out to the runner, sequentially or concurrently depending on the
//! pipeline policy. Results are recorded in task id order whatever order
//! they complete in. A failed required task fails the run immediately.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use conduit_core::domain::execution::{Execution, ExecutionStatus};
use conduit_core::domain::pipeline::{ExecutionPolicy, Pipeline, PipelineTask};
use conduit_core::domain::task::{TaskContext, TaskResult, TaskStatus};
use conduit_core::error::TaskError;
use conduit_runner::Runner;
use serde_json::Value;
use thiserror::Error;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::engine::Dispatcher;
use crate::repository::{ExecutionStore, PipelineStore, StoreError};

/// Service error type
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("pipeline {account_id}/{pipeline} not found")]
    PipelineNotFound { account_id: String, pipeline: String },

    #[error("no executions found for account {0}")]
    NoExecutions(String),

    #[error("execution {0} not found")]
    NotFound(Uuid),

    #[error(transparent)]
    MalformedTask(#[from] TaskError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type Result<T> = std::result::Result<T, ExecutionError>;

/// Starts pipeline runs and records their results
#[derive(Clone)]
pub struct ExecutionService {
    runner: Arc<Runner>,
    pipelines: Arc<dyn PipelineStore>,
    executions: Arc<dyn ExecutionStore>,
    recent_limit: usize,
}

impl ExecutionService {
    pub fn new(
        runner: Arc<Runner>,
        pipelines: Arc<dyn PipelineStore>,
        executions: Arc<dyn ExecutionStore>,
        recent_limit: usize,
    ) -> Self {
        Self {
            runner,
            pipelines,
            executions,
            recent_limit,
        }
    }

    /// Starts a run of `pipeline` and returns it in `Running` state
    ///
    /// Malformed tasks are rejected here, before anything runs.
    pub async fn start_execution(
        &self,
        account_id: &str,
        pipeline: &str,
        input: Value,
    ) -> Result<Execution> {
        let pipeline = self
            .pipelines
            .find(account_id, pipeline)
            .await?
            .ok_or_else(|| ExecutionError::PipelineNotFound {
                account_id: account_id.to_string(),
                pipeline: pipeline.to_string(),
            })?;

        for entry in &pipeline.tasks {
            self.runner.validate(&entry.task)?;
        }

        let mut execution = Execution::pending(account_id, &pipeline.name, input);
        self.executions.create(&execution).await?;

        execution.status = ExecutionStatus::Running;
        self.executions.update(&execution).await?;

        info!(
            "Execution {} of pipeline {}/{} started ({} task(s), {:?})",
            execution.id,
            account_id,
            pipeline.name,
            pipeline.tasks.len(),
            pipeline.policy
        );

        let service = self.clone();
        let snapshot = execution.clone();
        tokio::spawn(async move { service.run(pipeline, snapshot).await });

        Ok(execution)
    }

    /// Most recent executions of the account, newest first
    pub async fn get_execution(&self, account_id: &str) -> Result<Vec<Execution>> {
        let executions = self
            .executions
            .latest(account_id, self.recent_limit)
            .await?;

        if executions.is_empty() {
            return Err(ExecutionError::NoExecutions(account_id.to_string()));
        }

        Ok(executions)
    }

    pub async fn get_execution_by_id(&self, account_id: &str, id: Uuid) -> Result<Execution> {
        self.executions
            .find(account_id, id)
            .await?
            .ok_or(ExecutionError::NotFound(id))
    }

    // =========================================================================
    // Run loop
    // =========================================================================

    async fn run(self, pipeline: Pipeline, execution: Execution) {
        let mut recorder = Recorder::new(execution, Arc::clone(&self.executions));

        let tasks = pipeline.ordered_tasks();
        let work = async {
            match pipeline.policy {
                ExecutionPolicy::Sequential => self.run_sequential(tasks, &mut recorder).await,
                ExecutionPolicy::Parallel => self.run_parallel(tasks, &mut recorder).await,
            }
        };

        let finished = match pipeline.timeout_seconds {
            Some(seconds) => tokio::time::timeout(Duration::from_secs(seconds), work)
                .await
                .is_ok(),
            None => {
                work.await;
                true
            }
        };

        if finished {
            recorder.close_out(TaskStatus::Failed, "task aborted").await;
            recorder.execution.finish(ExecutionStatus::Completed);
        } else {
            warn!(
                "Execution {} exceeded the {}s limit of pipeline {}",
                recorder.execution.id,
                pipeline.timeout_seconds.unwrap_or_default(),
                pipeline.name
            );
            recorder.execution.mark_failed("execution timed out");
            recorder
                .close_out(TaskStatus::TimedOut, "execution timed out")
                .await;
            recorder.execution.finish(ExecutionStatus::Failed);
        }
        recorder.persist().await;

        info!(
            "Execution {} finished: {} ({} result(s))",
            recorder.execution.id,
            recorder.execution.status,
            recorder.execution.results.len()
        );
    }

    fn context(&self, execution: &Execution) -> TaskContext {
        TaskContext {
            account_id: execution.account_id.clone(),
            execution_id: execution.id,
            input: execution.input.clone(),
        }
    }

    async fn run_sequential(&self, tasks: Vec<PipelineTask>, recorder: &mut Recorder) {
        let ctx = self.context(&recorder.execution);

        for entry in tasks {
            recorder.dispatched(&entry);
            let result = execute(&self.runner, &ctx, &entry).await;
            let stop = entry.required && !result.is_success();
            recorder.arrive(result).await;

            if stop {
                debug!(
                    "Execution {} stops after required task {}",
                    recorder.execution.id, entry.task.id
                );
                break;
            }
        }
    }

    async fn run_parallel(&self, tasks: Vec<PipelineTask>, recorder: &mut Recorder) {
        let ctx = self.context(&recorder.execution);

        let mut running = JoinSet::new();
        for entry in tasks {
            recorder.dispatched(&entry);
            let runner = Arc::clone(&self.runner);
            let ctx = ctx.clone();
            running.spawn(async move { execute(&runner, &ctx, &entry).await });
        }

        while let Some(joined) = running.join_next().await {
            match joined {
                Ok(result) => recorder.arrive(result).await,
                Err(e) => {
                    error!("Task of execution {} panicked: {}", recorder.execution.id, e);
                    recorder.fail(format!("task aborted: {e}")).await;
                }
            }
        }
    }
}

#[async_trait]
impl Dispatcher for ExecutionService {
    async fn dispatch(&self, account_id: &str, pipeline: &str, input: Value) -> Result<Execution> {
        self.start_execution(account_id, pipeline, input).await
    }
}

/// Runs one task; a task rejected at run time becomes a failed result
async fn execute(runner: &Runner, ctx: &TaskContext, entry: &PipelineTask) -> TaskResult {
    match runner.execute(ctx, &entry.task).await {
        Ok(result) => result,
        Err(e) => TaskResult::failed(&entry.task, &ctx.account_id, String::new(), e.to_string()),
    }
}

fn failure_message(result: &TaskResult) -> String {
    let outcome = match result.status {
        TaskStatus::TimedOut => "timed out",
        _ => "failed",
    };
    match &result.error {
        Some(error) => format!("required task '{}' {}: {}", result.name, outcome, error),
        None => format!("required task '{}' {}", result.name, outcome),
    }
}

/// Owns the execution during a run and persists every change
///
/// Results are recorded in task id order: a result waits in `arrived` until
/// every dispatched task with a lower id has been recorded. The recorder
/// outlives the run future, so a pipeline timeout still flushes what
/// arrived and closes out what never reported.
struct Recorder {
    execution: Execution,
    store: Arc<dyn ExecutionStore>,
    /// Dispatched tasks without a recorded result, by id
    outstanding: BTreeMap<u32, PipelineTask>,
    arrived: BTreeMap<u32, TaskResult>,
}

impl Recorder {
    fn new(execution: Execution, store: Arc<dyn ExecutionStore>) -> Self {
        Self {
            execution,
            store,
            outstanding: BTreeMap::new(),
            arrived: BTreeMap::new(),
        }
    }

    fn dispatched(&mut self, entry: &PipelineTask) {
        self.outstanding.insert(entry.task.id, entry.clone());
    }

    /// Takes a finished task's result and records every result now in order
    async fn arrive(&mut self, result: TaskResult) {
        let required = self
            .outstanding
            .get(&result.id)
            .is_some_and(|entry| entry.required);
        if required && !result.is_success() {
            // fails the run now, even while lower ids are still running
            self.execution.mark_failed(failure_message(&result));
        }
        self.arrived.insert(result.id, result);

        let mut recorded = false;
        while let Some(entry) = self.outstanding.first_entry() {
            let Some(result) = self.arrived.remove(entry.key()) else {
                break;
            };
            let entry = entry.remove();
            self.push(result, entry.required);
            recorded = true;
        }

        if recorded || self.execution.status == ExecutionStatus::Failed {
            self.persist().await;
        }
    }

    /// Records every outstanding task in id order; tasks that never reported
    /// get a synthetic result with `status`
    async fn close_out(&mut self, status: TaskStatus, reason: &str) {
        if self.outstanding.is_empty() {
            return;
        }

        let account_id = self.execution.account_id.clone();
        for (id, entry) in std::mem::take(&mut self.outstanding) {
            let result = match self.arrived.remove(&id) {
                Some(result) => result,
                None => {
                    warn!(
                        "Task {} of execution {} never reported: {}",
                        id, self.execution.id, reason
                    );
                    match status {
                        TaskStatus::TimedOut => {
                            TaskResult::timed_out(&entry.task, &account_id, String::new(), reason)
                        }
                        _ => TaskResult::failed(&entry.task, &account_id, String::new(), reason),
                    }
                }
            };
            self.push(result, entry.required);
        }
        self.persist().await;
    }

    fn push(&mut self, result: TaskResult, required: bool) {
        debug!(
            "Execution {} task {} '{}': {}",
            self.execution.id, result.id, result.name, result.status
        );
        if required && !result.is_success() {
            self.execution.mark_failed(failure_message(&result));
        }
        self.execution.results.push(result);
    }

    async fn fail(&mut self, error: String) {
        self.execution.mark_failed(error);
        self.persist().await;
    }

    async fn persist(&self) {
        if let Err(e) = self.store.update(&self.execution).await {
            error!("Failed to persist execution {}: {}", self.execution.id, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::{MemoryExecutionStore, MemoryPipelineStore};
    use conduit_core::domain::task::{Task, TaskBody};
    use conduit_runner::{
        Environment, EnvironmentError, EnvironmentProvider, EnvironmentSpec, Operation,
        OperationRegistry, RunnerConfig, TaskLog,
    };
    use serde_json::json;

    struct NoEnvironments;

    #[async_trait]
    impl EnvironmentProvider for NoEnvironments {
        async fn create(
            &self,
            _spec: &EnvironmentSpec,
        ) -> std::result::Result<Box<dyn Environment>, EnvironmentError> {
            Err(EnvironmentError::Create("no container tool in tests".into()))
        }
    }

    /// Always fails
    struct FailOperation;

    #[async_trait]
    impl Operation for FailOperation {
        fn name(&self) -> &'static str {
            "fail"
        }

        fn validate(&self, _body: &TaskBody) -> std::result::Result<(), String> {
            Ok(())
        }

        async fn invoke(
            &self,
            _ctx: &TaskContext,
            _body: &TaskBody,
            log: &TaskLog,
        ) -> anyhow::Result<()> {
            log.info("about to fail");
            anyhow::bail!("boom")
        }
    }

    struct Fixture {
        service: ExecutionService,
        pipelines: Arc<MemoryPipelineStore>,
    }

    fn fixture() -> Fixture {
        let config = RunnerConfig::default();
        let mut operations = OperationRegistry::builtin(&config);
        operations.register(FailOperation);
        let runner = Arc::new(Runner::new(config, operations, Arc::new(NoEnvironments)));

        let pipelines = Arc::new(MemoryPipelineStore::new());
        let service = ExecutionService::new(
            runner,
            pipelines.clone(),
            Arc::new(MemoryExecutionStore::new()),
            20,
        );
        Fixture { service, pipelines }
    }

    fn body(value: Value) -> TaskBody {
        value.as_object().cloned().unwrap()
    }

    fn delay(id: u32, seconds: u64) -> Task {
        Task::predefined(id, format!("wait-{id}"), "delay", body(json!({"seconds": seconds})))
    }

    fn fail(id: u32) -> Task {
        Task::predefined(id, format!("fail-{id}"), "fail", TaskBody::new())
    }

    fn pipeline(name: &str, policy: ExecutionPolicy, tasks: Vec<PipelineTask>) -> Pipeline {
        Pipeline {
            account_id: "u1".to_string(),
            name: name.to_string(),
            description: None,
            policy,
            timeout_seconds: None,
            tasks,
            created_at: chrono::Utc::now(),
        }
    }

    impl Fixture {
        async fn add(&self, pipeline: Pipeline) {
            self.pipelines.create(&pipeline).await.unwrap();
        }

        /// Waits for the run to reach a terminal status
        async fn wait(&self, id: Uuid) -> Execution {
            for _ in 0..1000 {
                let execution = self.service.get_execution_by_id("u1", id).await.unwrap();
                if execution.status.is_terminal() && execution.finished_at.is_some() {
                    return execution;
                }
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
            panic!("execution {id} never finished");
        }
    }

    #[tokio::test]
    async fn test_sequential_run_completes() {
        tokio::time::pause();
        let fx = fixture();
        fx.add(pipeline(
            "p1",
            ExecutionPolicy::Sequential,
            vec![
                PipelineTask::required(delay(2, 1)),
                PipelineTask::required(Task::predefined(
                    1,
                    "greet",
                    "echo",
                    body(json!({"message": "hello"})),
                )),
            ],
        ))
        .await;

        let started = fx
            .service
            .start_execution("u1", "p1", json!({"ref": "main"}))
            .await
            .unwrap();
        assert_eq!(started.status, ExecutionStatus::Running);

        let execution = fx.wait(started.id).await;
        assert_eq!(execution.status, ExecutionStatus::Completed);
        let ids: Vec<u32> = execution.results.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![1, 2]);
        assert!(execution.results[0].log.contains("hello"));
        assert!(execution.results[0].log.contains("main"));
    }

    #[tokio::test]
    async fn test_parallel_results_keep_id_order() {
        tokio::time::pause();
        let fx = fixture();
        let delays = [(1, 5), (2, 2), (3, 4), (4, 1), (5, 3)];
        fx.add(pipeline(
            "fan",
            ExecutionPolicy::Parallel,
            delays
                .iter()
                .rev()
                .map(|&(id, secs)| PipelineTask::required(delay(id, secs)))
                .collect(),
        ))
        .await;

        let started = fx.service.start_execution("u1", "fan", Value::Null).await.unwrap();
        let execution = fx.wait(started.id).await;

        assert_eq!(execution.status, ExecutionStatus::Completed);
        let ids: Vec<u32> = execution.results.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![1, 2, 3, 4, 5]);
        assert!(execution.results.iter().all(|r| r.is_success()));
    }

    #[tokio::test]
    async fn test_parallel_runs_concurrently() {
        tokio::time::pause();
        let fx = fixture();
        fx.add(pipeline(
            "fan",
            ExecutionPolicy::Parallel,
            (1..=4).map(|id| PipelineTask::required(delay(id, 10))).collect(),
        ))
        .await;

        let start = tokio::time::Instant::now();
        let started = fx.service.start_execution("u1", "fan", Value::Null).await.unwrap();
        fx.wait(started.id).await;
        assert!(start.elapsed() < Duration::from_secs(20));
    }

    #[tokio::test]
    async fn test_required_failure_short_circuits_sequential() {
        tokio::time::pause();
        let fx = fixture();
        fx.add(pipeline(
            "p1",
            ExecutionPolicy::Sequential,
            vec![
                PipelineTask::required(delay(1, 0)),
                PipelineTask::required(fail(2)),
                PipelineTask::required(delay(3, 0)),
            ],
        ))
        .await;

        let started = fx.service.start_execution("u1", "p1", Value::Null).await.unwrap();
        let execution = fx.wait(started.id).await;

        assert_eq!(execution.status, ExecutionStatus::Failed);
        assert_eq!(execution.results.len(), 2);
        assert_eq!(execution.results[1].status, TaskStatus::Failed);
        let error = execution.error.unwrap();
        assert!(error.contains("fail-2"));
        assert!(error.contains("boom"));
    }

    #[tokio::test]
    async fn test_required_failure_fails_parallel_run_immediately() {
        tokio::time::pause();
        let fx = fixture();
        fx.add(pipeline(
            "p1",
            ExecutionPolicy::Parallel,
            vec![PipelineTask::required(delay(1, 60)), PipelineTask::required(fail(2))],
        ))
        .await;

        let started = fx.service.start_execution("u1", "p1", Value::Null).await.unwrap();

        // task 1 is still waiting while task 2 has already failed the run
        tokio::time::sleep(Duration::from_secs(1)).await;
        let running = fx.service.get_execution_by_id("u1", started.id).await.unwrap();
        assert_eq!(running.status, ExecutionStatus::Failed);
        assert!(running.results.is_empty());
        assert!(running.finished_at.is_none());

        let execution = fx.wait(started.id).await;
        assert_eq!(execution.status, ExecutionStatus::Failed);
        let ids: Vec<u32> = execution.results.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_optional_failure_does_not_fail_run() {
        tokio::time::pause();
        let fx = fixture();
        fx.add(pipeline(
            "p1",
            ExecutionPolicy::Sequential,
            vec![PipelineTask::optional(fail(1)), PipelineTask::required(delay(2, 0))],
        ))
        .await;

        let started = fx.service.start_execution("u1", "p1", Value::Null).await.unwrap();
        let execution = fx.wait(started.id).await;

        assert_eq!(execution.status, ExecutionStatus::Completed);
        assert_eq!(execution.results.len(), 2);
        assert_eq!(execution.results[0].status, TaskStatus::Failed);
        assert!(execution.error.is_none());
    }

    #[tokio::test]
    async fn test_environment_failure_is_recorded_not_raised() {
        tokio::time::pause();
        let fx = fixture();
        fx.add(pipeline(
            "build",
            ExecutionPolicy::Sequential,
            vec![PipelineTask::required(Task::custom(
                1,
                "compile",
                "alpine",
                vec!["make".to_string()],
            ))],
        ))
        .await;

        let started = fx.service.start_execution("u1", "build", Value::Null).await.unwrap();
        let execution = fx.wait(started.id).await;

        assert_eq!(execution.status, ExecutionStatus::Failed);
        assert!(
            execution.results[0]
                .error
                .as_deref()
                .unwrap()
                .contains("environment failure")
        );
    }

    #[tokio::test]
    async fn test_pipeline_timeout_fails_run() {
        tokio::time::pause();
        let fx = fixture();
        let mut slow = pipeline(
            "slow",
            ExecutionPolicy::Sequential,
            vec![PipelineTask::required(delay(1, 120))],
        );
        slow.timeout_seconds = Some(10);
        fx.add(slow).await;

        let started = fx.service.start_execution("u1", "slow", Value::Null).await.unwrap();
        let execution = fx.wait(started.id).await;

        assert_eq!(execution.status, ExecutionStatus::Failed);
        assert_eq!(execution.error.as_deref(), Some("execution timed out"));
        assert_eq!(execution.results.len(), 1);
        assert_eq!(execution.results[0].status, TaskStatus::TimedOut);
    }

    #[tokio::test]
    async fn test_pipeline_timeout_keeps_finished_parallel_results() {
        tokio::time::pause();
        let fx = fixture();
        let mut fan = pipeline(
            "fan",
            ExecutionPolicy::Parallel,
            vec![
                PipelineTask::required(delay(1, 100)),
                PipelineTask::required(delay(2, 1)),
                PipelineTask::optional(delay(3, 200)),
            ],
        );
        fan.timeout_seconds = Some(10);
        fx.add(fan).await;

        let started = fx.service.start_execution("u1", "fan", Value::Null).await.unwrap();

        // task 2 is done but waits behind task 1
        tokio::time::sleep(Duration::from_secs(5)).await;
        let running = fx.service.get_execution_by_id("u1", started.id).await.unwrap();
        assert!(running.results.is_empty());

        let execution = fx.wait(started.id).await;
        assert_eq!(execution.status, ExecutionStatus::Failed);
        assert_eq!(execution.error.as_deref(), Some("execution timed out"));

        let outcome: Vec<(u32, TaskStatus)> =
            execution.results.iter().map(|r| (r.id, r.status)).collect();
        assert_eq!(
            outcome,
            vec![
                (1, TaskStatus::TimedOut),
                (2, TaskStatus::Success),
                (3, TaskStatus::TimedOut),
            ]
        );
    }

    #[tokio::test]
    async fn test_malformed_task_is_rejected_before_running() {
        let fx = fixture();
        fx.add(pipeline(
            "bad",
            ExecutionPolicy::Sequential,
            vec![PipelineTask::required(Task::predefined(
                1,
                "mail",
                "send_email",
                TaskBody::new(),
            ))],
        ))
        .await;

        let err = fx
            .service
            .start_execution("u1", "bad", Value::Null)
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutionError::MalformedTask(_)));
        assert!(matches!(
            fx.service.get_execution("u1").await,
            Err(ExecutionError::NoExecutions(_))
        ));
    }

    #[tokio::test]
    async fn test_unknown_pipeline() {
        let fx = fixture();
        let err = fx
            .service
            .start_execution("u1", "missing", Value::Null)
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutionError::PipelineNotFound { .. }));
    }

    #[tokio::test]
    async fn test_get_execution_is_scoped_to_account() {
        tokio::time::pause();
        let fx = fixture();
        fx.add(pipeline(
            "p1",
            ExecutionPolicy::Sequential,
            vec![PipelineTask::required(delay(1, 0))],
        ))
        .await;

        let started = fx.service.start_execution("u1", "p1", Value::Null).await.unwrap();
        fx.wait(started.id).await;

        assert_eq!(fx.service.get_execution("u1").await.unwrap().len(), 1);
        assert!(fx.service.get_execution("u2").await.is_err());
        assert!(matches!(
            fx.service.get_execution_by_id("u2", started.id).await,
            Err(ExecutionError::NotFound(_))
        ));
    }
}
