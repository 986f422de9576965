//! Built-in operations
//!
//! Predefined tasks name an operation and pass it `body`. Every operation
//! decodes the body into its own typed input, so a malformed body is
//! rejected before the task runs rather than deep inside it.

mod delay;
mod echo;
mod http;

pub use delay::DelayOperation;
pub use echo::EchoOperation;
pub use http::HttpRequestOperation;

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use conduit_core::domain::task::{TaskBody, TaskContext};
use serde::de::DeserializeOwned;

use crate::config::RunnerConfig;
use crate::log_buffer::TaskLog;

/// A built-in operation
#[async_trait]
pub trait Operation: Send + Sync {
    /// Name used as the task `type`
    fn name(&self) -> &'static str;

    /// Checks that `body` decodes into the operation input
    fn validate(&self, body: &TaskBody) -> Result<(), String>;

    /// Runs the operation. An error maps to a `Failed` task result.
    async fn invoke(&self, ctx: &TaskContext, body: &TaskBody, log: &TaskLog) -> Result<()>;
}

/// Decodes a task body into an operation input
pub(crate) fn decode<T: DeserializeOwned>(body: &TaskBody) -> Result<T, String> {
    serde_json::from_value(serde_json::Value::Object(body.clone())).map_err(|e| e.to_string())
}

/// Operations available to predefined tasks, keyed by name
#[derive(Clone, Default)]
pub struct OperationRegistry {
    operations: HashMap<&'static str, Arc<dyn Operation>>,
}

impl OperationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in operation
    pub fn builtin(config: &RunnerConfig) -> Self {
        let mut registry = Self::new();
        registry.register(EchoOperation);
        registry.register(DelayOperation);
        registry.register(HttpRequestOperation::new(config.http_timeout));
        registry
    }

    pub fn register(&mut self, operation: impl Operation + 'static) {
        self.operations.insert(operation.name(), Arc::new(operation));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Operation>> {
        self.operations.get(name).cloned()
    }

    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.operations.keys().copied().collect();
        names.sort_unstable();
        names
    }
}
