//! Conduit Runner
//!
//! Executes a single task and turns it into a [`TaskResult`].
//!
//! Architecture:
//! - Configuration: runner settings from environment or defaults
//! - Operations: built-in (predefined) operations keyed by name
//! - Environments: isolated environments for custom scripts (podman)
//! - Runner: validation, timeout enforcement and result mapping
//!
//! The runner never retries; retry policy belongs to its caller.
//!
//! [`TaskResult`]: conduit_core::domain::task::TaskResult

pub mod config;
pub mod environment;
pub mod log_buffer;
pub mod operations;
pub mod runner;

pub use config::RunnerConfig;
pub use environment::{Environment, EnvironmentError, EnvironmentProvider, EnvironmentSpec};
pub use log_buffer::TaskLog;
pub use operations::{Operation, OperationRegistry};
pub use runner::Runner;
