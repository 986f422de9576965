//! Isolated execution environments
//!
//! Custom tasks run their script inside an environment built from an image.
//! Providers create environments; the runner holds each one through an
//! [`EnvironmentLease`] so it is released on every exit path: normal
//! completion, failure, timeout, and cancellation of the task future.

mod podman;

pub use podman::PodmanProvider;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, warn};

/// Errors raised by environment providers
#[derive(Debug, Error)]
pub enum EnvironmentError {
    /// The environment could not be created
    #[error("failed to create environment: {0}")]
    Create(String),

    /// The script could not be started or its output collected
    #[error("failed to run script: {0}")]
    Run(String),

    /// The environment could not be torn down
    #[error("failed to release environment {id}: {message}")]
    Release { id: String, message: String },
}

/// Everything a provider needs to build an environment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvironmentSpec {
    /// Identifier used to name the environment (unique per task run)
    pub name: String,
    pub image: String,
    /// `KEY=VALUE` entries
    pub environment_variables: Vec<String>,
    pub service_account: Option<String>,
}

/// Captured outcome of a script
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExitReport {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ExitReport {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Creates isolated environments
#[async_trait]
pub trait EnvironmentProvider: Send + Sync {
    async fn create(&self, spec: &EnvironmentSpec) -> Result<Box<dyn Environment>, EnvironmentError>;
}

/// A live isolated environment
#[async_trait]
pub trait Environment: Send {
    fn id(&self) -> &str;

    /// Runs the script commands in order, stopping at the first failure
    async fn run(&mut self, script: &[String]) -> Result<ExitReport, EnvironmentError>;

    /// Tears the environment down
    async fn release(self: Box<Self>) -> Result<(), EnvironmentError>;
}

/// Scoped ownership of an environment
///
/// Call [`EnvironmentLease::release`] on the normal path. If the lease is
/// dropped while still holding the environment (the task future was
/// cancelled), release is handed to the runtime in the background.
pub struct EnvironmentLease {
    environment: Option<Box<dyn Environment>>,
}

impl EnvironmentLease {
    pub fn new(environment: Box<dyn Environment>) -> Self {
        Self {
            environment: Some(environment),
        }
    }

    pub fn id(&self) -> &str {
        self.environment.as_deref().map(|e| e.id()).unwrap_or("released")
    }

    pub async fn run(&mut self, script: &[String]) -> Result<ExitReport, EnvironmentError> {
        match self.environment.as_mut() {
            Some(environment) => environment.run(script).await,
            None => Err(EnvironmentError::Run("environment already released".into())),
        }
    }

    pub async fn release(mut self) -> Result<(), EnvironmentError> {
        match self.environment.take() {
            Some(environment) => environment.release().await,
            None => Ok(()),
        }
    }
}

impl Drop for EnvironmentLease {
    fn drop(&mut self) {
        let Some(environment) = self.environment.take() else {
            return;
        };

        let id = environment.id().to_string();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                debug!("Releasing environment {} in background", id);
                handle.spawn(async move {
                    if let Err(e) = environment.release().await {
                        warn!("Failed to release environment {}: {}", id, e);
                    }
                });
            }
            Err(_) => warn!("No runtime available to release environment {}", id),
        }
    }
}
