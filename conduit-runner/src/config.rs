//! Runner configuration
//!
//! Defines the configurable parameters for task execution: the container
//! tool, default deadlines and log limits.

use std::time::Duration;

/// Runner configuration
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Container tool used to build isolated environments
    pub podman_binary: String,

    /// Deadline applied to tasks declaring `timeoutSeconds = 0`
    pub default_timeout: Duration,

    /// Maximum size of the rendered task log; older output is cut first
    pub max_log_bytes: usize,

    /// Request timeout of the built-in `http_request` operation
    pub http_timeout: Duration,
}

impl RunnerConfig {
    /// Creates a new configuration with defaults
    pub fn new() -> Self {
        Self {
            podman_binary: "podman".to_string(),
            default_timeout: Duration::from_secs(300), // 5 minutes
            max_log_bytes: 64 * 1024,
            http_timeout: Duration::from_secs(30),
        }
    }

    /// Creates configuration from environment variables
    ///
    /// Expected environment variables (all optional):
    /// - PODMAN_BIN (default: podman)
    /// - DEFAULT_TASK_TIMEOUT (seconds, default: 300)
    /// - MAX_LOG_BYTES (default: 65536)
    /// - HTTP_OPERATION_TIMEOUT (seconds, default: 30)
    pub fn from_env() -> Self {
        let defaults = Self::new();

        let podman_binary = std::env::var("PODMAN_BIN").unwrap_or(defaults.podman_binary);

        let default_timeout = std::env::var("DEFAULT_TASK_TIMEOUT")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(defaults.default_timeout);

        let max_log_bytes = std::env::var("MAX_LOG_BYTES")
            .ok()
            .and_then(|s| s.parse::<usize>().ok())
            .unwrap_or(defaults.max_log_bytes);

        let http_timeout = std::env::var("HTTP_OPERATION_TIMEOUT")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(defaults.http_timeout);

        Self {
            podman_binary,
            default_timeout,
            max_log_bytes,
            http_timeout,
        }
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.podman_binary.trim().is_empty() {
            anyhow::bail!("podman_binary cannot be empty");
        }

        if self.default_timeout.as_secs() == 0 {
            anyhow::bail!("default_timeout must be greater than 0");
        }

        if self.max_log_bytes == 0 {
            anyhow::bail!("max_log_bytes must be greater than 0");
        }

        if self.http_timeout.as_secs() == 0 {
            anyhow::bail!("http_timeout must be greater than 0");
        }

        Ok(())
    }

    /// Deadline for a task declaring `timeout_seconds`
    pub fn deadline_for(&self, timeout_seconds: u64) -> Duration {
        if timeout_seconds == 0 {
            self.default_timeout
        } else {
            Duration::from_secs(timeout_seconds)
        }
    }
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self::new()
    }
}
