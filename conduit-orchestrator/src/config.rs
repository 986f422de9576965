//! Orchestrator configuration
//!
//! Bind address, store backend and the cadence of the trigger engine.

use std::time::Duration;

use conduit_core::domain::trigger::TriggerType;

/// Where triggers, pipelines and executions are kept
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Memory,
    Postgres,
}

impl StoreBackend {
    fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Some(StoreBackend::Memory),
            "postgres" | "postgresql" => Some(StoreBackend::Postgres),
            _ => None,
        }
    }
}

/// Orchestrator configuration
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Address the HTTP API listens on
    pub bind_addr: String,

    pub store: StoreBackend,

    /// Required by the postgres backend
    pub database_url: Option<String>,

    /// Pause between two event checking passes of one account
    pub event_check_interval: Duration,

    /// Upper bound of a single external provider call
    pub provider_timeout: Duration,

    /// Number of executions returned by `GET /execution/{account}`
    pub recent_executions_limit: usize,

    /// Token sent to the GitHub API by commit triggers
    pub github_token: Option<String>,

    /// Trigger kinds offered by this process; empty offers every built-in kind
    pub trigger_types: Vec<TriggerType>,
}

impl OrchestratorConfig {
    pub fn new() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".to_string(),
            store: StoreBackend::Memory,
            database_url: None,
            event_check_interval: Duration::from_secs(60),
            provider_timeout: Duration::from_secs(10),
            recent_executions_limit: 20,
            github_token: None,
            trigger_types: Vec::new(),
        }
    }

    /// Creates configuration from environment variables
    ///
    /// Expected environment variables (all optional):
    /// - CONDUIT_BIND_ADDR (default: 0.0.0.0:8080)
    /// - CONDUIT_STORE (memory | postgres, default: memory)
    /// - DATABASE_URL (required when CONDUIT_STORE=postgres)
    /// - EVENT_CHECK_INTERVAL (seconds, default: 60)
    /// - PROVIDER_TIMEOUT (seconds, default: 10)
    /// - RECENT_EXECUTIONS_LIMIT (default: 20)
    /// - GITHUB_TOKEN
    /// - CONDUIT_TRIGGER_TYPES (comma separated, default: every kind)
    pub fn from_env() -> Self {
        let defaults = Self::new();

        let bind_addr = std::env::var("CONDUIT_BIND_ADDR").unwrap_or(defaults.bind_addr);

        let store = std::env::var("CONDUIT_STORE")
            .ok()
            .and_then(|s| StoreBackend::parse(&s))
            .unwrap_or(defaults.store);

        let database_url = std::env::var("DATABASE_URL").ok();

        let event_check_interval = std::env::var("EVENT_CHECK_INTERVAL")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(defaults.event_check_interval);

        let provider_timeout = std::env::var("PROVIDER_TIMEOUT")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(defaults.provider_timeout);

        let recent_executions_limit = std::env::var("RECENT_EXECUTIONS_LIMIT")
            .ok()
            .and_then(|s| s.parse::<usize>().ok())
            .unwrap_or(defaults.recent_executions_limit);

        let github_token = std::env::var("GITHUB_TOKEN").ok().filter(|t| !t.is_empty());

        let trigger_types = std::env::var("CONDUIT_TRIGGER_TYPES")
            .map(|s| parse_trigger_types(&s))
            .unwrap_or(defaults.trigger_types);

        Self {
            bind_addr,
            store,
            database_url,
            event_check_interval,
            provider_timeout,
            recent_executions_limit,
            github_token,
            trigger_types,
        }
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.bind_addr.trim().is_empty() {
            anyhow::bail!("bind_addr cannot be empty");
        }

        if self.store == StoreBackend::Postgres && self.database_url.is_none() {
            anyhow::bail!("DATABASE_URL is required by the postgres store");
        }

        if self.event_check_interval.as_secs() == 0 {
            anyhow::bail!("event_check_interval must be greater than 0");
        }

        if self.provider_timeout.as_secs() == 0 {
            anyhow::bail!("provider_timeout must be greater than 0");
        }

        if self.recent_executions_limit == 0 {
            anyhow::bail!("recent_executions_limit must be greater than 0");
        }

        Ok(())
    }
}

/// Unknown names are skipped
fn parse_trigger_types(s: &str) -> Vec<TriggerType> {
    s.split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .filter_map(|name| match name.parse() {
            Ok(kind) => Some(kind),
            Err(e) => {
                tracing::warn!("Ignoring CONDUIT_TRIGGER_TYPES entry: {}", e);
                None
            }
        })
        .collect()
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self::new()
    }
}
