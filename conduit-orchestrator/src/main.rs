//! Conduit Orchestrator binary
//!
//! Wires the stores, runner, trigger engine and services together, resumes
//! stored triggers and serves the HTTP API until Ctrl-C.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use conduit_core::domain::catalog::TriggerCatalog;
use conduit_orchestrator::api::{self, AppState};
use conduit_orchestrator::config::{OrchestratorConfig, StoreBackend};
use conduit_orchestrator::db;
use conduit_orchestrator::engine::{EngineSettings, ProviderSet, TriggerEngine};
use conduit_orchestrator::repository::{
    ExecutionStore, MemoryExecutionStore, MemoryPipelineStore, MemoryTriggerStore,
    PgExecutionStore, PgPipelineStore, PgTriggerStore, PipelineStore, TriggerStore,
};
use conduit_orchestrator::service::execution::ExecutionService;
use conduit_orchestrator::service::pipeline::PipelineService;
use conduit_orchestrator::service::trigger::TriggerService;
use conduit_runner::environment::PodmanProvider;
use conduit_runner::{Runner, RunnerConfig};
use sqlx::PgPool;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

struct Stores {
    triggers: Arc<dyn TriggerStore>,
    pipelines: Arc<dyn PipelineStore>,
    executions: Arc<dyn ExecutionStore>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "conduit_orchestrator=debug,conduit_runner=info,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Conduit Orchestrator...");

    let config = OrchestratorConfig::from_env();
    config.validate().context("Invalid orchestrator configuration")?;
    let runner_config = RunnerConfig::from_env();
    runner_config
        .validate()
        .context("Invalid runner configuration")?;

    info!(
        "Loaded configuration: store={:?}, check_interval={:?}, provider_timeout={:?}",
        config.store, config.event_check_interval, config.provider_timeout
    );

    let stores = open_stores(&config).await?;

    match PodmanProvider::new(runner_config.podman_binary.clone())
        .check_available()
        .await
    {
        Ok(version) => info!("Custom tasks run with {}", version),
        Err(e) => warn!("Custom tasks will fail until podman is available: {}", e),
    }

    let runner = Arc::new(Runner::with_podman(runner_config));
    let catalog = if config.trigger_types.is_empty() {
        TriggerCatalog::default()
    } else {
        TriggerCatalog::restricted_to(&config.trigger_types)
    };
    info!("Trigger catalog: {} kind(s)", catalog.definitions().len());

    // Initialize services
    let executions = ExecutionService::new(
        runner.clone(),
        stores.pipelines.clone(),
        stores.executions.clone(),
        config.recent_executions_limit,
    );
    let engine = TriggerEngine::new(
        Arc::new(executions.clone()),
        stores.triggers.clone(),
        ProviderSet::builtin(config.provider_timeout, config.github_token.clone()),
        EngineSettings {
            check_interval: config.event_check_interval,
            provider_timeout: config.provider_timeout,
        },
    );
    let state = AppState {
        triggers: TriggerService::new(
            stores.triggers.clone(),
            stores.pipelines.clone(),
            Arc::new(catalog),
            engine.clone(),
        ),
        pipelines: PipelineService::new(stores.pipelines, stores.triggers, runner),
        executions,
    };

    engine
        .resume_all()
        .await
        .context("Failed to resume stored triggers")?;

    // Build router with all API endpoints
    let app = api::create_router(state);

    info!("Listening on {}", config.bind_addr);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", config.bind_addr))?;

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    engine.shutdown();
    served.context("Server error")?;

    info!("Orchestrator stopped");
    Ok(())
}

async fn open_stores(config: &OrchestratorConfig) -> Result<Stores> {
    match config.store {
        StoreBackend::Memory => {
            info!("Using in-memory stores");
            Ok(Stores {
                triggers: Arc::new(MemoryTriggerStore::new()),
                pipelines: Arc::new(MemoryPipelineStore::new()),
                executions: Arc::new(MemoryExecutionStore::new()),
            })
        }
        StoreBackend::Postgres => {
            let url = config
                .database_url
                .as_deref()
                .context("DATABASE_URL is required by the postgres store")?;

            info!("Connecting to database...");
            let pool = connect_with_retry(url).await?;

            db::run_migrations(&pool)
                .await
                .context("Failed to run database migrations")?;

            Ok(Stores {
                triggers: Arc::new(PgTriggerStore::new(pool.clone())),
                pipelines: Arc::new(PgPipelineStore::new(pool.clone())),
                executions: Arc::new(PgExecutionStore::new(pool)),
            })
        }
    }
}

/// Connects to the database with exponential backoff
///
/// The database may still be starting when the orchestrator comes up in a
/// container environment.
async fn connect_with_retry(url: &str) -> Result<PgPool> {
    const MAX_RETRIES: u32 = 10;
    const INITIAL_DELAY_MS: u64 = 500;
    const MAX_DELAY_MS: u64 = 30_000;

    let mut attempt = 0;
    let mut delay_ms = INITIAL_DELAY_MS;

    loop {
        attempt += 1;

        match db::create_pool(url).await {
            Ok(pool) => {
                info!("Database connection pool created after {} attempt(s)", attempt);
                return Ok(pool);
            }
            Err(e) if attempt >= MAX_RETRIES => {
                error!("Failed to connect to database after {} attempts", MAX_RETRIES);
                return Err(e).context("Failed to create database pool");
            }
            Err(e) => {
                warn!(
                    "Failed to connect to database (attempt {}/{}): {}",
                    attempt, MAX_RETRIES, e
                );
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                delay_ms = (delay_ms * 2).min(MAX_DELAY_MS);
            }
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
