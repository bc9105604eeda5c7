//! Conveyor Runner binary
//!
//! Wires the stores, the queues and the plugin loader together and runs one
//! worker pool per queue until interrupted.

use anyhow::{Context, Result};
use conveyor_core::dto::queue::{PIPELINE_EXECUTION_QUEUE, SOURCE_QUERY_QUEUE};
use conveyor_queue::{InMemoryQueueBackend, JobQueueService, QueueBackend, RedisQueueBackend, WorkerOptions};
use conveyor_runner::{
    Config, EnvSecrets, HttpFetcher, PipelineRunner, PipelineWorker, PluginLoader, PluginRegistry,
    PollingOptions, SourceWorker, StepExecutor,
};
use conveyor_store::{
    DurableStore, FastStore, InMemoryDurableStore, InMemoryFastStore, PgDurableStore,
    RedisFastStore, StateSync, db,
};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "conveyor_runner=info,conveyor_queue=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Conveyor Runner");

    let config = load_config()?;
    info!(
        "Loaded configuration: registry={}, source_workers={}, pipeline_workers={}",
        config.plugin_registry_path.display(),
        config.source_worker_concurrency,
        config.pipeline_worker_concurrency
    );

    let state = connect_stores(&config).await?;
    let queue = connect_queue(&config).await?;

    let registry = PluginRegistry::from_path(&config.plugin_registry_path)
        .context("Failed to load plugin registry")?;
    info!("Plugin registry loaded with {} plugin(s)", registry.len());

    let http = reqwest::Client::new();
    let plugins = Arc::new(
        PluginLoader::new(registry, Arc::new(HttpFetcher::new(http.clone())))
            .with_cache(config.plugin_cache_capacity, config.plugin_cache_ttl)
            .with_http_client(http),
    );
    let secrets = Arc::new(EnvSecrets);

    let executor = Arc::new(StepExecutor::new(plugins.clone(), state.clone(), secrets.clone()));
    let pipeline_worker = PipelineWorker::new(PipelineRunner::new(executor), state.clone());
    let source_worker = SourceWorker::new(
        plugins,
        state,
        queue.clone(),
        secrets,
        PollingOptions {
            fast_poll_delay: config.fast_poll_delay,
            slow_poll_delay: config.slow_poll_delay,
            dispatch_concurrency: config.dispatch_concurrency,
        },
    );

    let workers = vec![
        queue.create_worker(
            SOURCE_QUERY_QUEUE,
            source_worker,
            WorkerOptions {
                concurrency: config.source_worker_concurrency,
                poll_interval: config.queue_poll_interval,
            },
        ),
        queue.create_worker(
            PIPELINE_EXECUTION_QUEUE,
            pipeline_worker,
            WorkerOptions {
                concurrency: config.pipeline_worker_concurrency,
                poll_interval: config.queue_poll_interval,
            },
        ),
    ];
    info!("Runner initialized, {} worker pool(s) started", workers.len());

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Shutdown requested, waiting for in-flight jobs");

    for worker in workers {
        let queue = worker.queue().to_string();
        worker.shutdown_and_join().await;
        info!(%queue, "Worker pool stopped");
    }

    info!("Runner stopped");
    Ok(())
}

/// Loads configuration from environment variables with fallback to defaults
fn load_config() -> Result<Config> {
    let config = Config::from_env();
    if let Err(e) = config.validate() {
        warn!("Invalid configuration in environment ({}), using defaults", e);
        let config = Config::default();
        config.validate()?;
        return Ok(config);
    }
    Ok(config)
}

async fn connect_stores(config: &Config) -> Result<StateSync> {
    let durable: Arc<dyn DurableStore> = match &config.database_url {
        Some(url) => {
            let pool = db::create_pool(url)
                .await
                .context("Failed to connect to database")?;
            db::run_migrations(&pool)
                .await
                .context("Failed to run migrations")?;
            info!("Durable store: postgres");
            Arc::new(PgDurableStore::new(pool))
        }
        None => {
            warn!("DATABASE_URL not set, run history is kept in memory");
            Arc::new(InMemoryDurableStore::new())
        }
    };

    let fast: Arc<dyn FastStore> = match &config.redis_url {
        Some(url) => {
            info!("Fast store: redis");
            Arc::new(
                RedisFastStore::connect(url)
                    .await
                    .context("Failed to connect fast store to redis")?,
            )
        }
        None => {
            warn!("REDIS_URL not set, live state is kept in memory");
            Arc::new(InMemoryFastStore::new())
        }
    };

    Ok(StateSync::new(durable, fast))
}

async fn connect_queue(config: &Config) -> Result<JobQueueService> {
    let backend: Arc<dyn QueueBackend> = match &config.redis_url {
        Some(url) => Arc::new(
            RedisQueueBackend::connect(url)
                .await
                .context("Failed to connect queues to redis")?,
        ),
        None => {
            warn!("REDIS_URL not set, queues only see jobs produced in this process");
            Arc::new(InMemoryQueueBackend::new())
        }
    };
    Ok(JobQueueService::new(
        backend,
        &[SOURCE_QUERY_QUEUE, PIPELINE_EXECUTION_QUEUE],
    ))
}
