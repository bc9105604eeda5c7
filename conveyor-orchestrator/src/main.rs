//! Conveyor Orchestrator binary
//!
//! Runs the repeat scheduler and the periodic orphan sweep until
//! interrupted. Job definitions are written through `LifecycleManager` by
//! the API layer embedding this crate.

use anyhow::{Context, Result};
use conveyor_core::dto::queue::{PIPELINE_EXECUTION_QUEUE, SOURCE_QUERY_QUEUE};
use conveyor_orchestrator::{Config, LifecycleManager, Scheduler};
use conveyor_queue::{InMemoryQueueBackend, JobQueueService, QueueBackend, RedisQueueBackend};
use conveyor_store::{
    DurableStore, FastStore, InMemoryDurableStore, InMemoryFastStore, PgDurableStore,
    RedisFastStore, StateSync, db,
};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "conveyor_orchestrator=debug,conveyor_queue=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Conveyor Orchestrator...");

    let config = Config::from_env();
    config.validate()?;

    let durable: Arc<dyn DurableStore> = match &config.database_url {
        Some(url) => {
            info!("Connecting to database...");
            let pool = db::create_pool(url)
                .await
                .context("Failed to create database pool")?;
            db::run_migrations(&pool)
                .await
                .context("Failed to run database migrations")?;
            Arc::new(PgDurableStore::new(pool))
        }
        None => {
            warn!("DATABASE_URL not set, job definitions are kept in memory");
            Arc::new(InMemoryDurableStore::new())
        }
    };

    let (fast, backend): (Arc<dyn FastStore>, Arc<dyn QueueBackend>) = match &config.redis_url {
        Some(url) => {
            info!("Connecting to redis...");
            (
                Arc::new(
                    RedisFastStore::connect(url)
                        .await
                        .context("Failed to connect fast store")?,
                ),
                Arc::new(
                    RedisQueueBackend::connect(url)
                        .await
                        .context("Failed to connect queue backend")?,
                ),
            )
        }
        None => {
            warn!("REDIS_URL not set, live state and queues are kept in memory");
            (
                Arc::new(InMemoryFastStore::new()),
                Arc::new(InMemoryQueueBackend::new()),
            )
        }
    };

    let queue = JobQueueService::new(backend, &[SOURCE_QUERY_QUEUE, PIPELINE_EXECUTION_QUEUE]);
    let manager = LifecycleManager::new(
        StateSync::new(durable, fast),
        queue,
        config.immediate_run_delay,
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler = Scheduler::new(manager, config.scheduler_tick, config.reconcile_interval);
    let handle = tokio::spawn(scheduler.run(shutdown_rx));

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Shutdown requested");

    let _ = shutdown_tx.send(true);
    handle.await.context("Scheduler task panicked")?;

    info!("Orchestrator stopped");
    Ok(())
}
