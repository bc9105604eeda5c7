//! Queue workers
//!
//! A worker polls one queue and runs up to `concurrency` jobs at a time.
//! Shutdown stops claiming new jobs and waits for in-flight ones.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Semaphore, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::job::QueueJob;
use crate::service::JobQueueService;

/// Handles jobs claimed from a queue
///
/// An `Err` counts as a failed attempt; the queue decides whether to retry.
#[async_trait]
pub trait JobProcessor: Send + Sync + 'static {
    async fn process(&self, job: &QueueJob) -> conveyor_core::Result<()>;
}

#[derive(Debug, Clone)]
pub struct WorkerOptions {
    pub concurrency: usize,
    /// Sleep between polls when the queue is empty
    pub poll_interval: Duration,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self {
            concurrency: 5,
            poll_interval: Duration::from_millis(500),
        }
    }
}

pub struct Worker {
    queue: String,
    shutdown_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl Worker {
    pub(crate) fn spawn(
        service: JobQueueService,
        queue: &str,
        processor: Arc<dyn JobProcessor>,
        options: WorkerOptions,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let queue = queue.to_string();

        info!(
            queue = %queue,
            concurrency = options.concurrency,
            "Starting worker"
        );

        let join = tokio::spawn(worker_loop(
            service,
            queue.clone(),
            processor,
            options,
            shutdown_rx,
        ));

        Self {
            queue,
            shutdown_tx,
            join,
        }
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// Stops claiming new jobs
    pub fn request_shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Stops claiming and waits for in-flight jobs to settle
    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        if let Err(e) = self.join.await {
            error!(queue = %self.queue, "Worker task panicked: {}", e);
        }
        info!(queue = %self.queue, "Worker stopped");
    }
}

async fn worker_loop(
    service: JobQueueService,
    queue: String,
    processor: Arc<dyn JobProcessor>,
    options: WorkerOptions,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let concurrency = options.concurrency.max(1);
    let permits = Arc::new(Semaphore::new(concurrency));

    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        let permit = tokio::select! {
            changed = shutdown_rx.changed() => {
                // Sender gone means the handle was dropped
                if changed.is_err() {
                    break;
                }
                continue;
            }
            permit = permits.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };

        let job = match service.claim_next(&queue).await {
            Ok(job) => job,
            Err(e) => {
                error!(queue = %queue, "Failed to claim job: {}", e);
                None
            }
        };

        let Some(job) = job else {
            drop(permit);
            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = tokio::time::sleep(options.poll_interval) => {}
            }
            continue;
        };

        debug!(queue = %queue, job_id = %job.id, attempt = job.attempts_made, "Processing job");

        let service = service.clone();
        let processor = Arc::clone(&processor);
        tokio::spawn(async move {
            let outcome = processor.process(&job).await;
            let job_id = job.id.clone();
            if let Err(e) = service.settle(job, outcome).await {
                error!(job_id = %job_id, "Failed to settle job: {}", e);
            }
            drop(permit);
        });
    }

    // Wait for in-flight jobs
    let _ = permits.acquire_many(concurrency as u32).await;
}
