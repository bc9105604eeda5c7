//! Job Queue Service
//!
//! Named queues over a shared backend. Each queue has a default retry
//! policy; `add` may override it per job.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::backend::QueueBackend;
use crate::error::Result;
use crate::job::{ClearFilter, JobOptions, JobState, QueueCounts, QueueJob, QueueOutcome};
use crate::retry::RetryPolicy;
use crate::schedule::{self, RepeatRegistration};
use crate::worker::{JobProcessor, Worker, WorkerOptions};

#[derive(Clone)]
pub struct JobQueueService {
    backend: Arc<dyn QueueBackend>,
    policies: HashMap<String, RetryPolicy>,
}

impl JobQueueService {
    /// Service over `queues`, each with its default policy
    pub fn new(backend: Arc<dyn QueueBackend>, queues: &[&str]) -> Self {
        let policies = queues
            .iter()
            .map(|name| (name.to_string(), RetryPolicy::for_queue(name)))
            .collect();
        Self { backend, policies }
    }

    pub fn with_policy(mut self, queue: &str, policy: RetryPolicy) -> Self {
        self.policies.insert(queue.to_string(), policy);
        self
    }

    pub fn policy(&self, queue: &str) -> RetryPolicy {
        self.policies.get(queue).copied().unwrap_or_default()
    }

    /// Names of the queues this service was configured with
    pub fn queues(&self) -> impl Iterator<Item = &str> {
        self.policies.keys().map(String::as_str)
    }

    // =========================================================================
    // Producing
    // =========================================================================

    /// Adds a one-off job, optionally delayed
    pub async fn add(
        &self,
        queue: &str,
        name: &str,
        payload: serde_json::Value,
        options: JobOptions,
    ) -> Result<QueueJob> {
        self.enqueue(queue, name, payload, options, None).await
    }

    async fn enqueue(
        &self,
        queue: &str,
        name: &str,
        payload: serde_json::Value,
        options: JobOptions,
        repeat_id: Option<String>,
    ) -> Result<QueueJob> {
        let policy = self.policy(queue);
        let mut job = QueueJob::new(
            queue,
            name,
            payload,
            options.attempts.unwrap_or(policy.attempts),
        );
        job.backoff = Some(options.backoff.unwrap_or(policy.backoff));
        job.repeat_id = repeat_id;
        if let Some(delay) = options.delay {
            job.run_at = job.created_at + chrono::Duration::from_std(delay).unwrap_or_default();
        }

        self.backend.enqueue(&job).await?;
        debug!(queue, job_id = %job.id, name, "Job added");
        Ok(job)
    }

    /// Creates or replaces a cron registration keyed by `id`
    pub async fn upsert_scheduled(
        &self,
        queue: &str,
        id: &str,
        name: &str,
        cron: &str,
        payload: serde_json::Value,
    ) -> Result<RepeatRegistration> {
        let registration = RepeatRegistration {
            id: id.to_string(),
            queue: queue.to_string(),
            name: name.to_string(),
            cron: cron.to_string(),
            payload,
            next_run_at: schedule::next_fire(cron, Utc::now())?,
        };
        self.backend.upsert_repeat(&registration).await?;
        info!(queue, registration = id, cron, "Repeating job registered");
        Ok(registration)
    }

    /// Returns whether a registration existed
    pub async fn remove_scheduled(&self, queue: &str, id: &str) -> Result<bool> {
        let removed = self.backend.remove_repeat(queue, id).await?;
        if removed {
            info!(queue, registration = id, "Repeating job removed");
        }
        Ok(removed)
    }

    pub async fn list_scheduled(&self, queue: &str) -> Result<Vec<RepeatRegistration>> {
        self.backend.list_repeats(queue).await
    }

    /// Fires every due registration of every configured queue
    pub async fn tick(&self) -> Result<usize> {
        self.tick_at(Utc::now()).await
    }

    pub async fn tick_at(&self, now: DateTime<Utc>) -> Result<usize> {
        let mut fired = 0;
        for queue in self.queues() {
            for registration in self.backend.list_repeats(queue).await? {
                if !registration.is_due(now) {
                    continue;
                }
                let Some(fire_at) = registration.next_run_at else {
                    continue;
                };

                if self.backend.claim_fire(queue, &registration.id, fire_at).await? {
                    self.enqueue(
                        queue,
                        &registration.name,
                        registration.payload.clone(),
                        JobOptions::default(),
                        Some(registration.id.clone()),
                    )
                    .await?;
                    fired += 1;
                }

                let next_run_at = schedule::next_fire(&registration.cron, now)?;
                if !self.backend.advance_repeat(&registration, next_run_at).await? {
                    debug!(
                        queue,
                        repeat_id = %registration.id,
                        "Repeat changed while firing, left as stored"
                    );
                }
            }
        }
        Ok(fired)
    }

    // =========================================================================
    // Control
    // =========================================================================

    pub async fn pause(&self, queue: &str) -> Result<()> {
        self.backend.set_paused(queue, true).await?;
        info!(queue, "Queue paused");
        Ok(())
    }

    pub async fn resume(&self, queue: &str) -> Result<()> {
        self.backend.set_paused(queue, false).await?;
        info!(queue, "Queue resumed");
        Ok(())
    }

    pub async fn is_paused(&self, queue: &str) -> Result<bool> {
        self.backend.is_paused(queue).await
    }

    /// Removes jobs in the filtered states one by one; returns how many went
    pub async fn clear(&self, queue: &str, filter: ClearFilter) -> Result<u64> {
        let mut removed = 0;
        for state in filter.states() {
            for id in self.backend.ids_in(queue, *state).await? {
                match self.backend.remove(queue, &id).await? {
                    QueueOutcome::Done => removed += 1,
                    QueueOutcome::Rejected(reason) => {
                        debug!(queue, job_id = %id, "Skipped during clear: {}", reason)
                    }
                }
            }
        }
        info!(queue, ?filter, removed, "Queue cleared");
        Ok(removed)
    }

    pub async fn remove_job(&self, queue: &str, id: &str) -> Result<QueueOutcome> {
        self.backend.remove(queue, id).await
    }

    pub async fn retry_job(&self, queue: &str, id: &str) -> Result<QueueOutcome> {
        self.backend.retry(queue, id).await
    }

    pub async fn get_job(&self, queue: &str, id: &str) -> Result<Option<QueueJob>> {
        self.backend.get(queue, id).await
    }

    pub async fn jobs_in(&self, queue: &str, state: JobState) -> Result<Vec<QueueJob>> {
        let mut jobs = Vec::new();
        for id in self.backend.ids_in(queue, state).await? {
            if let Some(job) = self.backend.get(queue, &id).await? {
                jobs.push(job);
            }
        }
        Ok(jobs)
    }

    pub async fn counts(&self, queue: &str) -> Result<QueueCounts> {
        self.backend.counts(queue).await
    }

    // =========================================================================
    // Consuming
    // =========================================================================

    /// Promotes due delayed jobs and claims the oldest waiting one
    pub async fn claim_next(&self, queue: &str) -> Result<Option<QueueJob>> {
        let now = Utc::now();
        self.backend.promote_due(queue, now).await?;
        self.backend.claim(queue, now).await
    }

    /// Records the processor's verdict on a claimed job
    ///
    /// A failure with attempts left re-delays the job by its backoff;
    /// otherwise the job ends up failed with the error as its reason.
    pub async fn settle(
        &self,
        mut job: QueueJob,
        outcome: std::result::Result<(), conveyor_core::Error>,
    ) -> Result<QueueJob> {
        let now = Utc::now();
        match outcome {
            Ok(()) => {
                job.state = JobState::Completed;
                job.finished_at = Some(now);
                job.failure_reason = None;
            }
            Err(err) => {
                job.failure_reason = Some(err.to_string());
                if job.can_retry() {
                    let backoff = job.backoff.unwrap_or(self.policy(&job.queue).backoff);
                    let delay = backoff.delay_for(job.attempts_made);
                    job.state = JobState::Delayed;
                    job.run_at = now + chrono::Duration::from_std(delay).unwrap_or_default();
                    warn!(
                        queue = %job.queue,
                        job_id = %job.id,
                        attempt = job.attempts_made,
                        "Job failed, retrying in {:?}: {}",
                        delay,
                        err
                    );
                } else {
                    job.state = JobState::Failed;
                    job.finished_at = Some(now);
                    warn!(
                        queue = %job.queue,
                        job_id = %job.id,
                        attempts = job.attempts_made,
                        "Job failed permanently: {}",
                        err
                    );
                }
            }
        }
        self.backend.finish(&job).await?;
        Ok(job)
    }

    /// Claims, processes and settles one job; returns whether one was found
    pub async fn process_next(&self, queue: &str, processor: &dyn JobProcessor) -> Result<bool> {
        let Some(job) = self.claim_next(queue).await? else {
            return Ok(false);
        };
        let outcome = processor.process(&job).await;
        self.settle(job, outcome).await?;
        Ok(true)
    }

    /// Binds a processor to a queue with bounded concurrency
    pub fn create_worker<P: JobProcessor>(
        &self,
        queue: &str,
        processor: P,
        options: WorkerOptions,
    ) -> Worker {
        Worker::spawn(self.clone(), queue, Arc::new(processor), options)
    }
}
