//! Queue storage backends

mod memory;
mod redis_backend;

pub use memory::InMemoryQueueBackend;
pub use redis_backend::RedisQueueBackend;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::job::{JobState, QueueCounts, QueueJob, QueueOutcome};
use crate::schedule::RepeatRegistration;

/// Storage primitives a queue is built from
///
/// Backends keep each job's `state` field in step with the container it
/// sits in. Policy (attempt counting, backoff, clear filters) lives in
/// `JobQueueService`.
#[async_trait]
pub trait QueueBackend: Send + Sync {
    /// Stores a new job as waiting, or as delayed when `run_at` is in the future
    async fn enqueue(&self, job: &QueueJob) -> Result<()>;

    async fn get(&self, queue: &str, id: &str) -> Result<Option<QueueJob>>;

    /// Overwrites a job record without moving it between states
    async fn update(&self, job: &QueueJob) -> Result<()>;

    /// Moves delayed jobs whose time has come to waiting
    async fn promote_due(&self, queue: &str, now: DateTime<Utc>) -> Result<u64>;

    /// Takes the oldest waiting job and marks it active; `None` when the
    /// queue is empty or paused
    async fn claim(&self, queue: &str, now: DateTime<Utc>) -> Result<Option<QueueJob>>;

    /// Moves an active job to completed or failed, or back to delayed when
    /// its state says so
    async fn finish(&self, job: &QueueJob) -> Result<()>;

    /// Deletes a job unless it is active
    async fn remove(&self, queue: &str, id: &str) -> Result<QueueOutcome>;

    /// Re-queues a finished job as waiting; refuses active and queued jobs
    async fn retry(&self, queue: &str, id: &str) -> Result<QueueOutcome>;

    async fn set_paused(&self, queue: &str, paused: bool) -> Result<()>;

    async fn is_paused(&self, queue: &str) -> Result<bool>;

    async fn ids_in(&self, queue: &str, state: JobState) -> Result<Vec<String>>;

    async fn counts(&self, queue: &str) -> Result<QueueCounts>;

    // Repeat registrations

    async fn upsert_repeat(&self, registration: &RepeatRegistration) -> Result<()>;

    async fn remove_repeat(&self, queue: &str, id: &str) -> Result<bool>;

    async fn list_repeats(&self, queue: &str) -> Result<Vec<RepeatRegistration>>;

    /// Moves a registration to `next_run_at` only while it is still stored
    /// exactly as `seen`; returns false when it was removed or replaced
    async fn advance_repeat(
        &self,
        seen: &RepeatRegistration,
        next_run_at: Option<DateTime<Utc>>,
    ) -> Result<bool>;

    /// Claims the right to fire `id` at `fire_at`; only the first caller wins
    async fn claim_fire(&self, queue: &str, id: &str, fire_at: DateTime<Utc>) -> Result<bool>;
}
