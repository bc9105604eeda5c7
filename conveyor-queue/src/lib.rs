//! Conveyor job queues
//!
//! Named queues with one-off, delayed and cron-repeating jobs, per-queue
//! retry policies, pause/resume, bulk clear and bounded-concurrency worker
//! pools. Storage goes through `QueueBackend` (Redis or in-memory).
//!
//! Delivery is at-least-once: a job whose worker dies mid-flight may be seen
//! again, so processors must be idempotent.

pub mod backend;
pub mod error;
pub mod job;
pub mod retry;
pub mod schedule;
pub mod service;
pub mod worker;

pub use backend::{InMemoryQueueBackend, QueueBackend, RedisQueueBackend};
pub use error::{QueueError, Result};
pub use job::{
    ClearFilter, JobOptions, JobState, QueueCounts, QueueJob, QueueOutcome, Retention,
};
pub use retry::{Backoff, RetryPolicy};
pub use schedule::RepeatRegistration;
pub use service::JobQueueService;
pub use worker::{JobProcessor, Worker, WorkerOptions};
