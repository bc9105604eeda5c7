//! Queue job records and request/response shapes

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

use crate::retry::Backoff;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Waiting,
    Delayed,
    Active,
    Completed,
    Failed,
}

impl JobState {
    pub fn is_queued(self) -> bool {
        matches!(self, JobState::Waiting | JobState::Delayed)
    }
}

/// A job owned by a queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueJob {
    pub id: String,
    pub queue: String,
    pub name: String,
    pub payload: serde_json::Value,
    pub state: JobState,
    /// Processor invocations so far
    pub attempts_made: u32,
    pub max_attempts: u32,
    #[serde(default)]
    pub backoff: Option<Backoff>,
    /// Earliest time the job may run
    pub run_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub failure_reason: Option<String>,
    /// Repeat registration this job was fired from
    #[serde(default)]
    pub repeat_id: Option<String>,
}

impl QueueJob {
    pub fn new(queue: &str, name: &str, payload: serde_json::Value, max_attempts: u32) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            queue: queue.to_string(),
            name: name.to_string(),
            payload,
            state: JobState::Waiting,
            attempts_made: 0,
            max_attempts: max_attempts.max(1),
            backoff: None,
            run_at: now,
            created_at: now,
            processed_at: None,
            finished_at: None,
            failure_reason: None,
            repeat_id: None,
        }
    }

    /// Whether another attempt is allowed after the current one failed
    pub fn can_retry(&self) -> bool {
        self.attempts_made < self.max_attempts
    }

    /// Payload deserialized into the processor's payload type
    pub fn payload_as<T: serde::de::DeserializeOwned>(
        &self,
    ) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.payload.clone())
    }
}

/// Per-job overrides for `add`
#[derive(Debug, Clone, Default)]
pub struct JobOptions {
    pub delay: Option<Duration>,
    pub attempts: Option<u32>,
    pub backoff: Option<Backoff>,
}

impl JobOptions {
    pub fn delayed(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }
}

/// Result of an operation that may be refused without a transport failure
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueOutcome {
    Done,
    Rejected(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClearFilter {
    Completed,
    Failed,
    /// Completed, failed, waiting and delayed; active jobs are left alone
    All,
}

impl ClearFilter {
    pub fn states(self) -> &'static [JobState] {
        match self {
            ClearFilter::Completed => &[JobState::Completed],
            ClearFilter::Failed => &[JobState::Failed],
            ClearFilter::All => &[
                JobState::Completed,
                JobState::Failed,
                JobState::Waiting,
                JobState::Delayed,
            ],
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueCounts {
    pub waiting: u64,
    pub delayed: u64,
    pub active: u64,
    pub completed: u64,
    pub failed: u64,
}

/// How many finished jobs a queue keeps per state; older ones are dropped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Retention {
    pub completed: usize,
    pub failed: usize,
}

impl Retention {
    pub fn keep(&self, state: JobState) -> Option<usize> {
        match state {
            JobState::Completed => Some(self.completed),
            JobState::Failed => Some(self.failed),
            _ => None,
        }
    }
}

impl Default for Retention {
    fn default() -> Self {
        Self {
            completed: 1000,
            failed: 5000,
        }
    }
}
