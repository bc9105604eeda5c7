//! Run domain types
//!
//! A run is one execution of a job's source + pipeline. It processes zero or
//! more items.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::job::JobStatus;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRun {
    pub id: Uuid,
    pub job_id: Uuid,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub items_discovered: u64,
    /// Latest processed source cursor when the run ended
    pub final_cursor: Option<String>,
}

impl JobRun {
    pub fn start(job_id: Uuid) -> Self {
        Self::start_with_id(Uuid::new_v4(), job_id)
    }

    pub fn start_with_id(id: Uuid, job_id: Uuid) -> Self {
        Self {
            id,
            job_id,
            status: RunStatus::Running,
            started_at: Utc::now(),
            completed_at: None,
            error: None,
            items_discovered: 0,
            final_cursor: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, RunStatus::Running)
    }
}

/// Latest observed state of a job, kept in the fast store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobLiveState {
    pub job_id: Uuid,
    pub job_status: JobStatus,
    pub current_run: Option<Uuid>,
    pub run_status: Option<RunStatus>,
    pub items_discovered: u64,
    pub last_error: Option<String>,
    pub updated_at: DateTime<Utc>,
}
