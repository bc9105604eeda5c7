//! Source polling domain types
//!
//! Sources are external systems that accept a search, run it as an
//! asynchronous job on their side and hand back pages of items. The polling
//! state below is the continuation token threaded between successive
//! source-query invocations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Internal vocabulary for the status of an external async job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AsyncSourceJobStatus {
    Submitted,
    Pending,
    Processing,
    Done,
    Error,
    Timeout,
}

impl AsyncSourceJobStatus {
    /// Maps a source's own status string onto the internal vocabulary
    ///
    /// Unknown values are treated as still processing.
    pub fn from_external(status: &str) -> Self {
        match status.trim().to_ascii_lowercase().as_str() {
            "queued" | "submitted" => Self::Submitted,
            "pending" => Self::Pending,
            "done" | "complete" | "completed" | "succeeded" | "success" => Self::Done,
            "error" | "failed" | "failure" => Self::Error,
            "timeout" | "timed_out" | "expired" => Self::Timeout,
            _ => Self::Processing,
        }
    }
}

/// Progress of the outstanding external job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AsyncSourceJobProgress {
    pub external_job_id: String,
    pub status: AsyncSourceJobStatus,
    pub submitted_at: DateTime<Utc>,
    pub last_checked_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

impl AsyncSourceJobProgress {
    pub fn submitted(external_job_id: impl Into<String>) -> Self {
        Self {
            external_job_id: external_job_id.into(),
            status: AsyncSourceJobStatus::Submitted,
            submitted_at: Utc::now(),
            last_checked_at: None,
            error_message: None,
        }
    }
}

/// Continuation token passed between source-query invocations
///
/// `current_async_job` is `None` exactly when no external job is outstanding.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResumablePollingState {
    #[serde(default)]
    pub latest_processed_cursor: Option<String>,
    #[serde(default)]
    pub current_async_job: Option<AsyncSourceJobProgress>,
    /// Items dispatched so far in this run; next item index
    #[serde(default)]
    pub items_dispatched: u64,
    /// Source-specific fields carried along untouched
    #[serde(flatten)]
    pub platform: serde_json::Map<String, serde_json::Value>,
}

/// Search submitted to a source plugin
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRequest {
    pub search: serde_json::Value,
    pub cursor: Option<String>,
}

/// One item discovered by a source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceItem {
    pub external_id: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

/// One page of results of a finished external job
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourcePage {
    #[serde(default)]
    pub items: Vec<SourceItem>,
    #[serde(default)]
    pub page_size: usize,
    #[serde(default)]
    pub cursor: Option<String>,
}

impl SourcePage {
    /// A full page suggests the source has more data behind it
    pub fn is_full(&self) -> bool {
        self.page_size > 0 && self.items.len() >= self.page_size
    }
}
