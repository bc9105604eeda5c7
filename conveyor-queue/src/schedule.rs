//! Cron-repeating registrations

use chrono::{DateTime, Utc};
use cron::Schedule;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::{QueueError, Result};

/// A repeating job, keyed by a caller-supplied id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepeatRegistration {
    pub id: String,
    pub queue: String,
    pub name: String,
    pub cron: String,
    pub payload: serde_json::Value,
    /// Next fire time; `None` when the expression never fires again
    pub next_run_at: Option<DateTime<Utc>>,
}

impl RepeatRegistration {
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.next_run_at.is_some_and(|at| at <= now)
    }
}

/// Parses a 5-field (minute precision) or 6/7-field cron expression
pub fn parse_cron(expr: &str) -> Result<Schedule> {
    let trimmed = expr.trim();
    let normalized = if trimmed.split_whitespace().count() == 5 {
        format!("0 {}", trimmed)
    } else {
        trimmed.to_string()
    };

    Schedule::from_str(&normalized).map_err(|e| QueueError::InvalidCron {
        expr: expr.to_string(),
        reason: e.to_string(),
    })
}

/// First fire time strictly after `after`
pub fn next_fire(expr: &str, after: DateTime<Utc>) -> Result<Option<DateTime<Utc>>> {
    Ok(parse_cron(expr)?.after(&after).next())
}
