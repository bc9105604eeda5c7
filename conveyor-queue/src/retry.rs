//! Retry policy: how many attempts a job gets and how long to wait between them

use conveyor_core::dto::queue::{PIPELINE_EXECUTION_QUEUE, SOURCE_QUERY_QUEUE};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "delayMs", rename_all = "lowercase")]
pub enum Backoff {
    #[serde(with = "millis")]
    Fixed(Duration),
    /// `base * 2^(attempts - 1)`
    #[serde(with = "millis")]
    Exponential(Duration),
}

impl Backoff {
    /// Delay before the next attempt, given attempts made so far (1-indexed)
    pub fn delay_for(&self, attempts: u32) -> Duration {
        match *self {
            Backoff::Fixed(delay) => delay,
            Backoff::Exponential(base) => {
                let exponent = attempts.saturating_sub(1).min(20);
                base.saturating_mul(1u32 << exponent)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub backoff: Backoff,
}

impl RetryPolicy {
    /// Default policy of a named queue
    pub fn for_queue(queue: &str) -> Self {
        match queue {
            SOURCE_QUERY_QUEUE => Self {
                attempts: 3,
                backoff: Backoff::Exponential(Duration::from_secs(5)),
            },
            PIPELINE_EXECUTION_QUEUE => Self {
                attempts: 3,
                backoff: Backoff::Exponential(Duration::from_secs(2)),
            },
            _ => Self::default(),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 1,
            backoff: Backoff::Fixed(Duration::ZERO),
        }
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_backoff_doubles() {
        let backoff = Backoff::Exponential(Duration::from_secs(2));
        assert_eq!(backoff.delay_for(1), Duration::from_secs(2));
        assert_eq!(backoff.delay_for(2), Duration::from_secs(4));
        assert_eq!(backoff.delay_for(3), Duration::from_secs(8));
    }

    #[test]
    fn test_fixed_backoff() {
        let backoff = Backoff::Fixed(Duration::from_millis(250));
        assert_eq!(backoff.delay_for(1), backoff.delay_for(7));
    }

    #[test]
    fn test_named_queue_defaults() {
        let source = RetryPolicy::for_queue(SOURCE_QUERY_QUEUE);
        assert_eq!(source.attempts, 3);
        assert_eq!(source.backoff, Backoff::Exponential(Duration::from_secs(5)));

        let pipeline = RetryPolicy::for_queue(PIPELINE_EXECUTION_QUEUE);
        assert_eq!(pipeline.backoff, Backoff::Exponential(Duration::from_secs(2)));

        assert_eq!(RetryPolicy::for_queue("other"), RetryPolicy::default());
    }

    #[test]
    fn test_backoff_serializes_in_millis() {
        let json = serde_json::to_value(Backoff::Exponential(Duration::from_secs(5))).unwrap();
        assert_eq!(json, serde_json::json!({"type": "exponential", "delayMs": 5000}));
    }
}
