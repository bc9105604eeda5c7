//! Retry with exponential backoff

use conveyor_core::Result;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Runs `op` until it succeeds, `should_retry` rejects its error, or
/// `max_retries` retries are used up. The n-th retry waits `base * 2^(n-1)`.
pub async fn with_backoff<T, F, Fut, P>(
    max_retries: u32,
    base: Duration,
    mut op: F,
    should_retry: P,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
    P: Fn(&conveyor_core::Error) -> bool,
{
    let mut retries = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if retries < max_retries && should_retry(&e) => {
                let delay = base.saturating_mul(1u32 << retries.min(20));
                retries += 1;
                warn!(
                    "Attempt {}/{} failed, retrying in {:?}: {}",
                    retries,
                    max_retries + 1,
                    delay,
                    e
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}
