use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

/// Bounded retry with exponential backoff for async provider calls.
///
/// The policy is an explicit value handed to the executor; there is no
/// process-global retry state. Delays are deterministic (`base_delay * 2^i`,
/// no jitter), so observed wait times for back-to-back failures are
/// `D, 2D, 4D, ...`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the initial attempt; `0` means exactly one attempt.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(1000),
        }
    }
}

impl RetryPolicy {
    pub fn total_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

fn as_millis_u64(duration: Duration) -> u64 {
    duration.as_millis().min(u64::MAX as u128) as u64
}

/// Delay inserted after the failure of 0-based attempt `attempt`.
///
/// The shift saturates at 2^20 so pathological retry budgets cannot
/// overflow the multiplication; delays stay monotonically non-decreasing.
pub fn backoff_delay(policy: &RetryPolicy, attempt: u32) -> Duration {
    let base_ms = as_millis_u64(policy.base_delay);
    let multiplier = 1_u64 << attempt.min(20);
    Duration::from_millis(base_ms.saturating_mul(multiplier))
}

/// Runs `work` until it succeeds or the retry budget is exhausted.
///
/// Success on any attempt returns immediately with no further waiting.
/// Once `max_retries` retries have failed, the final attempt's error is
/// returned verbatim; failures are never wrapped or translated. Each
/// failed attempt is logged as `attempt={n}/{total}`.
pub async fn run_with_retry<T, E, F, Fut>(policy: &RetryPolicy, mut work: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let total = policy.total_attempts();
    let mut attempt = 0_u32;
    loop {
        match work().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                log::warn!(
                    "event=retry_attempt_failed attempt={}/{} err={}",
                    attempt + 1,
                    total,
                    err
                );
                if attempt >= policy.max_retries {
                    return Err(err);
                }
                tokio::time::sleep(backoff_delay(policy, attempt)).await;
                attempt += 1;
            }
        }
    }
}
