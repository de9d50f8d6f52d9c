use std::future::Future;
use std::time::Duration;
use tracing::{error, warn};

use super::error::StoreError;

/// Exponential backoff for transient storage failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(5, Duration::from_millis(100))
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    /// Sleep after the given failed attempt (1-based): base, 2×base, 4×base, ...
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(attempt.saturating_sub(1))
    }

    /// Total time spent sleeping when every attempt fails.
    pub fn total_backoff(&self) -> Duration {
        (1..self.max_attempts).map(|a| self.delay_after(a)).sum()
    }
}

/// Runs `op` until it succeeds, fails permanently, or `max_attempts` transient
/// failures have been seen.
pub async fn retry_transient<T, F, Fut>(
    policy: &RetryPolicy,
    operation: &str,
    mut op: F,
) -> Result<T, StoreError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() => {
                if attempt >= policy.max_attempts {
                    error!(
                        "{} failed after {} attempts ({:?} of backoff) on a busy database: {}",
                        operation,
                        attempt,
                        policy.total_backoff(),
                        e
                    );
                    return Err(StoreError::RetriesExhausted {
                        attempts: attempt,
                        last: Box::new(e),
                    });
                }
                let delay = policy.delay_after(attempt);
                warn!(
                    "{} hit a busy database (attempt {}/{}), retrying in {:?}: {}",
                    operation, attempt, policy.max_attempts, delay, e
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn backoff_schedule_doubles() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_after(1), Duration::from_millis(100));
        assert_eq!(policy.delay_after(2), Duration::from_millis(200));
        assert_eq!(policy.delay_after(4), Duration::from_millis(800));
        assert_eq!(policy.total_backoff(), Duration::from_millis(1500));
    }

    #[tokio::test(start_paused = true)]
    async fn always_busy_gives_up_after_max_attempts() {
        let policy = RetryPolicy::default();
        let calls = AtomicU32::new(0);
        let started = tokio::time::Instant::now();

        let result: Result<(), StoreError> = retry_transient(&policy, "insert", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(StoreError::Busy("database is locked".into())) }
        })
        .await;

        assert!(matches!(
            result,
            Err(StoreError::RetriesExhausted { attempts: 5, .. })
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 5);
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(1500), "elapsed {elapsed:?}");
        assert!(elapsed < Duration::from_millis(1600), "elapsed {elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn recovers_when_lock_clears() {
        let policy = RetryPolicy::default();
        let calls = AtomicU32::new(0);

        let result = retry_transient(&policy, "update", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(StoreError::Busy("database is locked".into()))
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_errors_are_not_retried() {
        let policy = RetryPolicy::default();
        let calls = AtomicU32::new(0);

        let result: Result<(), StoreError> = retry_transient(&policy, "update", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(StoreError::InvalidScore(1.5)) }
        })
        .await;

        assert!(matches!(result, Err(StoreError::InvalidScore(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
