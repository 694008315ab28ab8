use crate::error::CollaboratorError;
use std::future::Future;
use std::time::Duration;

/// Exponential backoff budget for transient collaborator failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Stop retrying once this much time has been spent on the operation.
    pub max_elapsed: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
            max_elapsed: None,
        }
    }
}

impl RetryPolicy {
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay before the next attempt, after `attempt` attempts have failed and `elapsed` time
    /// has passed. `None` means give up.
    pub fn next_delay(&self, attempt: u32, elapsed: Duration) -> Option<Duration> {
        if attempt == 0 || attempt >= self.max_attempts {
            return None;
        }
        let exponent = (attempt - 1).min(16);
        let delay = self
            .base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay);
        match self.max_elapsed {
            Some(budget) if elapsed.saturating_add(delay) > budget => None,
            _ => Some(delay),
        }
    }
}

/// Runs `op` until it succeeds, fails permanently, or the policy is exhausted.
pub async fn retry_transient<T, F, Fut>(
    policy: &RetryPolicy,
    what: &str,
    mut op: F,
) -> Result<T, CollaboratorError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, CollaboratorError>>,
{
    let started = tokio::time::Instant::now();
    let mut attempt: u32 = 0;
    loop {
        attempt += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if !err.is_transient() => return Err(err),
            Err(err) => match policy.next_delay(attempt, started.elapsed()) {
                Some(backoff) => {
                    tracing::warn!(what, attempt, ?backoff, error = %err, "transient failure; retrying");
                    tokio::time::sleep(backoff).await;
                }
                None => return Err(err),
            },
        }
    }
}

/// Bounds a single collaborator call. Elapsed time maps to a transient failure.
pub async fn with_timeout<T, Fut>(
    limit: Duration,
    what: &str,
    fut: Fut,
) -> Result<T, CollaboratorError>
where
    Fut: Future<Output = Result<T, CollaboratorError>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(res) => res,
        Err(_) => Err(CollaboratorError::timed_out(what, limit)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 4,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(300),
            max_elapsed: None,
        }
    }

    #[test]
    fn next_delay_doubles_and_caps() {
        let p = policy();
        let zero = Duration::ZERO;
        assert_eq!(p.next_delay(1, zero), Some(Duration::from_millis(100)));
        assert_eq!(p.next_delay(2, zero), Some(Duration::from_millis(200)));
        assert_eq!(p.next_delay(3, zero), Some(Duration::from_millis(300)));
        assert_eq!(p.next_delay(4, zero), None);
    }

    #[test]
    fn next_delay_respects_elapsed_budget() {
        let p = RetryPolicy {
            max_elapsed: Some(Duration::from_millis(250)),
            ..policy()
        };
        assert_eq!(p.next_delay(1, Duration::from_millis(100)), Some(Duration::from_millis(100)));
        assert_eq!(p.next_delay(2, Duration::from_millis(100)), None);
    }

    #[test]
    fn no_retry_never_delays() {
        assert_eq!(RetryPolicy::no_retry().next_delay(1, Duration::ZERO), None);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_transient_until_success() {
        let calls = AtomicU32::new(0);
        let res = retry_transient(&policy(), "op", || {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if n < 3 {
                    Err(CollaboratorError::Transient("busy".to_string()))
                } else {
                    Ok(n)
                }
            }
        })
        .await;
        assert_eq!(res, Ok(3));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_failure_is_not_retried() {
        let calls = AtomicU32::new(0);
        let res: Result<(), _> = retry_transient(&policy(), "op", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(CollaboratorError::Permanent("unknown ticker".to_string())) }
        })
        .await;
        assert!(matches!(res, Err(CollaboratorError::Permanent(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let res: Result<(), _> = retry_transient(&policy(), "op", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(CollaboratorError::Transient("503".to_string())) }
        })
        .await;
        assert!(res.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn with_timeout_maps_elapsed_to_transient() {
        let res: Result<(), _> = with_timeout(Duration::from_secs(1), "slow call", async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        assert!(matches!(res, Err(CollaboratorError::Transient(_))));
    }
}
