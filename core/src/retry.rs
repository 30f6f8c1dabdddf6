//! Centralized retry policy with exponential backoff.
//!
//! Every boundary that retries (downloads, embedding calls, analysis
//! triggers) goes through one of these helpers so the backoff shape is
//! uniform: `base * factor^n`, capped.

use std::time::Duration;

/// Exponential backoff policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base: Duration,
    pub factor: u32,
    pub cap: Duration,
}

impl RetryPolicy {
    pub const fn new(max_attempts: u32, base: Duration, factor: u32, cap: Duration) -> Self {
        Self {
            max_attempts,
            base,
            factor,
            cap,
        }
    }

    /// Delay before retry `attempt` (0-based): `base * factor^attempt`,
    /// saturating at the cap.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let multiplier = self.factor.checked_pow(attempt).unwrap_or(u32::MAX);
        let delay = self.base.checked_mul(multiplier).unwrap_or(self.cap);
        delay.min(self.cap)
    }
}

/// Retry an async operation under a policy.
///
/// Returns the first success, or `(last_error, attempts)` once the policy
/// is exhausted. Transient failures are logged with their attempt number.
pub async fn retry<F, Fut, T, E>(policy: &RetryPolicy, mut operation: F) -> Result<T, (E, u32)>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempts = 0u32;

    loop {
        attempts += 1;
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                if attempts >= policy.max_attempts {
                    return Err((e, attempts));
                }
                let delay = policy.delay_for(attempts - 1);
                tracing::warn!(
                    error = %e,
                    attempt = attempts,
                    delay_ms = delay.as_millis() as u64,
                    "Retrying after transient error"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    const POLICY: RetryPolicy = RetryPolicy::new(
        3,
        Duration::from_millis(10),
        2,
        Duration::from_millis(25),
    );

    #[test]
    fn test_delay_sequence_doubles_and_caps() {
        let policy = RetryPolicy::new(4, Duration::from_secs(30), 2, Duration::from_secs(600));
        assert_eq!(policy.delay_for(0), Duration::from_secs(30));
        assert_eq!(policy.delay_for(1), Duration::from_secs(60));
        assert_eq!(policy.delay_for(2), Duration::from_secs(120));
        assert_eq!(policy.delay_for(10), Duration::from_secs(600));
    }

    #[test]
    fn test_delay_never_overflows() {
        let policy = RetryPolicy::new(100, Duration::from_secs(30), 2, Duration::from_secs(600));
        assert_eq!(policy.delay_for(u32::MAX), Duration::from_secs(600));
    }

    #[tokio::test]
    async fn test_success_on_first_try() {
        let result: Result<u32, (&str, u32)> = retry(&POLICY, || async { Ok(7) }).await;
        assert_eq!(result.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_success_after_transient_failures() {
        let attempts = RefCell::new(0);
        let result = retry(&POLICY, || {
            *attempts.borrow_mut() += 1;
            let n = *attempts.borrow();
            async move {
                if n < 3 { Err("transient") } else { Ok(n) }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_exhaustion_reports_attempt_count() {
        let result: Result<(), (&str, u32)> =
            retry(&POLICY, || async { Err("persistent") }).await;
        let (error, attempts) = result.unwrap_err();
        assert_eq!(error, "persistent");
        assert_eq!(attempts, 3);
    }
}
