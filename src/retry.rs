//! Exponential backoff for transient failures
//!
//! [`RetryConfig`] describes a backoff curve. The controller uses it to pick
//! the requeue delay after a failed reconcile, and [`retry_with_backoff`]
//! uses it to retry startup calls such as installing the CRD.

use std::time::Duration;

use rand::Rng;
use tracing::{error, warn};

/// Shape of an exponential backoff curve
#[derive(Clone, Debug, PartialEq)]
pub struct RetryConfig {
    /// Maximum number of attempts (0 = infinite)
    pub max_attempts: u32,
    /// Delay after the first failure
    pub initial_delay: Duration,
    /// Upper bound on any single delay
    pub max_delay: Duration,
    /// Multiplier applied per consecutive failure
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 0,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Create a config with a maximum number of attempts
    pub fn with_max_attempts(attempts: u32) -> Self {
        Self {
            max_attempts: attempts,
            ..Default::default()
        }
    }

    /// Backoff used between failed reconciles of one NatPMP resource
    ///
    /// Starts at 5s and caps at 5 minutes. Attempts are unbounded because
    /// the controller keeps retrying until the resource converges.
    pub fn reconcile() -> Self {
        Self {
            max_attempts: 0,
            initial_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(300),
            backoff_multiplier: 2.0,
        }
    }

    /// Delay before retrying after `failures` consecutive failures
    ///
    /// `failures` starts at 1. The result grows by `backoff_multiplier` per
    /// failure and never exceeds `max_delay`.
    pub fn delay_for(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(63) as i32;
        let secs = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        let capped = secs.min(self.max_delay.as_secs_f64());
        if capped.is_finite() && capped >= 0.0 {
            Duration::from_secs_f64(capped)
        } else {
            self.max_delay
        }
    }

    fn exhausted(&self, attempt: u32) -> bool {
        self.max_attempts > 0 && attempt >= self.max_attempts
    }
}

/// Spread `delay` over 0.5x to 1.5x so concurrent retries do not line up
pub fn with_jitter(delay: Duration) -> Duration {
    let jitter = rand::thread_rng().gen_range(0.5..1.5);
    Duration::from_secs_f64(delay.as_secs_f64() * jitter)
}

/// Run `operation` until it succeeds or the attempts run out
///
/// Returns the last error once `max_attempts` is reached.
pub async fn retry_with_backoff<F, Fut, T, E>(
    config: &RetryConfig,
    operation_name: &str,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt = 0u32;

    loop {
        attempt += 1;

        let e = match operation().await {
            Ok(result) => return Ok(result),
            Err(e) => e,
        };

        if config.exhausted(attempt) {
            error!(operation = %operation_name, attempt, error = %e, "giving up after max attempts");
            return Err(e);
        }

        let delay = with_jitter(config.delay_for(attempt));
        warn!(
            operation = %operation_name,
            attempt,
            error = %e,
            delay_ms = delay.as_millis() as u64,
            "operation failed, retrying"
        );
        tokio::time::sleep(delay).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast() -> RetryConfig {
        RetryConfig {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(10),
            backoff_multiplier: 2.0,
        }
    }

    #[rstest]
    #[case::first(1, 5)]
    #[case::second(2, 10)]
    #[case::third(3, 20)]
    #[case::capped(8, 300)]
    #[case::far_past_cap(1_000, 300)]
    fn reconcile_backoff_doubles_until_cap(#[case] failures: u32, #[case] secs: u64) {
        assert_eq!(
            RetryConfig::reconcile().delay_for(failures),
            Duration::from_secs(secs)
        );
    }

    #[test]
    fn zero_failures_uses_initial_delay() {
        assert_eq!(RetryConfig::reconcile().delay_for(0), Duration::from_secs(5));
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let base = Duration::from_secs(10);
        for _ in 0..100 {
            let d = with_jitter(base);
            assert!(d >= Duration::from_secs(5));
            assert!(d <= Duration::from_secs(15));
        }
    }

    #[tokio::test]
    async fn test_succeeds_after_failures() {
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();

        let result: Result<&str, &str> = retry_with_backoff(&fast(), "install_crd", || {
            let c = c.clone();
            async move {
                if c.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err("apiserver unavailable")
                } else {
                    Ok("installed")
                }
            }
        })
        .await;

        assert_eq!(result, Ok("installed"));
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_returns_last_error_when_exhausted() {
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();

        let result: Result<(), String> = retry_with_backoff(&fast(), "install_crd", || {
            let c = c.clone();
            async move {
                let n = c.fetch_add(1, Ordering::SeqCst);
                Err(format!("attempt {n} failed"))
            }
        })
        .await;

        assert_eq!(result, Err("attempt 2 failed".to_string()));
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }
}
