//! Exponential backoff for transient backend failures.

use std::future::Future;
use std::time::Duration;

/// Backoff schedule: exponential from `initial_delay` to `max_delay`, with
/// up to `max_attempts` tries and proportional jitter on every delay.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Ceiling on any single delay.
    pub max_delay: Duration,
    /// Total attempts, including the first.
    pub max_attempts: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            max_attempts: 3,
        }
    }
}

impl BackoffPolicy {
    /// Jittered delay before retry number `attempt` (1-based: the delay
    /// after the first failure is `delay(1)`).
    pub fn delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        let base = self
            .initial_delay
            .saturating_mul(2_u32.saturating_pow(exp))
            .min(self.max_delay);
        // Jitter in [0.5, 1.0) of the base keeps concurrent retries spread out.
        base.mul_f64(0.5 + fastrand::f64() * 0.5)
    }

    /// Run `op` until it succeeds or the attempt budget is spent. The
    /// closure receives the 1-based attempt number.
    pub async fn run<T, E, F, Fut>(&self, op: F) -> Result<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.run_if(|_| true, op).await
    }

    /// Like [`BackoffPolicy::run`], but only errors `retryable` approves are
    /// retried; anything else surfaces immediately.
    pub async fn run_if<T, E, F, Fut, P>(&self, mut retryable: P, mut op: F) -> Result<T, E>
    where
        P: FnMut(&E) -> bool,
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let attempts = self.max_attempts.max(1);
        let mut last_err = None;
        for attempt in 1..=attempts {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    let retry = attempt < attempts && retryable(&err);
                    last_err = Some(err);
                    if !retry {
                        break;
                    }
                    tokio::time::sleep(self.delay(attempt)).await;
                }
            }
        }
        // max_attempts >= 1, so at least one error was recorded.
        Err(last_err.expect("at least one attempt runs"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delays_grow_and_cap() {
        let policy = BackoffPolicy::default();
        // Jitter keeps delays in [0.5, 1.0) of the exponential base.
        let d1 = policy.delay(1);
        assert!(d1 >= Duration::from_millis(50) && d1 < Duration::from_millis(100));
        let d2 = policy.delay(2);
        assert!(d2 >= Duration::from_millis(100) && d2 < Duration::from_millis(200));
        let d10 = policy.delay(10);
        assert!(d10 <= Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_run_retries_until_success() {
        let policy = BackoffPolicy {
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            max_attempts: 3,
        };
        let mut calls = 0;
        let result: Result<u32, &str> = policy
            .run(|attempt| {
                calls += 1;
                async move {
                    if attempt < 3 {
                        Err("transient")
                    } else {
                        Ok(attempt)
                    }
                }
            })
            .await;
        assert_eq!(result, Ok(3));
        assert_eq!(calls, 3);
    }

    #[tokio::test]
    async fn test_run_surfaces_last_error_when_budget_spent() {
        let policy = BackoffPolicy {
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            max_attempts: 2,
        };
        let result: Result<(), String> = policy
            .run(|attempt| async move { Err(format!("failure {attempt}")) })
            .await;
        assert_eq!(result, Err("failure 2".to_string()));
    }

    #[tokio::test]
    async fn test_run_if_skips_retry_for_terminal_errors() {
        let policy = BackoffPolicy {
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            max_attempts: 3,
        };
        let mut calls = 0;
        let result: Result<(), &str> = policy
            .run_if(
                |e: &&str| *e == "transient",
                |_| {
                    calls += 1;
                    async { Err("terminal") }
                },
            )
            .await;
        assert_eq!(result, Err("terminal"));
        assert_eq!(calls, 1, "terminal errors must not be retried");
    }
}
