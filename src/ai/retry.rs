//! Retry Driver
//!
//! A batch attempt reports an [`Outcome`]; [`RetryPolicy::run`] owns the
//! attempt ceiling and the backoff curve and decides whether to try again.
//!
//! ## Usage
//!
//! ```ignore
//! let policy = RetryPolicy::from_config(&config.retry);
//! let result = policy
//!     .run(|attempt| async move {
//!         match call(attempt).await {
//!             Ok(value) => Outcome::Success(value),
//!             Err(e) if e.is_retryable() => {
//!                 Outcome::Retryable(RetryReason::Transient(e.to_string()))
//!             }
//!             Err(e) => Outcome::Fatal(e.into()),
//!         }
//!     })
//!     .await;
//! ```

use rand::Rng;
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::debug;

use crate::config::RetryConfig;
use crate::types::LensError;

#[derive(Debug, Clone, PartialEq)]
pub enum RetryReason {
    /// Local rate budget exhausted
    Deny { wait: Duration },
    /// Remote 429
    Throttled { retry_after: Option<Duration> },
    /// Network error, 5xx, unparseable response
    Transient(String),
}

impl fmt::Display for RetryReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetryReason::Deny { wait } => write!(f, "rate budget denied (wait {:?})", wait),
            RetryReason::Throttled { retry_after } => match retry_after {
                Some(after) => write!(f, "provider throttled (retry after {:?})", after),
                None => write!(f, "provider throttled"),
            },
            RetryReason::Transient(message) => write!(f, "transient failure: {}", message),
        }
    }
}

/// Result of a single attempt
#[derive(Debug)]
pub enum Outcome<T> {
    Success(T),
    Retryable(RetryReason),
    Fatal(LensError),
}

#[derive(Debug)]
pub struct Retried<T> {
    pub value: T,
    /// Attempts made, the successful one included
    pub attempts: u32,
}

#[derive(Debug)]
pub enum RetryFailure {
    Exhausted { attempts: u32, last: RetryReason },
    Fatal { attempts: u32, error: LensError },
}

impl RetryFailure {
    pub fn attempts(&self) -> u32 {
        match self {
            RetryFailure::Exhausted { attempts, .. } | RetryFailure::Fatal { attempts, .. } => {
                *attempts
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub backoff_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            backoff_factor: config.backoff_factor.max(1.0),
        }
    }

    /// Delay before the next attempt, given the backoff step reached so far
    fn delay_for(&self, reason: &RetryReason, current: Duration) -> Duration {
        match reason {
            RetryReason::Deny { wait } => *wait,
            RetryReason::Throttled {
                retry_after: Some(after),
            } => (*after).min(self.max_delay),
            RetryReason::Throttled { retry_after: None } | RetryReason::Transient(_) => {
                (current + random_jitter(current)).min(self.max_delay)
            }
        }
    }

    /// Drive `attempt` until it succeeds, fails fatally or runs out of attempts.
    ///
    /// The closure receives the 1-based attempt number. Local denials sleep the
    /// bounded wait and consume an attempt like any other retryable outcome.
    pub async fn run<T, F, Fut>(&self, mut attempt: F) -> Result<Retried<T>, RetryFailure>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Outcome<T>>,
    {
        let mut attempts = 0u32;
        let mut current_delay = self.base_delay;

        loop {
            match attempt(attempts + 1).await {
                Outcome::Success(value) => {
                    return Ok(Retried {
                        value,
                        attempts: attempts + 1,
                    });
                }
                Outcome::Fatal(error) => {
                    return Err(RetryFailure::Fatal {
                        attempts: attempts + 1,
                        error,
                    });
                }
                Outcome::Retryable(reason) => {
                    attempts += 1;
                    if attempts >= self.max_attempts {
                        return Err(RetryFailure::Exhausted {
                            attempts,
                            last: reason,
                        });
                    }
                    let delay = self.delay_for(&reason, current_delay);
                    debug!(
                        attempt = attempts,
                        delay_ms = delay.as_millis() as u64,
                        reason = %reason,
                        "Retrying after backoff"
                    );
                    sleep(delay).await;
                    // Denials wait out the window and leave the backoff curve alone
                    if !matches!(reason, RetryReason::Deny { .. }) {
                        current_delay =
                            calculate_backoff(current_delay, self.backoff_factor, self.max_delay);
                    }
                }
            }
        }
    }
}

/// Random jitter of up to a quarter of the delay
fn random_jitter(base_delay: Duration) -> Duration {
    let max_jitter_ms = (base_delay.as_millis() as u64) / 4;
    if max_jitter_ms == 0 {
        return Duration::ZERO;
    }
    let jitter_ms = rand::rng().random_range(0..max_jitter_ms);
    Duration::from_millis(jitter_ms)
}

/// Exponential backoff with cap
fn calculate_backoff(current: Duration, factor: f64, max: Duration) -> Duration {
    let next = Duration::from_secs_f64(current.as_secs_f64() * factor);
    std::cmp::min(next, max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            backoff_factor: 2.0,
        }
    }

    #[tokio::test]
    async fn test_succeeds_after_transient_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let result = fast_policy(3)
            .run(|_| {
                let counter = Arc::clone(&counter);
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                        Outcome::Retryable(RetryReason::Transient("502".into()))
                    } else {
                        Outcome::Success("ok")
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(result.value, "ok");
        assert_eq!(result.attempts, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhausts_attempt_ceiling() {
        let result: Result<Retried<()>, _> = fast_policy(3)
            .run(|_| async {
                Outcome::Retryable(RetryReason::Throttled { retry_after: None })
            })
            .await;

        match result {
            Err(RetryFailure::Exhausted { attempts, last }) => {
                assert_eq!(attempts, 3);
                assert_eq!(last, RetryReason::Throttled { retry_after: None });
            }
            other => panic!("expected exhaustion, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_fatal_stops_immediately() {
        let calls = AtomicU32::new(0);
        let result: Result<Retried<()>, _> = fast_policy(3)
            .run(|_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Outcome::Fatal(LensError::config("bad key")) }
            })
            .await;

        assert!(matches!(result, Err(RetryFailure::Fatal { attempts: 1, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_denials_consume_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<Retried<()>, _> = fast_policy(3)
            .run(|_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async {
                    Outcome::Retryable(RetryReason::Deny {
                        wait: Duration::from_millis(1),
                    })
                }
            })
            .await;

        match result {
            Err(RetryFailure::Exhausted { attempts, last }) => {
                assert_eq!(attempts, 3);
                assert!(matches!(last, RetryReason::Deny { .. }));
            }
            other => panic!("expected exhaustion, got {:?}", other),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_denial_then_success() {
        let calls = AtomicU32::new(0);
        let result = fast_policy(3)
            .run(|attempt| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Outcome::Retryable(RetryReason::Deny {
                            wait: Duration::from_millis(1),
                        })
                    } else {
                        Outcome::Success(attempt)
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(result.value, 3);
        assert_eq!(result.attempts, 3);
    }

    #[test]
    fn test_delay_is_capped() {
        let policy = RetryPolicy::default();
        let throttled = RetryReason::Throttled {
            retry_after: Some(Duration::from_secs(30)),
        };
        assert_eq!(
            policy.delay_for(&throttled, policy.base_delay),
            Duration::from_secs(2)
        );
        let transient = RetryReason::Transient("timeout".into());
        assert!(policy.delay_for(&transient, Duration::from_secs(5)) <= Duration::from_secs(2));
    }

    #[test]
    fn test_calculate_backoff() {
        let next = calculate_backoff(Duration::from_millis(250), 2.0, Duration::from_secs(2));
        assert_eq!(next, Duration::from_millis(500));
        let capped = calculate_backoff(Duration::from_millis(1_500), 2.0, Duration::from_secs(2));
        assert_eq!(capped, Duration::from_secs(2));
    }

    #[test]
    fn test_random_jitter() {
        let jitter = random_jitter(Duration::from_millis(1_000));
        assert!(jitter < Duration::from_millis(250));
        assert_eq!(random_jitter(Duration::from_millis(2)), Duration::ZERO);
    }
}
