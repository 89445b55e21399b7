//! Retry policy with exponential backoff.
//!
//! Every attempt runs under a hard timeout; retryable failures back off
//! exponentially with jitter, honouring a provider's retry-after hint.

use rand::Rng;
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::ProviderConfig;
use crate::error::{GatewayError, TransportError};

/// Errors a [`RetryPolicy`] knows how to classify.
pub trait Retryable: Display {
    fn is_retryable(&self) -> bool;

    /// Server-provided wait hint, if any.
    fn retry_after(&self) -> Option<Duration>;

    /// The error reported when an attempt exceeds its timeout.
    fn timed_out(after: Duration) -> Self;
}

impl Retryable for TransportError {
    fn is_retryable(&self) -> bool {
        TransportError::is_retryable(self)
    }

    fn retry_after(&self) -> Option<Duration> {
        TransportError::retry_after(self)
    }

    fn timed_out(after: Duration) -> Self {
        TransportError::Timeout(after)
    }
}

impl Retryable for GatewayError {
    fn is_retryable(&self) -> bool {
        matches!(self, GatewayError::Transport(e) if e.is_retryable())
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            GatewayError::Transport(e) => e.retry_after(),
            _ => None,
        }
    }

    fn timed_out(after: Duration) -> Self {
        GatewayError::Transport(TransportError::Timeout(after))
    }
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, the first one included
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
    multiplier: f64,
    /// Jitter factor (0.0 - 1.0)
    jitter: f64,
    attempt_timeout: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
            multiplier: 2.0,
            jitter: 0.0,
            attempt_timeout: Duration::from_secs(30),
        }
    }

    pub fn from_config(config: &ProviderConfig) -> Self {
        Self::new(
            config.max_retries,
            Duration::from_millis(config.base_backoff_ms),
            Duration::from_millis(config.max_backoff_ms),
        )
        .with_jitter(config.backoff_jitter)
        .with_attempt_timeout(Duration::from_secs(config.timeout_secs))
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn attempt_timeout(&self) -> Duration {
        self.attempt_timeout
    }

    /// Delay after the given failed attempt (1-indexed).
    ///
    /// A server hint raises the delay but never past `max_delay`.
    pub fn delay_for_attempt(&self, attempt: u32, server_hint: Option<Duration>) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32) as i32;
        let base = self.base_delay.as_millis() as f64;
        let mut delay =
            (base * self.multiplier.powi(exponent)).min(self.max_delay.as_millis() as f64);

        if self.jitter > 0.0 {
            let jitter_range = delay * self.jitter;
            delay += rand::thread_rng().gen_range(-jitter_range..=jitter_range);
        }

        let delay = Duration::from_millis(delay.max(0.0) as u64);
        match server_hint {
            Some(hint) => delay.max(hint).min(self.max_delay),
            None => delay,
        }
    }

    /// Run `operation` until it succeeds, fails permanently, or attempts run out.
    ///
    /// The closure receives the 1-indexed attempt number.
    pub async fn execute<F, Fut, T, E>(&self, mut operation: F) -> Result<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Retryable,
    {
        let mut attempt = 1;
        loop {
            let error = match tokio::time::timeout(self.attempt_timeout, operation(attempt)).await
            {
                Ok(Ok(value)) => {
                    if attempt > 1 {
                        debug!(attempt, "Retry succeeded");
                    }
                    return Ok(value);
                }
                Ok(Err(error)) => error,
                Err(_) => E::timed_out(self.attempt_timeout),
            };

            if !error.is_retryable() {
                debug!(attempt, error = %error, "Non-retryable provider error");
                return Err(error);
            }
            if attempt >= self.max_attempts {
                warn!(
                    attempts = attempt,
                    error = %error,
                    "Retries exhausted"
                );
                return Err(error);
            }

            let delay = self.delay_for_attempt(attempt, error.retry_after());
            warn!(
                attempt,
                max_attempts = self.max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Retrying after error"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&ProviderConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(
            max_attempts,
            Duration::from_millis(500),
            Duration::from_secs(8),
        )
        .with_attempt_timeout(Duration::from_secs(10))
    }

    #[test]
    fn test_exponential_delays_are_capped() {
        let policy = policy(5);
        assert_eq!(policy.delay_for_attempt(1, None), Duration::from_millis(500));
        assert_eq!(policy.delay_for_attempt(2, None), Duration::from_millis(1000));
        assert_eq!(policy.delay_for_attempt(3, None), Duration::from_millis(2000));
        assert_eq!(policy.delay_for_attempt(10, None), Duration::from_secs(8));
    }

    #[test]
    fn test_server_hint_raises_delay_within_cap() {
        let policy = policy(5);
        assert_eq!(
            policy.delay_for_attempt(1, Some(Duration::from_secs(3))),
            Duration::from_secs(3)
        );
        assert_eq!(
            policy.delay_for_attempt(1, Some(Duration::from_secs(60))),
            Duration::from_secs(8)
        );
    }

    #[test]
    fn test_jitter_stays_in_range() {
        let policy = policy(5).with_jitter(0.25);
        for _ in 0..100 {
            let delay = policy.delay_for_attempt(2, None).as_millis();
            assert!((750..=1250).contains(&delay), "{delay}");
        }
    }

    #[test]
    fn test_zero_attempts_means_one() {
        assert_eq!(policy(0).max_attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_until_success() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<&str, TransportError> = policy(3)
            .execute(move |_| async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(TransportError::ServerError {
                        status: 503,
                        message: "overloaded".into(),
                    })
                } else {
                    Ok("done")
                }
            })
            .await;

        assert_eq!(result, Ok("done"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_returns_last_error() {
        let calls = AtomicU32::new(0);
        let result: Result<(), TransportError> = policy(3)
            .execute(|attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move { Err(TransportError::Network(format!("reset #{attempt}"))) }
            })
            .await;

        assert_eq!(result, Err(TransportError::Network("reset #3".into())));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_fails_immediately() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<(), TransportError> = policy(5)
            .execute(move |_| async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(TransportError::Auth {
                    status: 401,
                    message: "invalid api key".into(),
                })
            })
            .await;

        assert!(matches!(result, Err(TransportError::Auth { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempt_timeout_is_retryable() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, TransportError> = policy(2)
            .execute(|attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt == 1 {
                        std::future::pending::<()>().await;
                    }
                    Ok(attempt)
                }
            })
            .await;

        assert_eq!(result, Ok(2));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_waits_between_attempts() {
        let start = tokio::time::Instant::now();
        let _: Result<(), TransportError> = policy(3)
            .execute(|_| async { Err(TransportError::RateLimited { retry_after: None }) })
            .await;

        // 500ms after the first failure, 1000ms after the second
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(1500), "{elapsed:?}");
        assert!(elapsed < Duration::from_millis(1600), "{elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_gateway_errors_classified() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<(), GatewayError> = policy(4)
            .execute(move |_| async move {
                if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(GatewayError::Transport(TransportError::Network("reset".into())))
                } else {
                    Err(GatewayError::Rejected {
                        status: 400,
                        message: "bad request".into(),
                    })
                }
            })
            .await;

        assert!(matches!(result, Err(GatewayError::Rejected { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
