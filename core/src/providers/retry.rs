// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Classifying retry decorator for providers.
//!
//! Wraps any [`Provider`] and re-issues `generate` on transient failures.
//! Classification is substring-based over the rendered error message; the
//! marker lists are data so the contract stays inspectable and testable.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use super::error::ProviderError;
use super::Provider;

/// Markers indicating a transient failure worth another attempt.
const RETRYABLE_MARKERS: &[&str] = &[
    "429",
    "rate limit",
    "resource exhausted",
    "500",
    "502",
    "503",
    "504",
    "timeout",
    "deadline exceeded",
    "connection refused",
    "connection reset",
    "broken pipe",
    "temporary failure",
];

/// Markers indicating a permanent failure; these veto the list above.
const NON_RETRYABLE_MARKERS: &[&str] = &[
    "401",
    "authentication",
    "400",
    "invalid",
    "not found",
    "context length",
    "token limit",
    "maximum context",
    "context canceled",
    "model",
];

/// Classify an error message as retryable.
///
/// Evaluation order is part of the contract: explicit cancellation always
/// wins (even over `deadline exceeded`), a model error that is really a
/// timeout is retried, any other non-retryable marker vetoes, and only
/// then do the transient markers apply. Unknown messages are permanent.
pub fn is_retryable(message: &str) -> bool {
    let m = message.to_lowercase();
    if m.contains("context canceled") {
        return false;
    }
    if m.contains("model") && m.contains("timeout") {
        return true;
    }
    if NON_RETRYABLE_MARKERS.iter().any(|marker| m.contains(marker)) {
        return false;
    }
    RETRYABLE_MARKERS.iter().any(|marker| m.contains(marker))
}

/// Configuration for retry behaviour on transient errors.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total attempts including the first; 1 disables retrying.
    pub attempts: u32,
    /// Delay before the first retry.
    pub delay: Duration,
    /// Ceiling for the growing delay.
    pub max_delay: Duration,
    /// Backoff multiplier; a factor at or below 1.0 keeps the delay
    /// constant.
    pub factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            attempts: 3,
            delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            factor: 2.0,
        }
    }
}

impl RetryConfig {
    /// Delay before retry number `attempt` (0-indexed), with ±10% jitter
    /// when the backoff is exponential, capped at `max_delay`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if self.factor <= 1.0 {
            return self.delay.min(self.max_delay);
        }
        let ceiling = self.max_delay.as_secs_f64();
        let base = (self.delay.as_secs_f64() * self.factor.powi(attempt as i32)).min(ceiling);
        let jittered = base * (1.0 + (fastrand::f64() - 0.5) * 0.2);
        Duration::from_secs_f64(jittered.min(ceiling))
    }
}

/// Decorator that wraps a [`Provider`] with retry logic.
///
/// The wrapper is shared across runner tasks, so its statistics are
/// plain atomics; provider calls never serialize through it.
pub struct RetryProvider {
    inner: Arc<dyn Provider>,
    config: RetryConfig,
    calls_total: AtomicU64,
    retries_total: AtomicU64,
}

impl RetryProvider {
    /// Wrap `inner` with the given policy. With `attempts <= 1` the
    /// original provider is returned untouched.
    pub fn wrap(inner: Arc<dyn Provider>, config: RetryConfig) -> Arc<dyn Provider> {
        if config.attempts <= 1 {
            return inner;
        }
        Arc::new(Self {
            inner,
            config,
            calls_total: AtomicU64::new(0),
            retries_total: AtomicU64::new(0),
        })
    }

    /// Number of upstream `generate` calls issued through this wrapper.
    pub fn calls_total(&self) -> u64 {
        self.calls_total.load(Ordering::Relaxed)
    }

    /// Number of those calls that were retries.
    pub fn retries_total(&self) -> u64 {
        self.retries_total.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Provider for RetryProvider {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn enabled(&self) -> bool {
        self.inner.enabled()
    }

    async fn generate(
        &self,
        cancel: &CancellationToken,
        prompt: &str,
    ) -> Result<String, ProviderError> {
        let mut last_error: Option<ProviderError> = None;

        for attempt in 0..self.config.attempts {
            if cancel.is_cancelled() {
                // never start a fresh attempt after cancellation
                return Err(last_error.unwrap_or(ProviderError::Cancelled));
            }
            if attempt > 0 {
                self.retries_total.fetch_add(1, Ordering::Relaxed);
            }
            self.calls_total.fetch_add(1, Ordering::Relaxed);

            match self.inner.generate(cancel, prompt).await {
                Ok(text) => return Ok(text),
                Err(err) => {
                    let is_last = attempt + 1 == self.config.attempts;
                    if is_last || !is_retryable(&err.to_string()) {
                        return Err(err);
                    }

                    let delay = self.config.delay_for_attempt(attempt);
                    warn!(
                        provider = self.name(),
                        attempt = attempt + 1,
                        max_attempts = self.config.attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "retrying after transient error"
                    );

                    tokio::select! {
                        () = cancel.cancelled() => return Err(err),
                        () = tokio::time::sleep(delay) => {}
                    }
                    last_error = Some(err);
                }
            }
        }

        Err(last_error.unwrap_or(ProviderError::Cancelled))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    struct FlakyProvider {
        fail_first: u32,
        calls: AtomicU32,
        error: fn() -> ProviderError,
    }

    impl FlakyProvider {
        fn new(fail_first: u32, error: fn() -> ProviderError) -> Arc<Self> {
            Arc::new(Self {
                fail_first,
                calls: AtomicU32::new(0),
                error,
            })
        }
    }

    #[async_trait]
    impl Provider for FlakyProvider {
        fn name(&self) -> &str {
            "flaky"
        }

        fn enabled(&self) -> bool {
            true
        }

        async fn generate(
            &self,
            _cancel: &CancellationToken,
            _prompt: &str,
        ) -> Result<String, ProviderError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.fail_first {
                Err((self.error)())
            } else {
                Ok("done".to_string())
            }
        }
    }

    fn rate_limited() -> ProviderError {
        ProviderError::RateLimit("try later".to_string())
    }

    fn bad_auth() -> ProviderError {
        ProviderError::Authentication("bad key".to_string())
    }

    #[test]
    fn test_classification_retryable() {
        assert!(is_retryable("rate limit exceeded (429): slow down"));
        assert!(is_retryable("http 503: unavailable"));
        assert!(is_retryable("network error: connection refused"));
        assert!(is_retryable("network error: connection reset by peer"));
        assert!(is_retryable("timeout after 30s"));
        assert!(is_retryable("deadline exceeded"));
        assert!(is_retryable("temporary failure in name resolution"));
        assert!(is_retryable("resource exhausted"));
        assert!(is_retryable("broken pipe"));
    }

    #[test]
    fn test_classification_non_retryable() {
        assert!(!is_retryable("authentication failed (401): bad key"));
        assert!(!is_retryable("invalid request: missing field"));
        assert!(!is_retryable("http 400: bad request"));
        assert!(!is_retryable("model not found: gpt-9"));
        assert!(!is_retryable("context length exceeded: 20000 tokens"));
        assert!(!is_retryable("token limit reached"));
        assert!(!is_retryable("maximum context size reached"));
        assert!(!is_retryable("context canceled"));
        assert!(!is_retryable("something completely unknown"));
    }

    #[test]
    fn test_classification_precedence() {
        // cancellation wins even when a transient marker is present
        assert!(!is_retryable("deadline exceeded: context canceled"));
        // model errors are permanent unless they are really timeouts
        assert!(!is_retryable("model overloaded"));
        assert!(is_retryable("model request timeout"));
    }

    #[test]
    fn test_constant_delay_when_factor_not_above_one() {
        let config = RetryConfig {
            attempts: 5,
            delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            factor: 1.0,
        };
        assert_eq!(config.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(config.delay_for_attempt(4), Duration::from_millis(100));
    }

    #[test]
    fn test_exponential_delay_bounds() {
        let config = RetryConfig {
            attempts: 5,
            delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(60),
            factor: 2.0,
        };
        // attempt 2 → base 400ms, jitter keeps it within ±10%
        let delay = config.delay_for_attempt(2);
        assert!(delay >= Duration::from_millis(360), "{delay:?}");
        assert!(delay <= Duration::from_millis(440), "{delay:?}");
    }

    #[test]
    fn test_exponential_delay_caps_at_max() {
        let config = RetryConfig {
            attempts: 20,
            delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(5),
            factor: 2.0,
        };
        // jitter may pull the capped base down, never above the ceiling
        let delay = config.delay_for_attempt(10);
        assert!(delay <= Duration::from_secs(5), "{delay:?}");
        assert!(delay >= Duration::from_millis(4500), "{delay:?}");
    }

    #[test]
    fn test_wrap_is_identity_for_single_attempt() {
        let inner = FlakyProvider::new(0, rate_limited);
        let config = RetryConfig {
            attempts: 1,
            ..RetryConfig::default()
        };
        let wrapped = RetryProvider::wrap(inner.clone(), config);
        let inner_ptr = Arc::as_ptr(&inner).cast::<()>();
        let wrapped_ptr = Arc::as_ptr(&wrapped).cast::<()>();
        assert!(std::ptr::eq(inner_ptr, wrapped_ptr));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_transient_until_success() {
        let inner = FlakyProvider::new(2, rate_limited);
        let wrapped = RetryProvider::wrap(
            inner.clone(),
            RetryConfig {
                attempts: 4,
                delay: Duration::from_millis(10),
                max_delay: Duration::from_secs(1),
                factor: 2.0,
            },
        );
        let cancel = CancellationToken::new();
        let text = wrapped.generate(&cancel, "p").await.unwrap();
        assert_eq!(text, "done");
        assert_eq!(inner.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_error_is_not_retried() {
        let inner = FlakyProvider::new(5, bad_auth);
        let wrapped = RetryProvider::wrap(
            inner.clone(),
            RetryConfig {
                attempts: 4,
                delay: Duration::from_millis(1),
                ..RetryConfig::default()
            },
        );
        let cancel = CancellationToken::new();
        let err = wrapped.generate(&cancel, "p").await.unwrap_err();
        assert!(err.to_string().contains("authentication"));
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_attempts_return_last_error() {
        let inner = FlakyProvider::new(10, rate_limited);
        let wrapped = RetryProvider::wrap(
            inner.clone(),
            RetryConfig {
                attempts: 3,
                delay: Duration::from_millis(10),
                max_delay: Duration::from_secs(1),
                factor: 2.0,
            },
        );
        let cancel = CancellationToken::new();
        let err = wrapped.generate(&cancel, "p").await.unwrap_err();
        assert!(err.to_string().contains("rate limit"));
        assert_eq!(inner.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_cancellation_aborts_backoff_sleep() {
        let inner = FlakyProvider::new(10, rate_limited);
        let wrapped = RetryProvider::wrap(
            inner.clone(),
            RetryConfig {
                attempts: 5,
                delay: Duration::from_secs(3600),
                max_delay: Duration::from_secs(7200),
                factor: 1.0,
            },
        );
        let cancel = CancellationToken::new();
        let cancel_clone = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            cancel_clone.cancel();
        });

        let started = std::time::Instant::now();
        let err = wrapped.generate(&cancel, "p").await.unwrap_err();
        // returns the most recent provider error, not Cancelled
        assert!(err.to_string().contains("rate limit"));
        assert!(started.elapsed() < Duration::from_secs(60));
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);
    }
}
