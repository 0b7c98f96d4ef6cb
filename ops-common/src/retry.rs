//! Retry policy implementation with exponential backoff.
//!
//! [`RetryPolicy::should_retry`] is a pure decision; [`RetryPolicy::execute`]
//! drives an async operation, sleeping between attempts.

use std::collections::HashSet;
use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::error::{OpsError, TransportErrorKind};

/// Status codes retried by default.
pub const DEFAULT_RETRYABLE_STATUS_CODES: &[u16] = &[408, 429, 500, 502, 503, 504];

/// Transport failures retried by default.
pub const DEFAULT_RETRYABLE_ERROR_KINDS: &[TransportErrorKind] = &[
    TransportErrorKind::ConnectionReset,
    TransportErrorKind::ConnectionRefused,
    TransportErrorKind::TimedOut,
    TransportErrorKind::DnsFailure,
    TransportErrorKind::DnsTemporaryFailure,
    TransportErrorKind::BrokenPipe,
    TransportErrorKind::HostUnreachable,
    TransportErrorKind::NetworkUnreachable,
];

/// Retry policy configuration.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts
    pub max_retries: u32,
    /// Initial delay between retries
    pub initial_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub multiplier: f64,
    /// Whether to add jitter to delays
    pub jitter: bool,
    /// HTTP status codes worth retrying
    pub retryable_status_codes: HashSet<u16>,
    /// Transport failures worth retrying
    pub retryable_error_kinds: HashSet<TransportErrorKind>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(1000),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: true,
            retryable_status_codes: DEFAULT_RETRYABLE_STATUS_CODES.iter().copied().collect(),
            retryable_error_kinds: DEFAULT_RETRYABLE_ERROR_KINDS.iter().copied().collect(),
        }
    }
}

impl RetryConfig {
    /// Create a new retry config with custom max retries.
    #[must_use]
    pub const fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Create a new retry config with custom initial delay.
    #[must_use]
    pub const fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Create a new retry config with custom max delay.
    #[must_use]
    pub const fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Create a new retry config with a custom backoff multiplier.
    #[must_use]
    pub const fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    /// Create a new retry config without jitter.
    #[must_use]
    pub const fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }

    /// Replace the set of retryable status codes.
    #[must_use]
    pub fn with_retryable_status_codes(mut self, codes: impl IntoIterator<Item = u16>) -> Self {
        self.retryable_status_codes = codes.into_iter().collect();
        self
    }
}

/// Outcome of a retry decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryDecision {
    /// Whether another attempt should be made
    pub retry: bool,
    /// How long to wait before it
    pub delay: Duration,
}

impl RetryDecision {
    const fn stop() -> Self {
        Self {
            retry: false,
            delay: Duration::ZERO,
        }
    }

    const fn after(delay: Duration) -> Self {
        Self { retry: true, delay }
    }
}

/// Details handed to a retry observer before each wait.
#[derive(Debug)]
pub struct RetryAttempt<'a> {
    /// Zero-based number of the attempt that just failed
    pub attempt: u32,
    /// Delay before the next attempt
    pub delay: Duration,
    /// The failure
    pub error: &'a OpsError,
}

/// Retry policy for executing operations with automatic retries.
#[derive(Debug, Clone, Default)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    /// Create a new retry policy with the given configuration.
    #[must_use]
    pub const fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Create a retry policy with default configuration.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(RetryConfig::default())
    }

    /// Get the configuration.
    #[must_use]
    pub const fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Calculate the delay for a given attempt number.
    ///
    /// `min(initial * multiplier^attempt, max)`, then a uniform ±25% jitter
    /// when enabled, truncated to whole milliseconds.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
    pub fn calculate_backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let base_delay =
            self.config.initial_delay.as_millis() as f64 * self.config.multiplier.powi(exponent);

        let delay_ms = base_delay.min(self.config.max_delay.as_millis() as f64);

        let final_delay = if self.config.jitter {
            let jitter_factor = 1.0 + (rand::random::<f64>() * 0.5 - 0.25);
            delay_ms * jitter_factor
        } else {
            delay_ms
        };

        Duration::from_millis(final_delay.max(0.0).floor() as u64)
    }

    /// Decide whether a failed attempt should be retried and after how long.
    ///
    /// Never retries once `attempt >= max_retries`. A `retry-after` header on
    /// a retryable status overrides the computed backoff.
    #[must_use]
    pub fn should_retry(&self, error: &OpsError, attempt: u32) -> RetryDecision {
        if attempt >= self.config.max_retries {
            return RetryDecision::stop();
        }

        if let Some(status) = error.status_code() {
            if self.config.retryable_status_codes.contains(&status) {
                let delay = error
                    .retry_after()
                    .and_then(parse_retry_after_header)
                    .unwrap_or_else(|| self.calculate_backoff_delay(attempt));
                return RetryDecision::after(delay);
            }
        } else if let Some(kind) = error.transport_kind() {
            if self.config.retryable_error_kinds.contains(&kind) {
                return RetryDecision::after(self.calculate_backoff_delay(attempt));
            }
        }

        RetryDecision::stop()
    }

    /// Execute an async operation with retries.
    ///
    /// # Errors
    ///
    /// Returns the last error unchanged when it is not retryable or when all
    /// retries are exhausted.
    pub async fn execute<F, Fut, T>(&self, operation: F) -> Result<T, OpsError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, OpsError>>,
    {
        self.execute_with_observer(operation, |_| {}).await
    }

    /// Execute an async operation with retries, notifying `observer` before
    /// every wait.
    ///
    /// # Errors
    ///
    /// Returns the last error unchanged when it is not retryable or when all
    /// retries are exhausted.
    pub async fn execute_with_observer<F, Fut, T, O>(
        &self,
        mut operation: F,
        mut observer: O,
    ) -> Result<T, OpsError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, OpsError>>,
        O: FnMut(&RetryAttempt<'_>),
    {
        let mut attempt = 0;
        loop {
            match operation().await {
                Ok(result) => return Ok(result),
                Err(error) => {
                    let decision = self.should_retry(&error, attempt);
                    if !decision.retry {
                        return Err(error);
                    }
                    observer(&RetryAttempt {
                        attempt,
                        delay: decision.delay,
                        error: &error,
                    });
                    tokio::time::sleep(decision.delay).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Get the maximum number of retries.
    #[must_use]
    pub const fn max_retries(&self) -> u32 {
        self.config.max_retries
    }
}

/// Parse a `retry-after` header: integer seconds or an HTTP date.
#[must_use]
pub fn parse_retry_after_header(value: &str) -> Option<Duration> {
    let value = value.trim();
    if let Ok(seconds) = value.parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }

    let at = DateTime::parse_from_rfc2822(value)
        .or_else(|_| DateTime::parse_from_rfc2822(&value.replace("GMT", "+0000")))
        .ok()?
        .with_timezone(&Utc);

    let remaining = at.signed_duration_since(Utc::now());
    Some(remaining.to_std().unwrap_or(Duration::ZERO))
}
