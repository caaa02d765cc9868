//! Bounded retry of platform calls with linear backoff

use crate::cancel::CancelToken;
use crate::error::{ApiError, Error, Result};
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Whether retrying a failed call can help.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Retryable,
    Permanent,
}

const PERMANENT_MARKERS: &[&str] = &["not found", "permission denied", "forbidden", "unauthorized"];

const RETRYABLE_MARKERS: &[&str] = &[
    "rate limit",
    "too many requests",
    "timeout",
    "timed out",
    "server error",
    "temporary failure",
    "502",
    "503",
    "504",
];

/// Classify a platform failure.
///
/// Permanent indications win over retryable ones; anything unrecognized
/// is permanent.
pub fn classify(error: &ApiError) -> ErrorClass {
    if let Some(status) = error.status {
        match status {
            401 | 403 | 404 => return ErrorClass::Permanent,
            408 | 429 | 500..=599 => return ErrorClass::Retryable,
            _ => {}
        }
    }

    let message = error.message.to_lowercase();
    if PERMANENT_MARKERS.iter().any(|m| message.contains(m)) {
        return ErrorClass::Permanent;
    }
    if RETRYABLE_MARKERS.iter().any(|m| message.contains(m)) {
        return ErrorClass::Retryable;
    }
    ErrorClass::Permanent
}

/// Attempt budget and backoff for platform calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_retries: u32,
    /// Delay before attempt `n + 1` is `n * base_delay`.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(attempt)
    }

    /// Run `call` until it succeeds, fails permanently, runs out of
    /// attempts or `cancel` fires.
    pub async fn run<T, F, Fut>(
        &self,
        operation: &'static str,
        cancel: &CancelToken,
        mut call: F,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, ApiError>>,
    {
        let attempts = self.max_retries.max(1);
        let mut attempt = 1;
        loop {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled { operation });
            }

            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Error::Cancelled { operation }),
                result = call() => result,
            };

            let error = match result {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };

            if classify(&error) == ErrorClass::Permanent {
                return Err(Error::ApiPermanent {
                    operation,
                    source: error,
                });
            }
            if attempt >= attempts {
                return Err(Error::ApiRetriesExhausted {
                    operation,
                    attempts: attempt,
                    source: error,
                });
            }

            let delay = self.delay_for(attempt);
            warn!(operation, attempt, error = %error, delay = ?delay, "retrying after transient failure");
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Error::Cancelled { operation }),
                _ = tokio::time::sleep(delay) => {}
            }
            attempt += 1;
        }
    }
}
