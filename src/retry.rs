//! Retry, re-authentication and timeout wrappers for outbound calls.

use std::future::Future;
use std::time::Duration;

use crate::error::{Error, Result};

/// Configuration for retry behavior
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts
    pub max_retries: u32,
    /// Initial delay before first retry
    pub initial_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
}

impl RetryConfig {
    /// Create a new retry config with specified parameters
    pub fn new(max_retries: u32, initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries,
            initial_delay,
            max_delay,
        }
    }
}

/// Execute an async operation with exponential backoff retry.
///
/// Only errors for which `Error::is_retriable` holds are retried; anything
/// else (missing grant, 4xx responses) is returned immediately.
pub async fn with_retry<F, Fut, T>(config: &RetryConfig, mut operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempts = 0;
    let mut delay = config.initial_delay;

    loop {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) => {
                attempts += 1;
                if attempts > config.max_retries || !e.is_retriable() {
                    return Err(e);
                }

                tracing::warn!(
                    "Operation failed (attempt {}/{}): {}. Retrying in {:?}...",
                    attempts,
                    config.max_retries + 1,
                    e,
                    delay
                );

                tokio::time::sleep(delay).await;

                // Exponential backoff with cap
                delay = (delay * 2).min(config.max_delay);
            }
        }
    }
}

/// Run a mailbox call, and if the bearer token is refused (401/403) run it
/// exactly once more. Each attempt acquires its own token, so the second
/// attempt always goes out with a freshly renewed one.
pub async fn with_reauth<F, Fut, T>(operation: &'static str, mut call: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    match call().await {
        Err(e) if e.is_auth_rejection() => {
            tracing::warn!("{} rejected the access token ({}), renewing once", operation, e);
            call().await
        }
        other => other,
    }
}

/// Bound an outbound call, surfacing `Error::Timeout` when it elapses.
pub async fn with_timeout<F, T>(operation: &'static str, after: Duration, call: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(after, call).await {
        Ok(result) => result,
        Err(_) => Err(Error::Timeout { operation, after }),
    }
}
