//! Polling helpers for browser-side conditions.
//!
//! CDP has no "network idle" or "target ready" notification we can await
//! directly, so the chromium backend polls. Both helpers sleep
//! `poll_interval` between checks and give up after `timeout`.
//!
//! Time is measured with `tokio::time`, so paused-clock tests run instantly.

use crate::error::{CollectorError, Result};
use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, Instant};

/// Default timeout for wait operations (30 seconds).
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default poll interval for checking conditions (100ms).
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Configuration for wait operations.
#[derive(Debug, Clone, Copy)]
pub struct WaitConfig {
    /// Maximum time to wait for the condition.
    pub timeout: Duration,

    /// How often to check if the condition is satisfied.
    pub poll_interval: Duration,
}

impl WaitConfig {
    /// Creates a new wait configuration.
    #[must_use]
    pub fn new(timeout: Duration, poll_interval: Duration) -> Self {
        Self {
            timeout,
            poll_interval,
        }
    }

    /// Creates a config with custom timeout and default poll interval.
    #[must_use]
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::new(timeout, DEFAULT_POLL_INTERVAL)
    }

    fn timed_out(&self, description: &str) -> CollectorError {
        CollectorError::WaitTimeout {
            condition: description.to_string(),
            timeout: self.timeout,
        }
    }
}

impl Default for WaitConfig {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT, DEFAULT_POLL_INTERVAL)
    }
}

/// Waits for a condition to become true, with timeout.
///
/// # Errors
///
/// Returns `WaitTimeout` if the condition is still false after the timeout.
pub async fn wait_for<F>(condition: F, config: WaitConfig, description: &str) -> Result<()>
where
    F: Fn() -> bool,
{
    let start = Instant::now();

    loop {
        if condition() {
            return Ok(());
        }

        if start.elapsed() >= config.timeout {
            return Err(config.timed_out(description));
        }

        sleep(config.poll_interval).await;
    }
}

/// Retries `attempt` until it yields a value.
///
/// `Ok(None)` and errors both count as "not yet": targets that were just
/// created routinely fail lookups until the backend has attached to them.
///
/// # Errors
///
/// Returns `WaitTimeout` if no attempt yields a value before the timeout.
pub async fn retry_until<T, F, Fut>(attempt: F, config: WaitConfig, description: &str) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<Option<T>>>,
{
    let start = Instant::now();

    loop {
        if let Ok(Some(value)) = attempt().await {
            return Ok(value);
        }

        if start.elapsed() >= config.timeout {
            return Err(config.timed_out(description));
        }

        sleep(config.poll_interval).await;
    }
}
