use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::config::ApiConfig;
use crate::error::{AppError, Result};

/// Fixed-delay retry for upstream calls. Only transient upstream statuses
/// (408, 429, 5xx) are retried; every other failure returns immediately.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            delay: Duration::from_secs(3),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    pub fn from_config(config: &ApiConfig) -> Self {
        Self::new(config.retry_attempts, Duration::from_secs(config.retry_delay_secs))
    }

    /// Run `op` until it succeeds, fails permanently, or attempts run out.
    /// Exhaustion hands back the last error as-is.
    pub async fn run<T, F, Fut>(&self, cancel: &CancellationToken, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            if cancel.is_cancelled() {
                return Err(AppError::Cancelled);
            }

            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < attempts => {
                    tracing::debug!("attempt {}/{} failed: {}", attempt, attempts, e);
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(AppError::Cancelled),
                        _ = tokio::time::sleep(self.delay) => {}
                    }
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
