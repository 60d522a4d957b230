// src/fetch/retry.rs

use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

use super::{DatasetRequest, FetchError, HttpFetcher, RawPayload};
use crate::config::RetrySettings;

/// Caller-side retry policy with exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_backoff: Duration,
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            initial_backoff: Duration::ZERO,
        }
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.saturating_sub(1).min(16);
        self.initial_backoff.saturating_mul(factor)
    }
}

impl From<&RetrySettings> for RetryPolicy {
    fn from(s: &RetrySettings) -> Self {
        if !s.enabled {
            return Self::none();
        }
        Self {
            max_retries: s.max_retries,
            initial_backoff: Duration::from_millis(s.initial_backoff_ms),
        }
    }
}

/// Retry `fetcher.fetch` on network errors only. Status and request errors fail at once.
pub async fn fetch_with_retry(
    fetcher: &HttpFetcher,
    request: &DatasetRequest,
    policy: RetryPolicy,
    cancel: &CancellationToken,
) -> Result<RawPayload, FetchError> {
    let mut attempts = 0;
    loop {
        match fetcher.fetch(request, cancel).await {
            Ok(payload) => return Ok(payload),
            Err(e) if e.is_transient() && attempts < policy.max_retries => {
                attempts += 1;
                let delay = policy.backoff(attempts);
                warn!(url = %request.url(), attempt = attempts, delay_ms = delay.as_millis() as u64, error = %e, "retrying");
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        return Err(FetchError::Cancelled { url: request.url().to_string() });
                    }
                    _ = sleep(delay) => {}
                }
            }
            Err(e) => {
                if e.is_transient() && policy.max_retries > 0 {
                    error!(url = %request.url(), error = %e, "exhausted retries");
                }
                return Err(e);
            }
        }
    }
}
