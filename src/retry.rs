// src/retry.rs
//! Uniform retry/backoff for every external call made per item.
//!
//! Up to `max_attempts` attempts; after a transient failure of attempt `k` the
//! caller sleeps `base_delay * 2^(k-1)` (1s, 2s, 4s with the defaults). A
//! non-transient error or the last failed attempt is returned as-is.

use std::future::Future;
use std::time::Duration;

use metrics::counter;
use serde::Deserialize;

use crate::error::PipelineResult;
use crate::metrics::RETRIES_TOTAL;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Zero-delay policy, handy for tests and dry runs.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay: Duration::ZERO,
        }
    }

    /// Delay slept after failed attempt `attempt` (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(1u32 << shift)
    }
}

/// Serde shape of the `[retry]` config table.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1_000,
        }
    }
}

impl From<RetryConfig> for RetryPolicy {
    fn from(cfg: RetryConfig) -> Self {
        Self {
            max_attempts: cfg.max_attempts.max(1),
            base_delay: Duration::from_millis(cfg.base_delay_ms),
        }
    }
}

/// Run `call(attempt)` under `policy`. `label` only feeds the logs.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, label: &str, mut call: F) -> PipelineResult<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = PipelineResult<T>>,
{
    let max = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match call(attempt).await {
            Ok(v) => return Ok(v),
            Err(e) if attempt < max && e.is_transient() => {
                let delay = policy.delay_after(attempt);
                tracing::warn!(
                    op = label,
                    attempt,
                    max_attempts = max,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "call failed, retrying"
                );
                counter!(RETRIES_TOTAL).increment(1);
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => {
                if e.is_transient() {
                    tracing::error!(op = label, attempts = attempt, error = %e, "call failed after final attempt");
                } else {
                    tracing::debug!(op = label, attempt, error = %e, "non-retryable failure");
                }
                return Err(e);
            }
        }
    }
}
