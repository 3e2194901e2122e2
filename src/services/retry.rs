//! Retry with exponential backoff for service calls.
//!
//! Only transport failures and gateway statuses are retried; anything the
//! service answered deliberately is returned on the first attempt.

use std::time::Duration;

use tracing::warn;

use crate::config::ServiceEndpoint;
use crate::error::ServiceError;

#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 500,
            max_delay_ms: 10_000,
        }
    }
}

impl From<&ServiceEndpoint> for RetryConfig {
    fn from(endpoint: &ServiceEndpoint) -> Self {
        Self {
            max_retries: endpoint.max_retries,
            base_delay_ms: endpoint.base_delay_ms,
            max_delay_ms: endpoint.max_delay_ms,
        }
    }
}

/// Run `op`, retrying transient failures up to `max_retries` times.
pub fn with_retry<T, F>(config: &RetryConfig, operation: &str, mut op: F) -> Result<T, ServiceError>
where
    F: FnMut() -> Result<T, ServiceError>,
{
    let mut attempt = 0;
    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < config.max_retries => {
                let delay = calculate_delay(config, attempt);
                warn!(
                    operation = %operation,
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    "Service call failed, retrying: {}",
                    e
                );
                std::thread::sleep(delay);
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

fn calculate_delay(config: &RetryConfig, attempt: u32) -> Duration {
    let exp = config
        .base_delay_ms
        .saturating_mul(2u64.saturating_pow(attempt));
    Duration::from_millis(exp.min(config.max_delay_ms))
}
