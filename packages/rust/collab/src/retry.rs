//! Retry/backoff discipline for network and LLM calls.
//!
//! Transient failures (timeouts, connection errors, 429/5xx) are retried
//! with exponential backoff up to the configured attempt cap; everything
//! else returns immediately. Callers treat an exhausted retry budget as an
//! absent source, never as a pipeline failure.

use std::time::Duration;

use tracing::{debug, warn};

use mneprofiler_shared::{ProfilerError, Result, RetryConfig};

/// Run `op` with the configured retry/backoff policy.
pub async fn with_retry<T, F, Fut>(retry: &RetryConfig, op_name: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut backoff = Duration::from_millis(retry.initial_backoff_ms);

    for attempt in 1..=retry.max_attempts {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < retry.max_attempts => {
                warn!(
                    op = op_name,
                    attempt,
                    max = retry.max_attempts,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %e,
                    "transient failure, backing off"
                );
                tokio::time::sleep(backoff).await;
                backoff *= 2;
            }
            Err(e) => {
                debug!(op = op_name, attempt, error = %e, "giving up");
                return Err(e);
            }
        }
    }

    // max_attempts >= 1 makes the loop return before reaching here.
    Err(ProfilerError::transient(format!("{op_name}: retry budget exhausted")))
}

/// Map a reqwest error into the pipeline taxonomy: anything the network
/// might fix on its own is transient, the rest is malformed.
pub fn map_reqwest_err(op_name: &str, e: reqwest::Error) -> ProfilerError {
    if e.is_timeout() || e.is_connect() || e.is_request() {
        ProfilerError::transient(format!("{op_name}: {e}"))
    } else {
        ProfilerError::malformed(format!("{op_name}: {e}"))
    }
}

/// Map an HTTP status into the pipeline taxonomy. Rate limits and server
/// errors are retryable; client errors are not.
pub fn check_status(op_name: &str, response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else if status.as_u16() == 429 || status.is_server_error() {
        Err(ProfilerError::transient(format!("{op_name}: HTTP {status}")))
    } else {
        Err(ProfilerError::malformed(format!("{op_name}: HTTP {status}")))
    }
}
