//! Retry wrapper for throttled calls (§4.11). Adapted from the
//! exponential-backoff retry loop the teacher pack's LLM client uses for
//! its own API calls, generalized from `thread::sleep` to
//! `tokio::time::sleep` and from a fixed `initial_backoff * 2^n` schedule
//! to the specific 5/10/20/40/80s schedule the spec names.

use std::future::Future;

use crate::error::{LlmError, Result};

const BACKOFF_SCHEDULE_SECS: [u64; 5] = [5, 10, 20, 40, 80];

/// Runs `call` up to `BACKOFF_SCHEDULE_SECS.len()` times. A `Throttled`
/// error against RPM/TPM waits and retries; a `Throttled` error against
/// RPD is terminal (daily exhaustion doesn't recover within a run). Any
/// other error is returned immediately - only throttling is retried here.
pub async fn with_throttle_retry<F, Fut, T>(mut call: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut last_error = None;

    for (attempt, scheduled_backoff) in BACKOFF_SCHEDULE_SECS.iter().enumerate() {
        match call().await {
            Ok(value) => return Ok(value),
            Err(LlmError::Throttled { resource, retry_after_secs }) => {
                if resource == crate::error::ThrottledResource::RequestsPerDay {
                    return Err(LlmError::DailyQuotaExhausted(resource.to_string()));
                }
                tracing::warn!(resource = %resource, wait_secs = retry_after_secs, attempt, "llm call throttled, backing off");
                let wait = retry_after_secs.max(*scheduled_backoff);
                tokio::time::sleep(std::time::Duration::from_secs(wait)).await;
                last_error = Some(LlmError::Throttled { resource, retry_after_secs });
            }
            Err(other) => return Err(other),
        }
    }

    Err(LlmError::RetriesExhausted {
        attempts: BACKOFF_SCHEDULE_SECS.len() as u32,
        last_error: last_error.map(|e| e.to_string()).unwrap_or_else(|| "unknown".to_string()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn succeeds_without_retry_when_first_call_succeeds() {
        let calls = AtomicU32::new(0);
        let result = with_throttle_retry(|| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, LlmError>(42) }
        })
        .await
        .unwrap();
        assert_eq!(result, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn non_throttle_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let result = with_throttle_retry(|| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err::<i32, _>(LlmError::Configuration("bad key".to_string())) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn daily_quota_throttle_is_terminal_not_retried() {
        let calls = AtomicU32::new(0);
        let result = with_throttle_retry(|| {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                Err::<i32, _>(LlmError::Throttled { resource: crate::error::ThrottledResource::RequestsPerDay, retry_after_secs: 1 })
            }
        })
        .await;
        assert!(matches!(result, Err(LlmError::DailyQuotaExhausted(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
