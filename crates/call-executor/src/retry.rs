//! Linear-backoff retry for remote calls
//!
//! Policy: client errors (400-499) are final except 429, which is retried
//! along with 5xx and transport failures. The delay before attempt `k`
//! (0-indexed) is `base_delay * k`, so three attempts at the default 1s base
//! wait 1s then 2s. No jitter and no overall deadline.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use crate::HasStatus;

/// Whether a failed call is worth another attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClassification {
    /// Rate limited, server-side or transport failure
    Transient,
    /// Client error that will fail the same way again
    Permanent,
}

/// Classify a failure by its HTTP status.
pub fn classify_status(status: Option<u16>) -> ErrorClassification {
    match status {
        Some(429) => ErrorClassification::Transient,
        Some(400..=499) => ErrorClassification::Permanent,
        _ => ErrorClassification::Transient,
    }
}

/// Attempt budget and backoff base for [`RetryPolicy::execute`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first. Zero is treated as one.
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(1000),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
        }
    }

    /// Sleep before attempt `attempt` (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.base_delay * attempt
    }

    /// Run `call` until it succeeds, fails permanently, or the budget runs out.
    ///
    /// The error returned is always the one produced by the last attempt,
    /// unchanged. Each invocation keeps its own attempt counter.
    pub async fn execute<F, Fut, T, E>(&self, mut call: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: HasStatus + Display,
    {
        let attempts = self.max_retries.max(1);
        let mut attempt = 0u32;

        loop {
            if attempt > 0 {
                tokio::time::sleep(self.delay_for_attempt(attempt)).await;
            }

            let err = match call().await {
                Ok(value) => {
                    if attempt > 0 {
                        debug!(attempt, "call succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(err) => err,
            };

            let status = err.status_code();
            if classify_status(status) == ErrorClassification::Permanent {
                debug!(?status, error = %err, "client error, not retrying");
                return Err(err);
            }

            attempt += 1;
            if attempt >= attempts {
                warn!(attempts, ?status, error = %err, "retries exhausted");
                return Err(err);
            }

            metrics::counter!("drive_call_retries_total").increment(1);
            warn!(
                attempt,
                ?status,
                delay_ms = self.delay_for_attempt(attempt).as_millis() as u64,
                error = %err,
                "transient failure, retrying"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CallError;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn counting_call(
        calls: Arc<AtomicU32>,
        outcome: impl Fn(u32) -> Result<&'static str, CallError>,
    ) -> impl FnMut() -> std::future::Ready<Result<&'static str, CallError>> {
        move || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            std::future::ready(outcome(n))
        }
    }

    #[test]
    fn classification_table() {
        assert_eq!(classify_status(Some(400)), ErrorClassification::Permanent);
        assert_eq!(classify_status(Some(401)), ErrorClassification::Permanent);
        assert_eq!(classify_status(Some(404)), ErrorClassification::Permanent);
        assert_eq!(classify_status(Some(499)), ErrorClassification::Permanent);
        assert_eq!(classify_status(Some(429)), ErrorClassification::Transient);
        assert_eq!(classify_status(Some(500)), ErrorClassification::Transient);
        assert_eq!(classify_status(Some(503)), ErrorClassification::Transient);
        assert_eq!(classify_status(Some(302)), ErrorClassification::Transient);
        assert_eq!(classify_status(None), ErrorClassification::Transient);
    }

    #[test]
    fn linear_delays() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for_attempt(0), Duration::ZERO);
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(1000));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(2000));
    }

    #[tokio::test(start_paused = true)]
    async fn not_found_is_invoked_once() {
        let calls = Arc::new(AtomicU32::new(0));
        let result = RetryPolicy::default()
            .execute(counting_call(calls.clone(), |_| {
                Err(CallError::status(404, "File not found"))
            }))
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(result.unwrap_err().status, Some(404));
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limited_twice_then_succeeds() {
        let calls = Arc::new(AtomicU32::new(0));
        let result = RetryPolicy::default()
            .execute(counting_call(calls.clone(), |n| {
                if n < 2 {
                    Err(CallError::status(429, "rate limited"))
                } else {
                    Ok("done")
                }
            }))
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(result.unwrap(), "done");
    }

    #[tokio::test(start_paused = true)]
    async fn server_error_exhausts_budget_and_returns_last_error() {
        let calls = Arc::new(AtomicU32::new(0));
        let started = tokio::time::Instant::now();
        let result = RetryPolicy::default()
            .execute(counting_call(calls.clone(), |n| {
                Err(CallError::status(500, format!("backend error #{n}")))
            }))
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        let err = result.unwrap_err();
        assert_eq!(err, CallError::status(500, "backend error #2"));
        // 1s before the second attempt, 2s before the third
        assert_eq!(started.elapsed(), Duration::from_millis(3000));
    }

    #[tokio::test(start_paused = true)]
    async fn transport_errors_are_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let result = RetryPolicy::new(5, Duration::from_millis(10))
            .execute(counting_call(calls.clone(), |n| {
                if n < 4 {
                    Err(CallError::transport("connection reset"))
                } else {
                    Ok("ok")
                }
            }))
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 5);
        assert_eq!(result.unwrap(), "ok");
    }

    #[tokio::test(start_paused = true)]
    async fn zero_budget_still_attempts_once() {
        let calls = Arc::new(AtomicU32::new(0));
        let result = RetryPolicy::new(0, Duration::from_millis(10))
            .execute(counting_call(calls.clone(), |_| {
                Err(CallError::status(503, "unavailable"))
            }))
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(result.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn independent_invocations_do_not_share_attempts() {
        let policy = RetryPolicy::default();
        let first = Arc::new(AtomicU32::new(0));
        let second = Arc::new(AtomicU32::new(0));

        let (a, b) = tokio::join!(
            policy.execute(counting_call(first.clone(), |_| {
                Err(CallError::status(500, "boom"))
            })),
            policy.execute(counting_call(second.clone(), |n| {
                if n == 0 {
                    Err(CallError::status(502, "bad gateway"))
                } else {
                    Ok("fine")
                }
            })),
        );

        assert!(a.is_err());
        assert_eq!(b.unwrap(), "fine");
        assert_eq!(first.load(Ordering::SeqCst), 3);
        assert_eq!(second.load(Ordering::SeqCst), 2);
    }
}
