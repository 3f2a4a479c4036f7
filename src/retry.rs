//! Bounded exponential backoff around external calls.
//!
//! Only errors whose [`Transient::is_transient`] returns true are retried;
//! every other error surfaces on the attempt that produced it. With the
//! defaults (3 retries, 2s base) a call is attempted at most four times,
//! sleeping 2s, 4s and 8s in between.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::error::Transient;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(2),
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

    /// Delay before retry number `retry` (1-based): base, 2*base, 4*base, ...
    pub fn delay_for(&self, retry: u32) -> Duration {
        self.base_delay * (1u32 << (retry.saturating_sub(1)).min(16))
    }

    /// Run `op` until it succeeds, fails terminally, or retries run out.
    ///
    /// `label` names the call in log output.
    pub async fn run<F, Fut, T, E>(&self, label: &str, mut op: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Transient + std::fmt::Display,
    {
        let mut retry = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && retry < self.max_retries => {
                    retry += 1;
                    let delay = self.delay_for(retry);
                    warn!(
                        call = label,
                        retry,
                        max_retries = self.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "transient failure, backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderError;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    #[test]
    fn test_delays_double() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for(2), Duration::from_secs(4));
        assert_eq!(policy.delay_for(3), Duration::from_secs(8));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_errors_retried_with_backoff() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let started = Instant::now();

        let result: Result<&str, ProviderError> = RetryPolicy::default()
            .run("test", move || async move {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err(ProviderError::Server {
                        status: 503,
                        body: "busy".into(),
                    })
                } else {
                    Ok("done")
                }
            })
            .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        let waited = started.elapsed();
        assert!(waited >= Duration::from_secs(6) && waited < Duration::from_secs(7));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_are_bounded() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<(), ProviderError> = RetryPolicy::default()
            .run("test", move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(ProviderError::Timeout("slow".into()))
            })
            .await;

        assert!(matches!(result, Err(ProviderError::Timeout(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_terminal_error_not_retried() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let started = Instant::now();
        let result: Result<(), ProviderError> = RetryPolicy::default()
            .run("test", move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(ProviderError::QuotaExhausted("daily limit".into()))
            })
            .await;

        assert!(matches!(result, Err(ProviderError::QuotaExhausted(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(started.elapsed(), Duration::ZERO);
    }
}
