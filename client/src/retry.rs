use std::future::Future;
use std::time::Duration;

use log::warn;
use serde::Deserialize;

use crate::error::{ClientError, Result};

/// Bounded retry for reads that may lag behind a recent on-chain write.
///
/// A "not found" outcome waits `initial_delay * multiplier^attempt`; any other
/// error waits the fixed fallback delay. Both count against `max_attempts`.
/// Never used for instruction submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub multiplier: u32,
    pub fallback_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay_ms: 1_000,
            multiplier: 2,
            fallback_delay_ms: 2_000,
        }
    }
}

impl RetryPolicy {
    /// Wait after the zero-based `attempt` reported "not found".
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let factor = (self.multiplier as u64).saturating_pow(attempt);
        Duration::from_millis(self.initial_delay_ms.saturating_mul(factor))
    }

    pub fn delay_after(&self, attempt: u32, err: &ClientError) -> Duration {
        if err.is_not_found() {
            self.backoff_delay(attempt)
        } else {
            Duration::from_millis(self.fallback_delay_ms)
        }
    }

    pub async fn retry<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    attempt += 1;
                    if attempt >= attempts {
                        return Err(ClientError::RetriesExhausted {
                            attempts,
                            last: Box::new(err),
                        });
                    }
                    let delay = self.delay_after(attempt - 1, &err);
                    warn!("{what}: attempt {attempt}/{attempts} failed: {err}; retrying in {delay:?}");
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use anchor_lang::prelude::Pubkey;
    use tokio::time::Instant;

    use super::*;

    #[test]
    fn backoff_doubles() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff_delay(0), Duration::from_secs(1));
        assert_eq!(policy.backoff_delay(3), Duration::from_secs(8));
        let other = ClientError::Rpc("connection reset".into());
        assert_eq!(policy.delay_after(3, &other), Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_after_four_backoffs() {
        let calls = AtomicU32::new(0);
        let missing = Pubkey::new_unique();
        let started = Instant::now();

        let value = RetryPolicy::default()
            .retry("fetch", || async {
                if calls.fetch_add(1, Ordering::SeqCst) < 4 {
                    Err(ClientError::AccountNotFound(missing))
                } else {
                    Ok(42)
                }
            })
            .await
            .unwrap();

        assert_eq!(value, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 5);
        // 1s + 2s + 4s + 8s
        assert_eq!(started.elapsed(), Duration::from_secs(15));
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let missing = Pubkey::new_unique();

        let err = RetryPolicy::default()
            .retry("fetch", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(ClientError::AccountNotFound(missing))
            })
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 5);
        match err {
            ClientError::RetriesExhausted { attempts, last } => {
                assert_eq!(attempts, 5);
                assert!(last.is_not_found());
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn other_errors_use_fallback_delay() {
        let calls = AtomicU32::new(0);
        let started = Instant::now();

        let value = RetryPolicy::default()
            .retry("fetch", || async {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(ClientError::Rpc("timeout".into()))
                } else {
                    Ok("ok")
                }
            })
            .await
            .unwrap();

        assert_eq!(value, "ok");
        assert_eq!(started.elapsed(), Duration::from_secs(4));
    }
}
