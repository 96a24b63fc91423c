//! # Bounded Retry
//!
//! Retries an operation while it fails with [`EngineError::Contention`],
//! waiting an exponentially growing, capped interval between attempts.
//!
//! ```text
//! attempt 1 ──► Contention ──► sleep ~20ms
//! attempt 2 ──► Contention ──► sleep ~40ms
//! ...
//! attempt N ──► Contention ──► StorageFailure { operation, attempts: N }
//!
//! Any other error, or success, returns immediately.
//! ```
//!
//! Each attempt is a complete transaction that either committed or rolled
//! back, so a retry never sees a half-applied delta.

use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, error, warn};

use crate::error::{EngineError, EngineResult};

/// How many times and how patiently to retry on contention.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first. At least 1.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(20),
            max_backoff: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        RetryPolicy {
            max_attempts: 1,
            ..Default::default()
        }
    }

    fn create_backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            initial_interval: self.initial_backoff,
            max_interval: self.max_backoff,
            multiplier: 2.0,
            max_elapsed_time: None,
            ..Default::default()
        }
    }

    /// Runs `op` until it succeeds, fails with a non-retryable error, or the
    /// attempts are spent.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut op: F) -> EngineResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = EngineResult<T>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut backoff = self.create_backoff();
        let mut attempt = 0u32;

        loop {
            attempt += 1;

            match op().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(operation, attempt, "Succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(e) if e.is_retryable() => {
                    if attempt >= max_attempts {
                        error!(operation, attempts = attempt, error = %e, "Retries exhausted");
                        return Err(EngineError::StorageFailure {
                            operation: operation.to_string(),
                            attempts: attempt,
                            message: e.to_string(),
                        });
                    }

                    let wait = backoff.next_backoff().unwrap_or(self.max_backoff);
                    warn!(operation, attempt, ?wait, error = %e, "Storage contention, retrying");
                    tokio::time::sleep(wait).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(2),
        }
    }

    #[tokio::test]
    async fn test_retries_until_success() {
        let calls = AtomicU32::new(0);
        let result = fast(5)
            .run("reserve", || async {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(EngineError::Contention("database is locked".into()))
                } else {
                    Ok(42)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhaustion_surfaces_storage_failure() {
        let calls = AtomicU32::new(0);
        let result: EngineResult<()> = fast(3)
            .run("commit", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(EngineError::Contention("database is locked".into()))
            })
            .await;

        match result {
            Err(EngineError::StorageFailure {
                operation,
                attempts,
                ..
            }) => {
                assert_eq!(operation, "commit");
                assert_eq!(attempts, 3);
            }
            other => panic!("expected StorageFailure, got {other:?}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_expected_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let result: EngineResult<()> = fast(5)
            .run("release", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(EngineError::ReservationNotFound {
                    reservation_id: "r".into(),
                })
            })
            .await;

        assert!(matches!(result, Err(EngineError::ReservationNotFound { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
