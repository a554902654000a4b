//! The remote backing store contract and the retry policy wrapped around it.
//!
//! Remote calls are the only latency-bearing operations in the bot. Every
//! call made by [`TableStore`](crate::TableStore) goes through
//! [`RetryPolicy::run`], which bounds each attempt with a timeout and gives
//! up after a fixed number of attempts.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::{StoreError, StoreResult};

/// Raw contents of a remote table: header row plus data rows, all text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteTable {
    pub header: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

/// Durable tabular backend mirrored by the cache.
///
/// Addressing is the remote's own: `update_cell` takes one-based row and
/// column numbers where row 1 is the header row.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Names of all tables, in the remote's order.
    async fn list_tables(&self) -> StoreResult<Vec<String>>;

    /// Header and every row of `table`.
    async fn read_all(&self, table: &str) -> StoreResult<RemoteTable>;

    /// Append one row after the last row of `table`.
    async fn append_row(&self, table: &str, values: &[String]) -> StoreResult<()>;

    /// Overwrite a single cell.
    async fn update_cell(&self, table: &str, row: usize, col: usize, value: &str)
    -> StoreResult<()>;
}

// ── retry policy ─────────────────────────────────────────────────────

/// Timeout and retry settings for remote calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Time limit for a single attempt.
    pub timeout: Duration,
    /// Total attempts, including the first one. Zero is treated as one.
    pub max_attempts: u32,
    /// Delay before attempt `n + 1` is `backoff * n`.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            max_attempts: 3,
            backoff: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    /// Single attempt, no backoff.
    pub fn once(timeout: Duration) -> Self {
        Self {
            timeout,
            max_attempts: 1,
            backoff: Duration::ZERO,
        }
    }

    /// Same timeout, a single attempt. For calls that are not idempotent.
    pub fn without_retries(self) -> Self {
        Self {
            max_attempts: 1,
            ..self
        }
    }

    /// Run `call` until it succeeds, fails with a non-retryable error, or
    /// the attempts are used up. Returns the last error on exhaustion.
    pub async fn run<T, F, Fut>(&self, operation: &'static str, mut call: F) -> StoreResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = StoreResult<T>>,
    {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            let result = match tokio::time::timeout(self.timeout, call()).await {
                Ok(result) => result,
                Err(_) => Err(StoreError::Timeout {
                    operation,
                    millis: self.timeout.as_millis() as u64,
                }),
            };

            match result {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(operation, attempt, "remote call succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(err) if attempt < attempts && err.is_retryable() => {
                    warn!(operation, attempt, error = %err, "remote call failed, retrying");
                    tokio::time::sleep(self.backoff * attempt).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    fn fast(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            timeout: Duration::from_millis(50),
            max_attempts,
            backoff: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn retries_until_success() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let value = fast(3)
            .run("test", move || async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(StoreError::Remote("flaky".into()))
                } else {
                    Ok(42)
                }
            })
            .await
            .unwrap();
        assert_eq!(value, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: StoreResult<()> = fast(2)
            .run("test", move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(StoreError::Remote("down".into()))
            })
            .await;
        assert!(matches!(result, Err(StoreError::Remote(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn does_not_retry_permanent_errors() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: StoreResult<()> = fast(5)
            .run("test", move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(StoreError::not_found("table", "nope"))
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn hung_call_times_out() {
        let result: StoreResult<()> = fast(1)
            .run("test", move || async move {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await;
        assert!(matches!(result, Err(StoreError::Timeout { operation: "test", .. })));
    }
}
