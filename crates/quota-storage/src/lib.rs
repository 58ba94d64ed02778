//! Store contracts, sqlx adapters and bounded retry for the quota migration.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use quota_core::{DictionaryEntry, Dimension, QuotaFact, RawQuotaRow};
use thiserror::Error;
use tracing::warn;

mod layout;
mod mysql;
mod sqlite;

pub use layout::{DictionaryLayouts, DictionaryTable, FactLayout, SourceLayout, TableLayout};
pub use mysql::{MySqlDestinationStore, MAX_FACTS_PER_INSERT};
pub use sqlite::SqliteSourceStore;

pub const CRATE_NAME: &str = "quota-storage";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error("column {column}: {details}")]
    Decode { column: String, details: String },
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("store rejected request: {0}")]
    Rejected(String),
}

impl StoreError {
    pub fn disposition(&self) -> RetryDisposition {
        match self {
            StoreError::Sqlx(err) => classify_sqlx_error(err),
            StoreError::Unavailable(_) => RetryDisposition::Retryable,
            StoreError::Decode { .. } | StoreError::Rejected(_) => RetryDisposition::NonRetryable,
        }
    }
}

/// Read side of the source store.
#[async_trait]
pub trait SourceStore: Send + Sync {
    /// All quota observations in source order, without the source's own row code.
    async fn fetch_quota_rows(&self) -> Result<Vec<RawQuotaRow>, StoreError>;
}

/// Destination store: read-only code tables plus the append-only fact table.
#[async_trait]
pub trait DestinationStore: Send + Sync {
    async fn fetch_dictionary(
        &self,
        dimension: Dimension,
    ) -> Result<Vec<DictionaryEntry>, StoreError>;

    /// Append one batch atomically; returns the number of rows inserted.
    async fn insert_facts(&self, facts: &[QuotaFact]) -> Result<u64, StoreError>;

    /// Human-readable name of the table backing `dimension`, used in error reports.
    fn dictionary_source(&self, dimension: Dimension) -> String {
        dimension.to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    Retryable,
    NonRetryable,
}

pub fn classify_sqlx_error(err: &sqlx::Error) -> RetryDisposition {
    match err {
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::Protocol(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => RetryDisposition::Retryable,
        // serialization failure / deadlock victim
        sqlx::Error::Database(db) if db.code().as_deref() == Some("40001") => {
            RetryDisposition::Retryable
        }
        _ => RetryDisposition::NonRetryable,
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub max_attempts: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(8),
        }
    }
}

impl BackoffPolicy {
    /// Retry immediately, used where waiting buys nothing (tests, local stores).
    pub fn immediate(max_attempts: usize) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    pub fn delay_for_attempt(&self, attempt_index: usize) -> Duration {
        let factor = 1u32.checked_shl(attempt_index as u32).unwrap_or(u32::MAX);
        let delay = self.base_delay.saturating_mul(factor);
        delay.min(self.max_delay)
    }
}

#[derive(Debug, Error)]
#[error("{operation} failed after {attempts} attempt(s): {source}")]
pub struct RetryError {
    pub operation: String,
    pub attempts: usize,
    #[source]
    pub source: StoreError,
}

/// Run `op` until it succeeds, fails with a non-retryable error, or the policy's
/// attempt budget is spent. Every attempt receives the same inputs.
pub async fn retry_with_backoff<T, F, Fut>(
    policy: &BackoffPolicy,
    operation: &str,
    mut op: F,
) -> Result<T, RetryError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0usize;
    loop {
        attempt += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                let retryable = err.disposition() == RetryDisposition::Retryable;
                if !retryable || attempt >= max_attempts {
                    return Err(RetryError {
                        operation: operation.to_string(),
                        attempts: attempt,
                        source: err,
                    });
                }
                let delay = policy.delay_for_attempt(attempt - 1);
                warn!(
                    operation,
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "transient store failure; retrying"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn backoff_logic_is_exponential_and_capped() {
        let policy = BackoffPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
        };

        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(350));
        assert_eq!(policy.delay_for_attempt(40), Duration::from_millis(350));
    }

    #[test]
    fn connection_level_failures_are_retryable() {
        let io = sqlx::Error::Io(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "reset by peer",
        ));
        assert_eq!(classify_sqlx_error(&io), RetryDisposition::Retryable);
        assert_eq!(
            classify_sqlx_error(&sqlx::Error::PoolTimedOut),
            RetryDisposition::Retryable
        );
        assert_eq!(
            classify_sqlx_error(&sqlx::Error::RowNotFound),
            RetryDisposition::NonRetryable
        );
        assert_eq!(
            StoreError::Unavailable("down".into()).disposition(),
            RetryDisposition::Retryable
        );
        assert_eq!(
            StoreError::Rejected("bad row".into()).disposition(),
            RetryDisposition::NonRetryable
        );
    }

    #[tokio::test]
    async fn transient_failures_are_retried_until_success() {
        let calls = AtomicUsize::new(0);
        let result = retry_with_backoff(&BackoffPolicy::immediate(5), "insert", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(StoreError::Unavailable("connection dropped".into()))
                } else {
                    Ok(n)
                }
            }
        })
        .await
        .expect("third attempt succeeds");

        assert_eq!(result, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn attempts_are_bounded() {
        let calls = AtomicUsize::new(0);
        let err = retry_with_backoff(&BackoffPolicy::immediate(5), "insert", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>(StoreError::Unavailable("down".into())) }
        })
        .await
        .unwrap_err();

        assert_eq!(err.attempts, 5);
        assert_eq!(calls.load(Ordering::SeqCst), 5);
        assert!(err.to_string().contains("insert failed after 5 attempt(s)"));
    }

    #[tokio::test]
    async fn non_retryable_failures_stop_immediately() {
        let calls = AtomicUsize::new(0);
        let err = retry_with_backoff(&BackoffPolicy::immediate(5), "insert", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>(StoreError::Rejected("duplicate key".into())) }
        })
        .await
        .unwrap_err();

        assert_eq!(err.attempts, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
