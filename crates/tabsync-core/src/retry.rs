//! Bounded retry with exponential backoff for remote calls.
//!
//! Only errors classified [`ErrorClass::Transient`](crate::error::ErrorClass)
//! at the client boundary are retried. The delay before retry `n` (zero-based)
//! is `2^n × base_delay`.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metrics::counter;

use crate::error::Result;
use crate::remote::{
    Grid, ModifiedTimeProbe, SheetsClient, TableMetadata, WorkbookMetadata, WriteReply,
    WriteRequest,
};
use crate::table::{Cell, TableData};

/// Counter: remote calls retried after a transient failure.
pub const RETRIES_TOTAL: &str = "tabsync_remote_retries_total";

/// Retry ceiling and backoff base.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Extra attempts after the first call.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Creates a policy with the default one-second base delay.
    #[must_use]
    pub fn with_max_retries(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Self::default()
        }
    }

    /// Returns the delay before retry `attempt` (zero-based).
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(2_u32.saturating_pow(attempt))
    }
}

/// Runs `call` until it succeeds, fails permanently, or retries run out.
///
/// # Errors
///
/// Returns the last error once retries are exhausted, or the first
/// non-transient error immediately.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, operation: &str, mut call: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        match call().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt < policy.max_retries => {
                let delay = policy.delay_for(attempt);
                tracing::warn!(
                    operation,
                    attempt = attempt + 1,
                    max_attempts = policy.max_retries + 1,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    error = %err,
                    "remote call failed, retrying"
                );
                counter!(RETRIES_TOTAL, "operation" => operation.to_string()).increment(1);
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => {
                tracing::error!(
                    operation,
                    attempts = attempt + 1,
                    transient = err.is_transient(),
                    error = %err,
                    "remote call failed"
                );
                return Err(err);
            }
        }
    }
}

/// Decorator that routes every call of the inner client through [`with_retry`].
#[derive(Debug, Clone)]
pub struct RetryingClient<C> {
    inner: C,
    policy: RetryPolicy,
}

impl<C> RetryingClient<C> {
    /// Wraps `inner` with `policy`.
    pub const fn new(inner: C, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait]
impl<C: SheetsClient> SheetsClient for RetryingClient<C> {
    async fn get_metadata(&self, doc_id: &str) -> Result<WorkbookMetadata> {
        with_retry(&self.policy, "get_metadata", || self.inner.get_metadata(doc_id)).await
    }

    async fn read_range(&self, doc_id: &str, range: &str) -> Result<Grid> {
        with_retry(&self.policy, "read_range", || self.inner.read_range(doc_id, range)).await
    }

    async fn read_table_at(
        &self,
        doc_id: &str,
        sheet_title: &str,
        table: &TableMetadata,
    ) -> Result<TableData> {
        with_retry(&self.policy, "read_table", || {
            self.inner.read_table_at(doc_id, sheet_title, table)
        })
        .await
    }

    async fn batch_read(&self, doc_id: &str, ranges: &[String]) -> Result<Vec<Grid>> {
        with_retry(&self.policy, "batch_read", || self.inner.batch_read(doc_id, ranges)).await
    }

    async fn batch_write(
        &self,
        doc_id: &str,
        requests: &[WriteRequest],
    ) -> Result<Vec<WriteReply>> {
        with_retry(&self.policy, "batch_write", || {
            self.inner.batch_write(doc_id, requests)
        })
        .await
    }

    async fn write_range(&self, doc_id: &str, range: &str, rows: &[Vec<Cell>]) -> Result<()> {
        with_retry(&self.policy, "write_range", || {
            self.inner.write_range(doc_id, range, rows)
        })
        .await
    }
}

#[async_trait]
impl<C: ModifiedTimeProbe> ModifiedTimeProbe for RetryingClient<C> {
    async fn modified_time(&self, source_id: &str) -> Result<DateTime<Utc>> {
        with_retry(&self.policy, "modified_time", || {
            self.inner.modified_time(source_id)
        })
        .await
    }
}
