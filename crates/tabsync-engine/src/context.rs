//! Collaborators shared by every engine component for one destination document.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use tabsync_core::remote::{ModifiedTimeProbe, SheetsClient};
use tabsync_core::retry::RetryingClient;
use tabsync_core::storage::PropertyStore;
use tabsync_core::timestamp::format_instant;

use crate::config::SyncSettings;
use crate::metrics::SyncMetrics;
use crate::run_log::{LogRecord, LogSink, LogStatus, TracingLogSink};

/// Everything a run needs: the destination document, remote clients, the
/// document property store, settings, the run log sink and metrics.
#[derive(Clone)]
pub struct SyncContext {
    /// Destination document ID.
    pub doc_id: String,
    /// Tabular store client.
    pub client: Arc<dyn SheetsClient>,
    /// Modification-time source of truth.
    pub probe: Arc<dyn ModifiedTimeProbe>,
    /// Document-scoped property store.
    pub store: Arc<dyn PropertyStore>,
    /// Settings.
    pub settings: SyncSettings,
    /// Run log destination.
    pub log: Arc<dyn LogSink>,
    /// Metrics recorder.
    pub metrics: SyncMetrics,
}

impl fmt::Debug for SyncContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncContext")
            .field("doc_id", &self.doc_id)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl SyncContext {
    /// Creates a context from ready-made collaborators. Runs are logged through
    /// [`TracingLogSink`] until [`with_log_sink`](Self::with_log_sink) is called.
    pub fn new(
        doc_id: impl Into<String>,
        client: Arc<dyn SheetsClient>,
        probe: Arc<dyn ModifiedTimeProbe>,
        store: Arc<dyn PropertyStore>,
        settings: SyncSettings,
    ) -> Self {
        Self {
            doc_id: doc_id.into(),
            client,
            probe,
            store,
            settings,
            log: Arc::new(TracingLogSink),
            metrics: SyncMetrics::new(),
        }
    }

    /// Creates a context whose client and probe retry transient failures
    /// according to `settings.max_api_retries`.
    pub fn with_retries<C, P>(
        doc_id: impl Into<String>,
        client: C,
        probe: P,
        store: Arc<dyn PropertyStore>,
        settings: SyncSettings,
    ) -> Self
    where
        C: SheetsClient + 'static,
        P: ModifiedTimeProbe + 'static,
    {
        let policy = settings.retry_policy();
        Self::new(
            doc_id,
            Arc::new(RetryingClient::new(client, policy)),
            Arc::new(RetryingClient::new(probe, policy)),
            store,
            settings,
        )
    }

    /// Replaces the run log sink.
    #[must_use]
    pub fn with_log_sink(mut self, log: Arc<dyn LogSink>) -> Self {
        self.log = log;
        self
    }

    /// Formats `now` as a control-table timestamp.
    #[must_use]
    pub fn format_timestamp(&self, now: DateTime<Utc>) -> String {
        format_instant(now, self.settings.timezone)
    }

    /// Records a run log entry. Sink failures are logged and swallowed.
    pub async fn emit_log(
        &self,
        now: DateTime<Utc>,
        source_ref: &str,
        mode: &str,
        has_error: bool,
        total_rows: usize,
        details: String,
    ) {
        let record = LogRecord {
            timestamp: self.format_timestamp(now),
            source_ref: source_ref.to_string(),
            mode: mode.to_string(),
            status: LogStatus::from_error(has_error),
            total_rows,
            details,
        };
        if let Err(err) = self.log.record(record).await {
            tracing::warn!(error = %err, source_ref, "run log write failed");
        }
    }
}
