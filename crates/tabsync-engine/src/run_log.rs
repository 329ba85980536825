//! Run log records and the verbosity policy that gates them.
//!
//! Persisting records (a log sheet, a database) is up to the [`LogSink`]
//! implementation. [`TracingLogSink`] emits them as structured events.

use std::fmt;

use async_trait::async_trait;
use serde::Serialize;

use crate::config::LogLevel;
use crate::error::Result;

/// Source reference recorded for staleness check summaries.
pub const SYSTEM_PROBE_SOURCE: &str = "SYSTEM (Drive API)";
/// Mode recorded for staleness check summaries.
pub const CHECK_DATES_MODE: &str = "Check Dates";

/// Outcome of a logged operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogStatus {
    /// Completed without errors.
    Success,
    /// At least one failure.
    Error,
}

impl LogStatus {
    /// Maps an error flag to a status.
    #[must_use]
    pub const fn from_error(has_error: bool) -> Self {
        if has_error { Self::Error } else { Self::Success }
    }

    /// Returns the canonical name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "SUCCESS",
            Self::Error => "ERROR",
        }
    }
}

impl fmt::Display for LogStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One run log record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogRecord {
    /// `yyyy-MM-dd HH:mm:ss` in the workbook timezone.
    pub timestamp: String,
    /// Source identifier, or [`SYSTEM_PROBE_SOURCE`].
    pub source_ref: String,
    /// Sync mode, or [`CHECK_DATES_MODE`].
    pub mode: String,
    /// Outcome.
    pub status: LogStatus,
    /// Rows merged (or sources probed).
    pub total_rows: usize,
    /// Free-form details.
    pub details: String,
}

/// Destination for run log records.
#[async_trait]
pub trait LogSink: Send + Sync {
    /// Records one entry.
    async fn record(&self, record: LogRecord) -> Result<()>;
}

/// Emits records as `tracing` events on the `tabsync::run_log` target.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLogSink;

#[async_trait]
impl LogSink for TracingLogSink {
    async fn record(&self, record: LogRecord) -> Result<()> {
        match record.status {
            LogStatus::Success => tracing::info!(
                target: "tabsync::run_log",
                timestamp = %record.timestamp,
                source_ref = %record.source_ref,
                mode = %record.mode,
                status = %record.status,
                total_rows = record.total_rows,
                details = %record.details,
                "sync log"
            ),
            LogStatus::Error => tracing::warn!(
                target: "tabsync::run_log",
                timestamp = %record.timestamp,
                source_ref = %record.source_ref,
                mode = %record.mode,
                status = %record.status,
                total_rows = record.total_rows,
                details = %record.details,
                "sync log"
            ),
        }
        Ok(())
    }
}

/// Whether a queue item result is logged.
///
/// `Warnings` counts any table reported as `Skipped` as a warning.
#[must_use]
pub fn should_log_item(level: LogLevel, has_error: bool, details: &str) -> bool {
    match level {
        LogLevel::None => false,
        LogLevel::Errors => has_error,
        LogLevel::Warnings => has_error || details.contains("Skipped"),
        LogLevel::Basic | LogLevel::All => true,
    }
}

/// Whether a staleness check summary is logged.
#[must_use]
pub fn should_log_schedule(level: LogLevel, has_error: bool) -> bool {
    match level {
        LogLevel::All => true,
        LogLevel::Errors | LogLevel::Warnings => has_error,
        LogLevel::None | LogLevel::Basic => false,
    }
}
