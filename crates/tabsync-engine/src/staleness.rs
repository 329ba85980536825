//! Staleness checker: refreshes recorded modification times from the
//! source of truth.
//!
//! For every control row with a source reference the checker decides whether
//! to probe, probes, and records the result. Rows are independent: a failed
//! probe records the `Error` sentinel on that row only. All values are written
//! back in one column write.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

use tabsync_core::table::{Cell, column_span_range, quote_sheet};
use tabsync_core::timestamp::{ERROR_SENTINEL, format_instant};

use crate::context::SyncContext;
use crate::control::{ControlEntry, ControlTable};
use crate::error::Result;
use crate::run_log::{CHECK_DATES_MODE, SYSTEM_PROBE_SOURCE, should_log_schedule};

const MILLIS_PER_DAY: i64 = 24 * 60 * 60 * 1000;

/// How old a recorded modification time may be and still get re-probed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StalenessWindow {
    /// Every row is probed.
    Unbounded,
    /// Rows recorded more than this many days ago are skipped.
    Days(u32),
}

impl StalenessWindow {
    /// Maps a schedule's `max_age_days` (`0` = unbounded) to a window.
    #[must_use]
    pub const fn from_max_age_days(days: u32) -> Self {
        if days == 0 { Self::Unbounded } else { Self::Days(days) }
    }

    /// Returns true if a value recorded `age` ago falls outside the window.
    #[must_use]
    pub fn excludes(self, age: chrono::Duration) -> bool {
        match self {
            Self::Unbounded => false,
            Self::Days(days) => age.num_milliseconds() > i64::from(days) * MILLIS_PER_DAY,
        }
    }

    /// Returns the wider of two windows.
    #[must_use]
    pub fn union(self, other: Self) -> Self {
        match (self, other) {
            (Self::Days(a), Self::Days(b)) => Self::Days(a.max(b)),
            _ => Self::Unbounded,
        }
    }
}

impl fmt::Display for StalenessWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unbounded => f.write_str("All"),
            Self::Days(days) => write!(f, "{days} days"),
        }
    }
}

/// Statistics of one check.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CheckStats {
    /// Rows probed.
    pub checked: usize,
    /// Rows whose recorded value changed.
    pub changed: usize,
    /// Probes that failed.
    pub errors: usize,
}

/// What happened to one row.
#[derive(Debug, Clone, PartialEq)]
enum RowOutcome {
    Retained,
    Unchanged,
    Noise,
    Changed(String),
    Failed,
}

/// Probes sources and refreshes the last-modified column.
#[derive(Debug)]
pub struct StalenessChecker<'a> {
    ctx: &'a SyncContext,
}

impl<'a> StalenessChecker<'a> {
    /// Creates a checker over `ctx`.
    #[must_use]
    pub const fn new(ctx: &'a SyncContext) -> Self {
        Self { ctx }
    }

    /// Runs one check with `window`.
    ///
    /// A missing control table, or one lacking the id or last-modified column,
    /// is logged and yields empty stats without writing anything.
    ///
    /// # Errors
    ///
    /// Returns an error if reading or writing the control table fails.
    #[tracing::instrument(skip(self, now), fields(doc_id = %self.ctx.doc_id, window = %window))]
    pub async fn check(&self, window: StalenessWindow, now: DateTime<Utc>) -> Result<CheckStats> {
        let _timer = self.ctx.metrics.time_run("staleness_check");
        let settings = &self.ctx.settings;
        let sheet = &settings.control_sheet_name;

        let grid = self
            .ctx
            .client
            .read_range(&self.ctx.doc_id, &quote_sheet(sheet))
            .await?;
        if grid.len() < 2 {
            tracing::info!("control table has no data rows");
            return Ok(CheckStats::default());
        }

        let table = match ControlTable::parse(grid, 1, &settings.headers, settings.timezone) {
            Ok(Some(table)) => table,
            Ok(None) => return Ok(CheckStats::default()),
            Err(err) => {
                tracing::error!(error = %err, "control table unusable, skipping check");
                return Ok(CheckStats::default());
            }
        };

        let mut stats = CheckStats::default();
        let mut values = Vec::with_capacity(table.entries.len());
        for entry in &table.entries {
            let outcome = self.evaluate(entry, window, now).await;
            let cell = match outcome {
                RowOutcome::Retained => entry.raw_last_modified.clone(),
                RowOutcome::Unchanged | RowOutcome::Noise => {
                    stats.checked += 1;
                    entry.raw_last_modified.clone()
                }
                RowOutcome::Changed(formatted) => {
                    stats.checked += 1;
                    stats.changed += 1;
                    Cell::Text(formatted)
                }
                RowOutcome::Failed => {
                    stats.checked += 1;
                    stats.errors += 1;
                    Cell::from(ERROR_SENTINEL)
                }
            };
            values.push(vec![cell]);
        }

        let column = table.columns.last_modified + 1;
        let range = column_span_range(sheet, column, 2, values.len() + 1);
        self.ctx
            .client
            .write_range(&self.ctx.doc_id, &range, &values)
            .await?;

        tracing::info!(
            checked = stats.checked,
            changed = stats.changed,
            errors = stats.errors,
            "staleness check complete"
        );

        let has_error = stats.errors > 0;
        if should_log_schedule(settings.log_level, has_error) {
            let details = format!(
                "Range: {window}, Checked: {}, Changed: {}, Errors: {}",
                stats.checked, stats.changed, stats.errors
            );
            self.ctx
                .emit_log(now, SYSTEM_PROBE_SOURCE, CHECK_DATES_MODE, has_error, stats.checked, details)
                .await;
        }

        Ok(stats)
    }

    /// Runs a manual check with one window (`0` = unbounded). Takes no lease.
    ///
    /// # Errors
    ///
    /// Returns an error if reading or writing the control table fails.
    pub async fn run_single_check(&self, max_age_days: u32, now: DateTime<Utc>) -> Result<CheckStats> {
        let window = StalenessWindow::from_max_age_days(max_age_days);
        tracing::info!(window = %window, "manual staleness check");
        self.check(window, now).await
    }

    async fn evaluate(
        &self,
        entry: &ControlEntry,
        window: StalenessWindow,
        now: DateTime<Utc>,
    ) -> RowOutcome {
        if !entry.has_source() || entry.last_update.is_error() {
            return RowOutcome::Retained;
        }

        let tz = self.ctx.settings.timezone;
        let recorded = entry.last_modified.instant(tz);
        if recorded.is_some_and(|at| window.excludes(now - at)) {
            return RowOutcome::Retained;
        }

        let source_id = entry.source_id();
        let outcome = match self.ctx.probe.modified_time(&source_id).await {
            Ok(modified) => {
                let formatted = format_instant(modified, tz);
                if entry.raw_last_modified.trimmed() == formatted {
                    RowOutcome::Unchanged
                } else if recorded.is_some_and(|at| {
                    (modified - at).abs() <= self.ctx.settings.probe_tolerance()
                }) {
                    RowOutcome::Noise
                } else {
                    RowOutcome::Changed(formatted)
                }
            }
            Err(err) => {
                tracing::warn!(source_id = %source_id, row = entry.row_index, error = %err, "modification time probe failed");
                RowOutcome::Failed
            }
        };

        self.ctx.metrics.record_probe(match outcome {
            RowOutcome::Retained | RowOutcome::Unchanged => "unchanged",
            RowOutcome::Noise => "noise",
            RowOutcome::Changed(_) => "changed",
            RowOutcome::Failed => "error",
        });
        outcome
    }
}
