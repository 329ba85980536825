//! Metrics for the synchronization engine.
//!
//! Recorded through the `metrics` crate facade; install any exporter to
//! collect them. Without a recorder every call is a no-op.
//!
//! ## Metrics Exported
//!
//! | Metric | Type | Labels | Description |
//! |--------|------|--------|-------------|
//! | `tabsync_staleness_probes_total` | Counter | `outcome` | Modification-time probes (unchanged, noise, changed, error) |
//! | `tabsync_queue_items_total` | Counter | `mode`, `status` | Processed queue items |
//! | `tabsync_rows_written_total` | Counter | `table`, `mode` | Source rows merged into destination tables |
//! | `tabsync_schedule_ticks_total` | Counter | `outcome` | Schedule tick outcomes |
//! | `tabsync_run_duration_seconds` | Histogram | `operation` | Wall time of a sync run or staleness check |
//! | `tabsync_remote_retries_total` | Counter | `operation` | Retried remote calls (recorded by `tabsync_core::retry`) |
//!
//! ## Usage
//!
//! ```rust,no_run
//! use tabsync_engine::metrics::SyncMetrics;
//!
//! let metrics = SyncMetrics::new();
//! metrics.record_probe("changed");
//! metrics.record_queue_item("append", "success");
//! ```

use std::time::{Duration, Instant};

use metrics::{counter, histogram};

/// Metric names as constants for consistency.
pub mod names {
    /// Counter: modification-time probes by outcome.
    pub const STALENESS_PROBES_TOTAL: &str = "tabsync_staleness_probes_total";
    /// Counter: processed queue items.
    pub const QUEUE_ITEMS_TOTAL: &str = "tabsync_queue_items_total";
    /// Counter: source rows merged into destination tables.
    pub const ROWS_WRITTEN_TOTAL: &str = "tabsync_rows_written_total";
    /// Counter: schedule ticks by outcome.
    pub const SCHEDULE_TICKS_TOTAL: &str = "tabsync_schedule_ticks_total";
    /// Histogram: run wall time in seconds.
    pub const RUN_DURATION_SECONDS: &str = "tabsync_run_duration_seconds";
    /// Counter: retried remote calls.
    pub const REMOTE_RETRIES_TOTAL: &str = tabsync_core::retry::RETRIES_TOTAL;
}

/// Label keys used across metrics.
pub mod labels {
    /// Outcome (probe result, tick result).
    pub const OUTCOME: &str = "outcome";
    /// Sync mode (sync, append, replace).
    pub const MODE: &str = "mode";
    /// Item status (success, error).
    pub const STATUS: &str = "status";
    /// Destination table name.
    pub const TABLE: &str = "table";
    /// Timed operation (`run_sync`, `staleness_check`).
    pub const OPERATION: &str = "operation";
}

/// Records engine metrics with consistent labels. Cheap to clone.
#[derive(Debug, Clone, Default)]
pub struct SyncMetrics {
    _private: (),
}

impl SyncMetrics {
    /// Creates a new metrics recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one staleness probe.
    pub fn record_probe(&self, outcome: &str) {
        counter!(
            names::STALENESS_PROBES_TOTAL,
            labels::OUTCOME => outcome.to_string(),
        )
        .increment(1);
    }

    /// Records one processed queue item.
    pub fn record_queue_item(&self, mode: &str, status: &str) {
        counter!(
            names::QUEUE_ITEMS_TOTAL,
            labels::MODE => mode.to_string(),
            labels::STATUS => status.to_string(),
        )
        .increment(1);
    }

    /// Records rows merged into a destination table.
    pub fn record_rows_written(&self, table: &str, mode: &str, rows: usize) {
        counter!(
            names::ROWS_WRITTEN_TOTAL,
            labels::TABLE => table.to_string(),
            labels::MODE => mode.to_string(),
        )
        .increment(u64::try_from(rows).unwrap_or(u64::MAX));
    }

    /// Records a schedule tick outcome.
    pub fn record_schedule_tick(&self, outcome: &str) {
        counter!(
            names::SCHEDULE_TICKS_TOTAL,
            labels::OUTCOME => outcome.to_string(),
        )
        .increment(1);
    }

    /// Records run wall time.
    pub fn observe_run_duration(&self, operation: &str, duration: Duration) {
        histogram!(
            names::RUN_DURATION_SECONDS,
            labels::OPERATION => operation.to_string(),
        )
        .record(duration.as_secs_f64());
    }

    /// Returns a guard that records the run duration of `operation` on drop.
    #[must_use]
    pub fn time_run(&self, operation: &'static str) -> TimingGuard<impl FnOnce(Duration) + use<>> {
        let metrics = self.clone();
        TimingGuard::new(move |duration| metrics.observe_run_duration(operation, duration))
    }
}

/// RAII guard for timing operations.
///
/// Calls `on_drop` with the elapsed time when dropped.
pub struct TimingGuard<F>
where
    F: FnOnce(Duration),
{
    start: Instant,
    on_drop: Option<F>,
}

impl<F> TimingGuard<F>
where
    F: FnOnce(Duration),
{
    /// Creates a new timing guard that will call `on_drop` with the elapsed duration.
    pub fn new(on_drop: F) -> Self {
        Self {
            start: Instant::now(),
            on_drop: Some(on_drop),
        }
    }

    /// Returns the elapsed time since the guard was created.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

impl<F> Drop for TimingGuard<F>
where
    F: FnOnce(Duration),
{
    fn drop(&mut self) {
        if let Some(f) = self.on_drop.take() {
            f(self.start.elapsed());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_without_a_recorder() {
        let metrics = SyncMetrics::new();
        metrics.record_probe("changed");
        metrics.record_queue_item("sync", "error");
        metrics.record_rows_written("Orders", "append", 12);
        metrics.record_schedule_tick("nothing_due");
        metrics.observe_run_duration("run_sync", Duration::from_millis(20));
        drop(metrics.time_run("staleness_check"));
    }

    #[test]
    fn timing_guard_measures_duration() {
        let mut recorded = None;
        {
            let _guard = TimingGuard::new(|d| recorded = Some(d));
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(recorded.is_some_and(|d| d >= Duration::from_millis(5)));
    }
}
