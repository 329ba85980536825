//! Pre-built test fixtures for common test scenarios.
//!
//! [`TestHarness`] wires a [`MemoryWorkbook`], a [`ScriptedProbe`], an
//! in-memory property store and a [`MemoryLogSink`] into a [`SyncContext`]
//! for one destination document with a `urls` control table.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};

use tabsync_core::remote::Grid;
use tabsync_core::storage::MemoryPropertyStore;
use tabsync_core::table::{Cell, row};
use tabsync_core::timestamp::TIMESTAMP_FORMAT;
use tabsync_engine::config::{DataRange, Schedule, SyncSettings};
use tabsync_engine::context::SyncContext;
use tabsync_engine::error::Result;
use tabsync_engine::run_log::{LogRecord, LogSink};

use crate::workbook::{MemoryWorkbook, ScriptedProbe};

/// Destination document ID used by the harness.
pub const DEST_DOC: &str = "dest-doc";

/// Control table header used by the harness.
pub const CONTROL_HEADER: [&str; 3] = ["sheet_id", "last_modified_datetime", "last_update_datetime"];

/// Parses `yyyy-MM-dd HH:mm:ss` as UTC.
#[must_use]
pub fn at(raw: &str) -> DateTime<Utc> {
    NaiveDateTime::parse_from_str(raw, TIMESTAMP_FORMAT)
        .expect("valid timestamp")
        .and_utc()
}

/// Builds a data range whose destination table is `name`.
#[must_use]
pub fn data_range(name: &str, range: &str, not_empty_column: &str) -> DataRange {
    DataRange {
        source_name: name.to_string(),
        range: range.to_string(),
        not_empty_column: not_empty_column.to_string(),
    }
}

/// Settings for tests: no inter-item delay and no retries.
#[must_use]
pub fn test_settings(data_ranges: Vec<DataRange>, schedules: Vec<Schedule>) -> SyncSettings {
    SyncSettings {
        sleep_time_ms: 0,
        max_api_retries: 0,
        data_ranges,
        schedules,
        ..SyncSettings::default()
    }
}

/// A [`LogSink`] that keeps records in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryLogSink {
    records: Arc<Mutex<Vec<LogRecord>>>,
}

impl MemoryLogSink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the recorded entries.
    #[must_use]
    pub fn records(&self) -> Vec<LogRecord> {
        self.records.lock().expect("lock").clone()
    }
}

#[async_trait]
impl LogSink for MemoryLogSink {
    async fn record(&self, record: LogRecord) -> Result<()> {
        self.records.lock().expect("lock").push(record);
        Ok(())
    }
}

/// A destination document with a control table, ready to sync.
pub struct TestHarness {
    /// Documents (destination and sources).
    pub workbook: MemoryWorkbook,
    /// Modification-time answers.
    pub probe: ScriptedProbe,
    /// Property store behind the schedule lease and run state.
    pub store: Arc<MemoryPropertyStore>,
    /// Recorded run log.
    pub log: MemoryLogSink,
    /// Context over all of the above.
    pub ctx: SyncContext,
}

impl TestHarness {
    /// Creates a harness with an empty control table.
    #[must_use]
    pub fn new(settings: SyncSettings) -> Self {
        let workbook = MemoryWorkbook::new();
        let probe = ScriptedProbe::new();
        let store = Arc::new(MemoryPropertyStore::new());
        let log = MemoryLogSink::new();

        workbook.set_values(DEST_DOC, &settings.control_sheet_name, vec![row(CONTROL_HEADER)]);
        workbook.add_table(DEST_DOC, &settings.control_sheet_name, &settings.control_table_name);

        let ctx = SyncContext::new(
            DEST_DOC,
            Arc::new(workbook.clone()),
            Arc::new(probe.clone()),
            store.clone(),
            settings,
        )
        .with_log_sink(Arc::new(log.clone()));

        Self {
            workbook,
            probe,
            store,
            log,
            ctx,
        }
    }

    /// Replaces the control rows (header excluded) and stretches the control
    /// table over them.
    pub fn set_control(&self, rows: &[[&str; 3]]) {
        let sheet = &self.ctx.settings.control_sheet_name;
        let grid: Grid = std::iter::once(row(CONTROL_HEADER))
            .chain(rows.iter().map(|r| row(*r)))
            .collect();
        let len = grid.len();
        self.workbook.set_values(DEST_DOC, sheet, grid);
        self.workbook.resize_table(DEST_DOC, sheet, len);
    }

    /// Returns the control rows (header excluded), each padded to three cells.
    #[must_use]
    pub fn control_rows(&self) -> Vec<[String; 3]> {
        self.workbook
            .values(DEST_DOC, &self.ctx.settings.control_sheet_name)
            .into_iter()
            .skip(1)
            .map(|cells| {
                let cell = |i: usize| cells.get(i).map(Cell::to_string).unwrap_or_default();
                [cell(0), cell(1), cell(2)]
            })
            .collect()
    }

    /// Stores `rows` (header first) as sheet `sheet` of source document `source_id`.
    pub fn add_source(&self, source_id: &str, sheet: &str, rows: &[&[&str]]) {
        let grid = rows.iter().map(|r| row(r.iter().copied())).collect();
        self.workbook.set_values(source_id, sheet, grid);
    }

    /// Returns the destination sheet contents as trimmed strings.
    #[must_use]
    pub fn destination(&self, sheet: &str) -> Vec<Vec<String>> {
        self.workbook
            .values(DEST_DOC, sheet)
            .into_iter()
            .map(|cells| cells.iter().map(Cell::trimmed).collect())
            .collect()
    }
}
