//! Sync executor: turns one source's rows into batched destination writes.
//!
//! Each table plan yields the write requests for that table and moves the
//! [`TargetState`] to the table's new contents. All plans of one source are
//! sent in a single `batch_write`.

use std::fmt;

use tabsync_core::remote::{Grid, WriteReply, WriteRequest};
use tabsync_core::table::{Cell, GridRange};

use crate::config::DataRange;
use crate::context::SyncContext;
use crate::error::{Error, Result};
use crate::queue::SyncMode;
use crate::snapshot::{TableState, TargetState};

/// Name of the first destination column.
pub const SOURCE_ID_COLUMN: &str = "Source_ID";

/// Why a table produced no writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The source range was empty.
    EmptySource,
    /// Nothing to append.
    NoNewRows,
}

/// Result for one destination table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableOutcome {
    /// Rows were merged.
    Written {
        /// Merge mode.
        mode: SyncMode,
        /// Source rows merged.
        count: usize,
    },
    /// No writes were queued.
    Skipped(SkipReason),
}

impl TableOutcome {
    /// Source rows merged.
    #[must_use]
    pub const fn count(&self) -> usize {
        match self {
            Self::Written { count, .. } => *count,
            Self::Skipped(_) => 0,
        }
    }
}

impl fmt::Display for TableOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Written { mode, count } => write!(f, "{mode}({count})"),
            Self::Skipped(_) => f.write_str("Skipped(0)"),
        }
    }
}

/// Write requests and outcome for one table.
#[derive(Debug, Clone, PartialEq)]
pub struct TablePlan {
    /// Requests in send order.
    pub requests: Vec<WriteRequest>,
    /// Outcome to report.
    pub outcome: TableOutcome,
}

impl TablePlan {
    fn skipped(reason: SkipReason) -> Self {
        Self {
            requests: Vec::new(),
            outcome: TableOutcome::Skipped(reason),
        }
    }
}

/// Per-table outcomes of one source.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceOutcome {
    /// `(table, outcome)` in configuration order.
    pub tables: Vec<(String, TableOutcome)>,
}

impl SourceOutcome {
    /// Sum of merged rows.
    #[must_use]
    pub fn total_rows(&self) -> usize {
        self.tables.iter().map(|(_, o)| o.count()).sum()
    }

    /// `table: outcome` pairs joined by `; `.
    #[must_use]
    pub fn details(&self) -> String {
        self.tables
            .iter()
            .map(|(table, outcome)| format!("{table}: {outcome}"))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// Prefixes `source_id` and fits the row to `width` cells.
#[must_use]
pub fn normalize_row(source_id: &str, row: &[Cell], width: usize) -> Vec<Cell> {
    let mut out = Vec::with_capacity(width);
    out.push(Cell::from(source_id));
    out.extend(row.iter().cloned());
    out.resize(width, Cell::Empty);
    out
}

/// Checks a destination header against `["Source_ID", ...source_header]`.
///
/// # Errors
///
/// Returns [`Error::HeaderMismatch`] naming the first differing column.
pub fn validate_header(table: &str, destination: &[Cell], source: &[Cell]) -> Result<()> {
    let mismatch = |column: usize, expected: String, found: String| Error::HeaderMismatch {
        table: table.to_string(),
        column,
        expected,
        found,
    };

    let first = destination.first().map(Cell::trimmed).unwrap_or_default();
    if first != SOURCE_ID_COLUMN {
        return Err(mismatch(1, SOURCE_ID_COLUMN.to_string(), first));
    }

    let named = &destination[1..];
    let name = |cells: &[Cell], i: usize| cells.get(i).map(Cell::trimmed).unwrap_or_default();
    for i in 0..named.len().max(source.len()) {
        let expected = name(named, i);
        let found = name(source, i);
        if expected != found {
            return Err(mismatch(i + 2, expected, found));
        }
    }
    Ok(())
}

/// Plans the writes merging `source_rows` (header first) into `table`.
///
/// On success the snapshot holds the table's new contents.
///
/// # Errors
///
/// Returns [`Error::MissingInfrastructure`] if the destination sheet does not
/// exist, [`Error::UnreadableTarget`] if its rows could not be read,
/// [`Error::MissingColumn`] if its structured read was incomplete and
/// [`Error::HeaderMismatch`] if the headers disagree.
pub fn plan_table(
    table: &str,
    source_rows: &[Vec<Cell>],
    state: &mut TargetState,
    source_id: &str,
    mode: SyncMode,
) -> Result<TablePlan> {
    let sheet = table;
    let Some(sheet_id) = state.sheets.get(sheet).map(|info| info.sheet_id) else {
        return Err(Error::MissingInfrastructure {
            sheet: sheet.to_string(),
        });
    };
    if state.unreadable.contains(sheet) {
        return Err(Error::UnreadableTarget {
            table: table.to_string(),
        });
    }
    if let Some(missing) = state.incomplete.get(sheet) {
        return Err(Error::MissingColumn {
            table: table.to_string(),
            row: missing.row,
            column: missing.column.clone(),
        });
    }
    let Some((source_header, source_data)) = source_rows.split_first() else {
        return Ok(TablePlan::skipped(SkipReason::EmptySource));
    };

    let current = state.rows(sheet);
    let headers: Vec<Cell> = match current.first() {
        None => std::iter::once(Cell::from(SOURCE_ID_COLUMN))
            .chain(source_header.iter().cloned())
            .collect(),
        Some(existing) => {
            let mut header = existing.clone();
            while header.last().is_some_and(Cell::is_blank) {
                header.pop();
            }
            validate_header(table, &header, source_header)?;
            header
        }
    };
    let width = headers.len();

    let new_rows: Grid = source_data
        .iter()
        .map(|row| normalize_row(source_id, row, width))
        .collect();
    let count = new_rows.len();
    if count == 0 && mode == SyncMode::Append {
        return Ok(TablePlan::skipped(SkipReason::NoNewRows));
    }

    let previous_len = current.len();
    let (full, mut write, start_row): (Grid, Grid, usize) = match mode {
        SyncMode::Replace => {
            let full: Grid = std::iter::once(headers.clone()).chain(new_rows).collect();
            (full.clone(), full, 0)
        }
        SyncMode::Sync => {
            let full: Grid = if current.is_empty() {
                std::iter::once(headers.clone()).chain(new_rows).collect()
            } else {
                current
                    .iter()
                    .enumerate()
                    .filter(|(i, r)| *i == 0 || r.first().map(Cell::trimmed).as_deref() != Some(source_id))
                    .map(|(_, r)| r.clone())
                    .chain(new_rows)
                    .collect()
            };
            (full.clone(), full, 0)
        }
        SyncMode::Append if current.is_empty() => {
            let full: Grid = std::iter::once(headers.clone()).chain(new_rows).collect();
            (full.clone(), full, 0)
        }
        SyncMode::Append => {
            let full: Grid = current.iter().cloned().chain(new_rows.iter().cloned()).collect();
            (full, new_rows, previous_len)
        }
    };

    // Rows left over from a longer previous table.
    if mode == SyncMode::Sync && full.len() < previous_len {
        write.extend(std::iter::repeat_n(vec![Cell::Empty; width], previous_len - full.len()));
    }

    let mut requests = Vec::new();
    let Some(info) = state.sheets.get_mut(sheet) else {
        return Err(Error::MissingInfrastructure {
            sheet: sheet.to_string(),
        });
    };

    if info.table.is_none() && !full.is_empty() {
        if width > info.grid.column_count {
            info.grid.column_count = width + 1;
            requests.push(WriteRequest::UpdateSheetProperties {
                sheet_id,
                row_count: None,
                column_count: Some(info.grid.column_count),
            });
        }
        requests.push(WriteRequest::AddTable {
            name: table.to_string(),
            range: GridRange {
                sheet_id,
                start_row_index: 0,
                end_row_index: full.len(),
                start_column_index: 0,
                end_column_index: width,
            },
            columns: headers.iter().map(ToString::to_string).collect(),
        });
        info.table = TableState::Pending;
    }

    let required_rows = full.len().max(start_row + write.len());
    if required_rows > info.grid.row_count || width > info.grid.column_count {
        info.grid.row_count = info.grid.row_count.max(required_rows);
        info.grid.column_count = info.grid.column_count.max(width);
        requests.push(WriteRequest::UpdateSheetProperties {
            sheet_id,
            row_count: Some(info.grid.row_count),
            column_count: Some(info.grid.column_count),
        });
    }

    if !write.is_empty() {
        if mode == SyncMode::Replace && start_row == 0 {
            requests.push(WriteRequest::ClearValues { sheet_id });
        }
        requests.push(WriteRequest::UpdateCells {
            sheet_id,
            start_row_index: start_row,
            start_column_index: 0,
            rows: write,
        });
    }

    if let Some(table_id) = info.table.table_id() {
        requests.push(WriteRequest::UpdateTable {
            table_id: table_id.to_string(),
            range: GridRange {
                sheet_id,
                start_row_index: 0,
                end_row_index: full.len(),
                start_column_index: 0,
                end_column_index: width,
            },
        });
    }

    state.values.insert(sheet.to_string(), full);

    Ok(TablePlan {
        requests,
        outcome: TableOutcome::Written { mode, count },
    })
}

/// Drops trailing rows whose `not_empty_column` cell is blank.
///
/// Rows are kept as they are when there is at most a header, no column is
/// configured, or the header lacks the column.
#[must_use]
pub fn trim_trailing_empty_rows(mut rows: Grid, not_empty_column: &str) -> Grid {
    if rows.len() <= 1 || not_empty_column.is_empty() {
        return rows;
    }
    let Some(check) = rows[0].iter().position(|c| c.trimmed() == not_empty_column) else {
        return rows;
    };
    let keep = rows
        .iter()
        .rposition(|r| r.get(check).is_some_and(|c| !c.is_blank()))
        .map_or(1, |last| last + 1);
    rows.truncate(keep);
    rows
}

/// Reads every configured range from a source document in one call and trims
/// trailing empty rows. The result is aligned with `ranges`.
///
/// # Errors
///
/// Returns an error if the batched read fails.
pub async fn read_and_trim_source(
    ctx: &SyncContext,
    source_id: &str,
    ranges: &[DataRange],
) -> Result<Vec<Grid>> {
    let a1: Vec<String> = ranges.iter().map(|r| r.range.clone()).collect();
    let mut grids = ctx.client.batch_read(source_id, &a1).await?;
    grids.resize_with(ranges.len(), Vec::new);
    Ok(grids
        .into_iter()
        .zip(ranges)
        .map(|(rows, range)| trim_trailing_empty_rows(rows, &range.not_empty_column))
        .collect())
}

/// Merges one source into every configured table with a single batched write.
///
/// `source_tables` is aligned with the configured data ranges.
///
/// # Errors
///
/// Returns the first table's consistency error, or the write error. Nothing is
/// sent when planning fails, and `state` is only updated after a successful write.
#[tracing::instrument(skip(ctx, state, source_tables), fields(doc_id = %ctx.doc_id))]
pub async fn sync_source(
    ctx: &SyncContext,
    state: &mut TargetState,
    source_id: &str,
    mode: SyncMode,
    source_tables: &[Grid],
) -> Result<SourceOutcome> {
    let mut working = state.clone();
    let mut requests = Vec::new();
    let mut outcome = SourceOutcome::default();

    for (range, rows) in ctx.settings.data_ranges.iter().zip(source_tables) {
        let table = range.source_name.as_str();
        let plan = if rows.is_empty() {
            TablePlan::skipped(SkipReason::EmptySource)
        } else {
            plan_table(table, rows, &mut working, source_id, mode)?
        };
        tracing::debug!(table, outcome = %plan.outcome, requests = plan.requests.len(), "table planned");
        requests.extend(plan.requests);
        outcome.tables.push((table.to_string(), plan.outcome));
    }

    if requests.is_empty() {
        return Ok(outcome);
    }

    let replies = ctx.client.batch_write(&ctx.doc_id, &requests).await?;
    for reply in replies {
        if let WriteReply::AddTable { table_id, sheet_id } = reply {
            if !working.attach_table(sheet_id, table_id.as_str()) {
                tracing::warn!(sheet_id, table_id = %table_id, "created table on unknown sheet");
            }
        }
    }
    *state = working;

    for (table, result) in &outcome.tables {
        if let TableOutcome::Written { mode, count } = result {
            ctx.metrics.record_rows_written(table, mode.as_str(), *count);
        }
    }
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::SheetInfo;
    use tabsync_core::table::{GridSize, row};

    fn state_with(sheet: &str, table: TableState, rows: Grid) -> TargetState {
        let mut state = TargetState::default();
        state.sheets.insert(
            sheet.to_string(),
            SheetInfo {
                sheet_id: 1,
                table,
                grid: GridSize::default(),
            },
        );
        state.values.insert(sheet.to_string(), rows);
        state
    }

    fn source() -> Grid {
        vec![row(["h1", "h2"]), row(["a", "b"]), row(["c", "d"])]
    }

    fn update_cells(requests: &[WriteRequest]) -> Vec<(usize, &Grid)> {
        requests
            .iter()
            .filter_map(|r| match r {
                WriteRequest::UpdateCells {
                    start_row_index,
                    rows,
                    ..
                } => Some((*start_row_index, rows)),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn normalization_pads_and_truncates() {
        assert_eq!(normalize_row("X", &row(["a"]), 3), row(["X", "a", ""]));
        assert_eq!(normalize_row("X", &row(["a", "b", "c"]), 2), row(["X", "a"]));
    }

    #[test]
    fn header_validation_reports_first_difference() {
        let dest = row(["Source_ID", "h1"]);
        let err = validate_header("Orders", &dest, &row(["h1", "h2"])).unwrap_err();
        assert_eq!(
            err.to_string(),
            "source header mismatch in table 'Orders': column 3 expected '', got 'h2'"
        );
        let err = validate_header("Orders", &row(["id", "h1"]), &row(["h1"])).unwrap_err();
        assert!(matches!(err, Error::HeaderMismatch { column: 1, .. }));
        validate_header("Orders", &row([" Source_ID ", "h1"]), &row(["h1"])).expect("valid");
    }

    #[test]
    fn append_to_empty_sheet_creates_table() {
        let mut state = state_with("Orders", TableState::None, Vec::new());
        let plan = plan_table("Orders", &source(), &mut state, "S1", SyncMode::Append).expect("plan");

        assert_eq!(plan.outcome, TableOutcome::Written { mode: SyncMode::Append, count: 2 });
        assert!(matches!(plan.requests[0], WriteRequest::AddTable { .. }));
        let writes = update_cells(&plan.requests);
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].0, 0);
        assert_eq!(writes[0].1[0], row(["Source_ID", "h1", "h2"]));
        assert_eq!(state.sheets["Orders"].table, TableState::Pending);
        assert_eq!(state.values["Orders"].len(), 3);
    }

    #[test]
    fn append_writes_after_existing_rows() {
        let existing = vec![row(["Source_ID", "h1", "h2"]), row(["S0", "x", "y"])];
        let mut state = state_with("Orders", TableState::Attached("t1".into()), existing);
        let plan = plan_table("Orders", &source(), &mut state, "S1", SyncMode::Append).expect("plan");

        let writes = update_cells(&plan.requests);
        assert_eq!(writes[0].0, 2);
        assert_eq!(writes[0].1.len(), 2);
        assert!(matches!(
            plan.requests.last(),
            Some(WriteRequest::UpdateTable { range, .. }) if range.end_row_index == 4
        ));
    }

    #[test]
    fn append_without_rows_is_skipped() {
        let mut state = state_with("Orders", TableState::None, Vec::new());
        let plan = plan_table("Orders", &[row(["h1"])], &mut state, "S1", SyncMode::Append).expect("plan");
        assert!(plan.requests.is_empty());
        assert_eq!(plan.outcome, TableOutcome::Skipped(SkipReason::NoNewRows));
        assert!(state.values["Orders"].is_empty());
    }

    #[test]
    fn sync_replaces_own_rows_and_blanks_tail() {
        let existing = vec![
            row(["Source_ID", "h1", "h2"]),
            row(["S1", "old", "1"]),
            row(["S0", "keep", "2"]),
            row(["S1", "old", "3"]),
            row(["S1", "old", "4"]),
        ];
        let mut state = state_with("Orders", TableState::Attached("t1".into()), existing);
        let plan = plan_table("Orders", &source(), &mut state, "S1", SyncMode::Sync).expect("plan");

        let rows = &state.values["Orders"];
        assert_eq!(rows.len(), 4);
        assert_eq!(rows[1], row(["S0", "keep", "2"]));
        assert_eq!(rows[2], row(["S1", "a", "b"]));

        let writes = update_cells(&plan.requests);
        assert_eq!(writes[0].0, 0);
        assert_eq!(writes[0].1.len(), 5);
        assert!(writes[0].1[4].iter().all(Cell::is_blank));
    }

    #[test]
    fn replace_clears_first() {
        let existing = vec![row(["Source_ID", "h1", "h2"]), row(["S0", "x", "y"])];
        let mut state = state_with("Orders", TableState::Attached("t1".into()), existing);
        let plan = plan_table("Orders", &source(), &mut state, "S1", SyncMode::Replace).expect("plan");
        assert!(matches!(plan.requests[0], WriteRequest::ClearValues { sheet_id: 1 }));
        assert_eq!(state.values["Orders"].len(), 3);
    }

    #[test]
    fn grid_grows_monotonically() {
        let mut state = state_with("Orders", TableState::Attached("t1".into()), Vec::new());
        state.sheets.get_mut("Orders").expect("sheet").grid = GridSize {
            row_count: 2,
            column_count: 10,
        };
        let plan = plan_table("Orders", &source(), &mut state, "S1", SyncMode::Append).expect("plan");
        assert!(plan.requests.contains(&WriteRequest::UpdateSheetProperties {
            sheet_id: 1,
            row_count: Some(3),
            column_count: Some(10),
        }));
    }

    #[test]
    fn narrow_sheet_is_widened_before_table() {
        let mut state = state_with("Orders", TableState::None, Vec::new());
        state.sheets.get_mut("Orders").expect("sheet").grid.column_count = 2;
        let plan = plan_table("Orders", &source(), &mut state, "S1", SyncMode::Append).expect("plan");
        assert_eq!(
            plan.requests[0],
            WriteRequest::UpdateSheetProperties {
                sheet_id: 1,
                row_count: None,
                column_count: Some(4),
            }
        );
        assert!(matches!(plan.requests[1], WriteRequest::AddTable { .. }));
    }

    #[test]
    fn missing_sheet_is_infrastructure_error() {
        let mut state = TargetState::default();
        let err = plan_table("Orders", &source(), &mut state, "S1", SyncMode::Append).unwrap_err();
        assert!(matches!(err, Error::MissingInfrastructure { .. }));
    }

    #[test]
    fn unreadable_table_is_never_written() {
        let mut state = state_with("Orders", TableState::None, Vec::new());
        state.unreadable.insert("Orders".into());
        let before = state.clone();

        let err = plan_table("Orders", &source(), &mut state, "S1", SyncMode::Append).unwrap_err();

        assert!(matches!(err, Error::UnreadableTarget { .. }));
        assert!(err.is_consistency());
        assert_eq!(state, before);
    }

    #[test]
    fn trims_trailing_blank_rows() {
        let rows = vec![row(["id", "v"]), row(["1", "a"]), row(["", "b"]), row(["", ""])];
        assert_eq!(trim_trailing_empty_rows(rows.clone(), "id").len(), 2);
        assert_eq!(trim_trailing_empty_rows(rows.clone(), "v").len(), 3);
        assert_eq!(trim_trailing_empty_rows(rows.clone(), "missing").len(), 4);
        assert_eq!(trim_trailing_empty_rows(rows, "").len(), 4);
    }

    #[test]
    fn details_join_outcomes() {
        let outcome = SourceOutcome {
            tables: vec![
                ("Orders".into(), TableOutcome::Written { mode: SyncMode::Append, count: 3 }),
                ("Items".into(), TableOutcome::Skipped(SkipReason::EmptySource)),
            ],
        };
        assert_eq!(outcome.details(), "Orders: append(3); Items: Skipped(0)");
        assert_eq!(outcome.total_rows(), 3);
    }
}
