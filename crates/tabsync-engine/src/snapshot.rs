//! Target state snapshot: the destination document as seen at run start.
//!
//! Taken once per run and never re-fetched. The executor mutates it in place
//! as it queues writes, so later sources in the same run see the rows and
//! tables earlier sources produced.

use std::collections::{HashMap, HashSet};

use tabsync_core::remote::{Grid, WorkbookMetadata};
use tabsync_core::table::{GridSize, full_columns_range};

use crate::context::SyncContext;

/// Structured table attachment of a destination sheet.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum TableState {
    /// The sheet has no structured table.
    #[default]
    None,
    /// An `AddTable` request was queued in this run; the ID is not known yet.
    Pending,
    /// Attached table ID.
    Attached(String),
}

impl TableState {
    /// Returns the attached table ID, if any.
    #[must_use]
    pub fn table_id(&self) -> Option<&str> {
        match self {
            Self::Attached(id) => Some(id),
            Self::None | Self::Pending => None,
        }
    }

    /// Returns true if no table exists or is being created.
    #[must_use]
    pub const fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }
}

/// One destination sheet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SheetInfo {
    /// Numeric sheet ID.
    pub sheet_id: i64,
    /// First structured table on the sheet.
    pub table: TableState,
    /// Grid capacity.
    pub grid: GridSize,
}

/// A keyed destination row that lacked one of its table's columns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingKey {
    /// 1-based data row.
    pub row: usize,
    /// Missing column name.
    pub column: String,
}

/// Destination sheets and their table rows (header first, positional).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TargetState {
    /// Sheets by title.
    pub sheets: HashMap<String, SheetInfo>,
    /// Table rows by sheet title.
    pub values: HashMap<String, Grid>,
    /// Tables whose structured read returned incomplete keyed rows.
    pub incomplete: HashMap<String, MissingKey>,
    /// Existing sheets whose rows could not be read.
    pub unreadable: HashSet<String>,
}

impl TargetState {
    /// Builds the sheet map from workbook metadata, without values.
    #[must_use]
    pub fn from_metadata(metadata: &WorkbookMetadata) -> Self {
        let sheets = metadata
            .sheets
            .iter()
            .map(|sheet| {
                let table = sheet
                    .tables
                    .first()
                    .map_or(TableState::None, |t| TableState::Attached(t.table_id.clone()));
                let info = SheetInfo {
                    sheet_id: sheet.sheet_id,
                    table,
                    grid: sheet.grid,
                };
                (sheet.title.clone(), info)
            })
            .collect();
        Self {
            sheets,
            ..Self::default()
        }
    }

    /// Returns the rows of a sheet, empty if unknown.
    #[must_use]
    pub fn rows(&self, sheet: &str) -> &[Vec<tabsync_core::table::Cell>] {
        self.values.get(sheet).map(Vec::as_slice).unwrap_or_default()
    }

    /// Registers a newly created sheet with no rows.
    pub fn register_sheet(&mut self, title: impl Into<String>, sheet_id: i64, grid: GridSize) {
        let title = title.into();
        self.sheets.insert(
            title.clone(),
            SheetInfo {
                sheet_id,
                table: TableState::None,
                grid,
            },
        );
        self.values.insert(title, Vec::new());
    }

    /// Records the ID of a table created on `sheet_id`. Returns false if no
    /// known sheet has that ID.
    pub fn attach_table(&mut self, sheet_id: i64, table_id: impl Into<String>) -> bool {
        match self.sheets.values_mut().find(|info| info.sheet_id == sheet_id) {
            Some(info) => {
                info.table = TableState::Attached(table_id.into());
                true
            }
            None => false,
        }
    }

    /// Sum of data rows (header excluded) across all tables.
    #[must_use]
    pub fn data_row_count(&self) -> usize {
        self.values.values().map(|rows| rows.len().saturating_sub(1)).sum()
    }
}

/// Takes the run snapshot from the run's `metadata`.
///
/// Each configured table is read through its structured table; when that
/// misses, the whole sheet is read as a raw range sized to its column
/// capacity. A failed raw read marks the table unreadable, and the executor
/// refuses to write to it for the rest of the run.
#[tracing::instrument(skip(ctx, metadata), fields(doc_id = %ctx.doc_id))]
pub async fn snapshot(ctx: &SyncContext, metadata: &WorkbookMetadata) -> TargetState {
    let mut state = TargetState::from_metadata(metadata);

    for range in &ctx.settings.data_ranges {
        let sheet = range.sheet_name();
        let Some(info) = state.sheets.get(sheet) else {
            continue;
        };
        let column_count = info.grid.column_count;

        let structured = match metadata.find_table(&range.source_name) {
            Some((table_sheet, table)) => ctx
                .client
                .read_table_at(&ctx.doc_id, &table_sheet.title, table)
                .await
                .map(Some),
            None => Ok(None),
        };
        match structured {
            Ok(Some(table)) => {
                if let Some((row, column)) = table.first_missing_key() {
                    tracing::warn!(table = %range.source_name, row, column = %column, "keyed row lacks a column");
                    state
                        .incomplete
                        .insert(sheet.to_string(), MissingKey { row, column });
                }
                state.values.insert(sheet.to_string(), table.into_grid());
                continue;
            }
            Ok(None) => {}
            Err(err) => {
                tracing::warn!(table = %range.source_name, error = %err, "structured read failed, falling back to range read");
            }
        }

        let a1 = full_columns_range(sheet, column_count);
        match ctx.client.read_range(&ctx.doc_id, &a1).await {
            Ok(rows) => {
                state.values.insert(sheet.to_string(), rows);
            }
            Err(err) => {
                tracing::warn!(sheet, range = %a1, error = %err, "range read failed, table marked unreadable");
                state.unreadable.insert(sheet.to_string());
            }
        }
    }

    tracing::debug!(
        sheets = state.sheets.len(),
        rows = state.data_row_count(),
        "target state captured"
    );
    state
}

#[cfg(test)]
mod tests {
    use super::*;
    use tabsync_core::remote::{SheetMetadata, TableMetadata};
    use tabsync_core::table::GridRange;

    fn metadata() -> WorkbookMetadata {
        WorkbookMetadata {
            sheets: vec![
                SheetMetadata {
                    sheet_id: 7,
                    title: "Orders".into(),
                    grid: GridSize::default(),
                    tables: vec![TableMetadata {
                        table_id: "t1".into(),
                        name: "Orders".into(),
                        range: GridRange::default(),
                    }],
                },
                SheetMetadata {
                    sheet_id: 8,
                    title: "Items".into(),
                    grid: GridSize {
                        row_count: 10,
                        column_count: 3,
                    },
                    tables: Vec::new(),
                },
            ],
        }
    }

    #[test]
    fn first_table_is_attached() {
        let state = TargetState::from_metadata(&metadata());
        assert_eq!(state.sheets["Orders"].table, TableState::Attached("t1".into()));
        assert!(state.sheets["Items"].table.is_none());
        assert!(state.rows("Orders").is_empty());
    }

    #[test]
    fn add_table_replies_attach_by_sheet_id() {
        let mut state = TargetState::from_metadata(&metadata());
        assert!(state.attach_table(8, "t2"));
        assert_eq!(state.sheets["Items"].table.table_id(), Some("t2"));
        assert!(!state.attach_table(99, "t3"));
    }

    #[test]
    fn registered_sheets_start_empty() {
        let mut state = TargetState::default();
        state.register_sheet("New", 42, GridSize::default());
        assert_eq!(state.sheets["New"].sheet_id, 42);
        assert_eq!(state.values["New"].len(), 0);
    }
}
