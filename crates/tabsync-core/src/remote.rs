//! Remote store contracts.
//!
//! [`SheetsClient`] is the only way the engine touches a workbook: one metadata
//! call, range and table reads, a batched read for source documents, and one
//! batched structural+data write per source. [`ModifiedTimeProbe`] answers the
//! source-of-truth question "when was this document last modified".
//!
//! Implementations classify failures as transient or permanent when they build
//! the error (see [`crate::error::ErrorClass`]); wrap them in
//! [`crate::retry::RetryingClient`] to get bounded retries.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Value, json};

use crate::error::Result;
use crate::table::{Cell, GridRange, GridSize, TableData};

/// Rows of cells, header first when the source has one.
pub type Grid = Vec<Vec<Cell>>;

/// A structured table attached to a sheet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableMetadata {
    /// Store-assigned table ID.
    pub table_id: String,
    /// Table name.
    pub name: String,
    /// Rectangle the table covers.
    pub range: GridRange,
}

/// One sheet of a workbook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SheetMetadata {
    /// Store-assigned sheet ID.
    pub sheet_id: i64,
    /// Sheet title.
    pub title: String,
    /// Current grid capacity.
    pub grid: GridSize,
    /// Attached structured tables.
    pub tables: Vec<TableMetadata>,
}

/// Layout of a workbook.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct WorkbookMetadata {
    /// Sheets in display order.
    pub sheets: Vec<SheetMetadata>,
}

impl WorkbookMetadata {
    /// Looks up a sheet by title.
    #[must_use]
    pub fn sheet(&self, title: &str) -> Option<&SheetMetadata> {
        self.sheets.iter().find(|s| s.title == title)
    }

    /// Looks up a structured table by name across all sheets.
    #[must_use]
    pub fn find_table(&self, name: &str) -> Option<(&SheetMetadata, &TableMetadata)> {
        self.sheets
            .iter()
            .find_map(|s| s.tables.iter().find(|t| t.name == name).map(|t| (s, t)))
    }
}

/// A structural or data change in a batched write.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteRequest {
    /// Create a sheet.
    AddSheet {
        /// Sheet title.
        title: String,
        /// Rows to freeze at the top.
        frozen_row_count: usize,
    },
    /// Resize a sheet's grid. `None` leaves a dimension untouched.
    UpdateSheetProperties {
        /// Target sheet.
        sheet_id: i64,
        /// New row count.
        row_count: Option<usize>,
        /// New column count.
        column_count: Option<usize>,
    },
    /// Attach a structured table to a sheet.
    AddTable {
        /// Table name.
        name: String,
        /// Covered rectangle.
        range: GridRange,
        /// Column names, in order. All columns are text typed.
        columns: Vec<String>,
    },
    /// Move an existing table's range.
    UpdateTable {
        /// Target table.
        table_id: String,
        /// New rectangle.
        range: GridRange,
    },
    /// Clear every value on a sheet.
    ClearValues {
        /// Target sheet.
        sheet_id: i64,
    },
    /// Write rows starting at a cell.
    UpdateCells {
        /// Target sheet.
        sheet_id: i64,
        /// Zero-based first row.
        start_row_index: usize,
        /// Zero-based first column.
        start_column_index: usize,
        /// Rows to write.
        rows: Grid,
    },
}

impl WriteRequest {
    /// Short name of the request kind, for logs.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::AddSheet { .. } => "addSheet",
            Self::UpdateSheetProperties { .. } => "updateSheetProperties",
            Self::AddTable { .. } => "addTable",
            Self::UpdateTable { .. } => "updateTable",
            Self::ClearValues { .. } | Self::UpdateCells { .. } => "updateCells",
        }
    }

    /// Renders the request in the Sheets `batchUpdate` wire shape.
    #[must_use]
    pub fn to_api(&self) -> Value {
        match self {
            Self::AddSheet {
                title,
                frozen_row_count,
            } => json!({
                "addSheet": {
                    "properties": {
                        "title": title,
                        "gridProperties": { "frozenRowCount": frozen_row_count }
                    }
                }
            }),
            Self::UpdateSheetProperties {
                sheet_id,
                row_count,
                column_count,
            } => {
                let mut grid = serde_json::Map::new();
                let mut fields = Vec::new();
                if let Some(rows) = row_count {
                    grid.insert("rowCount".into(), json!(rows));
                    fields.push("rowCount");
                }
                if let Some(cols) = column_count {
                    grid.insert("columnCount".into(), json!(cols));
                    fields.push("columnCount");
                }
                json!({
                    "updateSheetProperties": {
                        "properties": { "sheetId": sheet_id, "gridProperties": grid },
                        "fields": format!("gridProperties({})", fields.join(","))
                    }
                })
            }
            Self::AddTable {
                name,
                range,
                columns,
            } => {
                let column_properties: Vec<Value> = columns
                    .iter()
                    .enumerate()
                    .map(|(i, c)| json!({ "columnIndex": i, "columnName": c, "columnType": "TEXT" }))
                    .collect();
                json!({
                    "addTable": {
                        "table": { "name": name, "range": range, "columnProperties": column_properties }
                    }
                })
            }
            Self::UpdateTable { table_id, range } => json!({
                "updateTable": {
                    "table": { "tableId": table_id, "range": range },
                    "fields": "range"
                }
            }),
            Self::ClearValues { sheet_id } => json!({
                "updateCells": { "range": { "sheetId": sheet_id }, "fields": "userEnteredValue" }
            }),
            Self::UpdateCells {
                sheet_id,
                start_row_index,
                start_column_index,
                rows,
            } => {
                let rows: Vec<Value> = rows
                    .iter()
                    .map(|r| json!({ "values": r.iter().map(user_entered_value).collect::<Vec<_>>() }))
                    .collect();
                json!({
                    "updateCells": {
                        "range": {
                            "sheetId": sheet_id,
                            "startRowIndex": start_row_index,
                            "startColumnIndex": start_column_index
                        },
                        "rows": rows,
                        "fields": "userEnteredValue"
                    }
                })
            }
        }
    }
}

fn user_entered_value(cell: &Cell) -> Value {
    let value = match cell {
        Cell::Empty => json!({ "stringValue": "" }),
        Cell::Text(s) => json!({ "stringValue": s }),
        Cell::Number(n) => json!({ "numberValue": n }),
        Cell::Bool(b) => json!({ "boolValue": b }),
    };
    json!({ "userEnteredValue": value })
}

/// Reply to one request of a batched write, in request order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteReply {
    /// A sheet was created.
    AddSheet {
        /// New sheet ID.
        sheet_id: i64,
        /// Sheet title.
        title: String,
        /// Initial grid capacity.
        grid: GridSize,
    },
    /// A table was attached.
    AddTable {
        /// New table ID.
        table_id: String,
        /// Sheet the table lives on.
        sheet_id: i64,
    },
    /// Request kinds without a meaningful reply.
    Empty,
}

/// Operations against a tabular document store.
#[async_trait]
pub trait SheetsClient: Send + Sync {
    /// Fetches sheets, grid sizes and attached tables in one call.
    async fn get_metadata(&self, doc_id: &str) -> Result<WorkbookMetadata>;

    /// Reads an A1 range. Trailing empty rows are not returned.
    async fn read_range(&self, doc_id: &str, range: &str) -> Result<Grid>;

    /// Reads the structured table `table` found on sheet `sheet_title` in
    /// metadata the caller already holds.
    async fn read_table_at(
        &self,
        doc_id: &str,
        sheet_title: &str,
        table: &TableMetadata,
    ) -> Result<TableData>;

    /// Reads a structured table by name. `None` if no such table exists.
    ///
    /// Costs a metadata call; callers holding metadata use [`Self::read_table_at`].
    async fn read_table(&self, doc_id: &str, table_name: &str) -> Result<Option<TableData>> {
        let metadata = self.get_metadata(doc_id).await?;
        let Some((sheet, table)) = metadata.find_table(table_name) else {
            tracing::debug!(table = table_name, "structured table not found");
            return Ok(None);
        };
        self.read_table_at(doc_id, &sheet.title, table).await.map(Some)
    }

    /// Reads several A1 ranges in one call, results in request order.
    async fn batch_read(&self, doc_id: &str, ranges: &[String]) -> Result<Vec<Grid>>;

    /// Applies structural and data requests atomically, replies in request order.
    async fn batch_write(&self, doc_id: &str, requests: &[WriteRequest])
    -> Result<Vec<WriteReply>>;

    /// Overwrites the values of an A1 range.
    async fn write_range(&self, doc_id: &str, range: &str, rows: &[Vec<Cell>]) -> Result<()>;
}

/// Source-of-truth for a document's modification time.
#[async_trait]
pub trait ModifiedTimeProbe: Send + Sync {
    /// Returns when the document was last modified.
    async fn modified_time(&self, source_id: &str) -> Result<DateTime<Utc>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_cells_wire_shape() {
        let req = WriteRequest::UpdateCells {
            sheet_id: 7,
            start_row_index: 3,
            start_column_index: 0,
            rows: vec![vec![Cell::from("X"), Cell::Number(2.0), Cell::Bool(true), Cell::Empty]],
        };
        let api = req.to_api();
        let values = &api["updateCells"]["rows"][0]["values"];
        assert_eq!(values[0]["userEnteredValue"]["stringValue"], "X");
        assert_eq!(values[1]["userEnteredValue"]["numberValue"], 2.0);
        assert_eq!(values[2]["userEnteredValue"]["boolValue"], true);
        assert_eq!(values[3]["userEnteredValue"]["stringValue"], "");
        assert_eq!(api["updateCells"]["range"]["startRowIndex"], 3);
    }

    #[test]
    fn update_sheet_properties_lists_only_set_fields() {
        let req = WriteRequest::UpdateSheetProperties {
            sheet_id: 1,
            row_count: None,
            column_count: Some(4),
        };
        let api = req.to_api();
        assert_eq!(
            api["updateSheetProperties"]["fields"],
            "gridProperties(columnCount)"
        );
        assert!(api["updateSheetProperties"]["properties"]["gridProperties"]["rowCount"].is_null());
    }

    #[test]
    fn add_table_columns_are_text() {
        let req = WriteRequest::AddTable {
            name: "Orders".into(),
            range: GridRange {
                sheet_id: 1,
                start_row_index: 0,
                end_row_index: 2,
                start_column_index: 0,
                end_column_index: 2,
            },
            columns: vec!["Source_ID".into(), "h1".into()],
        };
        let api = req.to_api();
        let props = &api["addTable"]["table"]["columnProperties"];
        assert_eq!(props[1]["columnName"], "h1");
        assert_eq!(props[1]["columnType"], "TEXT");
        assert_eq!(api["addTable"]["table"]["range"]["endColumnIndex"], 2);
    }

    #[test]
    fn metadata_lookups() {
        let meta = WorkbookMetadata {
            sheets: vec![SheetMetadata {
                sheet_id: 3,
                title: "Orders".into(),
                grid: GridSize::default(),
                tables: vec![TableMetadata {
                    table_id: "t1".into(),
                    name: "Orders".into(),
                    range: GridRange {
                        sheet_id: 3,
                        start_row_index: 0,
                        end_row_index: 1,
                        start_column_index: 0,
                        end_column_index: 1,
                    },
                }],
            }],
        };
        assert!(meta.sheet("Orders").is_some());
        assert!(meta.sheet("Other").is_none());
        let (sheet, table) = meta.find_table("Orders").expect("table");
        assert_eq!(sheet.sheet_id, 3);
        assert_eq!(table.table_id, "t1");
    }
}
