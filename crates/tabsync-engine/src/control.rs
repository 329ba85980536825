//! The control table: one row per tracked source.
//!
//! Row 1 holds the column names configured in
//! [`ControlHeaders`](crate::config::ControlHeaders). Each data row carries a
//! source reference (a document URL or bare ID), the recorded modification
//! time and the time of the last sync attempt.

use chrono_tz::Tz;

use tabsync_core::remote::{Grid, SheetsClient, WorkbookMetadata};
use tabsync_core::table::Cell;
use tabsync_core::timestamp::StampValue;

use crate::config::ControlHeaders;
use crate::error::{Error, Result};

/// One control table row.
#[derive(Debug, Clone, PartialEq)]
pub struct ControlEntry {
    /// 1-based sheet row.
    pub row_index: usize,
    /// Source locator as entered (URL or ID), trimmed.
    pub source_ref: String,
    /// Recorded modification time.
    pub last_modified: StampValue,
    /// Time of the last sync attempt.
    pub last_update: StampValue,
    /// The modification cell exactly as read, written back when retained.
    pub raw_last_modified: Cell,
}

impl ControlEntry {
    /// Returns the source document ID.
    #[must_use]
    pub fn source_id(&self) -> String {
        extract_source_id(&self.source_ref)
    }

    /// Returns true if the row names a source.
    #[must_use]
    pub fn has_source(&self) -> bool {
        !self.source_ref.is_empty()
    }
}

/// Zero-based positions of the control columns within a row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlColumns {
    /// Source reference column.
    pub id: usize,
    /// Last-modified column.
    pub last_modified: usize,
    /// Last-update column, if present.
    pub last_update: Option<usize>,
}

/// A parsed control table.
#[derive(Debug, Clone, PartialEq)]
pub struct ControlTable {
    /// Column positions.
    pub columns: ControlColumns,
    /// Zero-based sheet column the table starts at.
    pub first_column: usize,
    /// Data rows in sheet order.
    pub entries: Vec<ControlEntry>,
}

impl ControlTable {
    /// Parses a grid whose first row is the header, located at 1-based sheet
    /// row `header_row`.
    ///
    /// Returns `None` for an empty grid.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ControlTable`] if the id or last-modified column is missing.
    pub fn parse(grid: Grid, header_row: usize, headers: &ControlHeaders, tz: Tz) -> Result<Option<Self>> {
        let mut rows = grid.into_iter();
        let Some(header) = rows.next() else {
            return Ok(None);
        };
        let names: Vec<String> = header.iter().map(Cell::trimmed).collect();
        let position = |name: &str| names.iter().position(|n| n == name);

        let (Some(id), Some(last_modified)) = (position(&headers.id), position(&headers.last_mod))
        else {
            return Err(Error::control_table(format!(
                "headers not found: {} or {}",
                headers.id, headers.last_mod
            )));
        };
        let columns = ControlColumns {
            id,
            last_modified,
            last_update: position(&headers.last_upd),
        };

        let entries = rows
            .enumerate()
            .map(|(i, cells)| {
                let cell = |index: usize| cells.get(index).cloned().unwrap_or_default();
                let raw_last_modified = cell(columns.last_modified);
                ControlEntry {
                    row_index: header_row + 1 + i,
                    source_ref: cell(columns.id).trimmed(),
                    last_modified: StampValue::parse(&raw_last_modified.to_string(), tz),
                    last_update: columns
                        .last_update
                        .map_or(StampValue::Empty, |c| StampValue::parse(&cell(c).to_string(), tz)),
                    raw_last_modified,
                }
            })
            .collect();

        Ok(Some(Self {
            columns,
            first_column: 0,
            entries,
        }))
    }

    /// Returns the 1-based sheet column of the last-update column, required
    /// to stamp sync results.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ControlTable`] if the column is missing.
    pub fn require_update_column(&self, headers: &ControlHeaders) -> Result<usize> {
        self.columns
            .last_update
            .map(|c| self.first_column + c + 1)
            .ok_or_else(|| {
                Error::control_table(format!(
                    "header consistency failed: expected columns {}, {}, {}",
                    headers.id, headers.last_mod, headers.last_upd
                ))
            })
    }

    /// Returns true if there are no data rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Reads the control table through its structured table, located in
/// `metadata`.
///
/// Returns `None` when the table does not exist or has no data rows.
///
/// # Errors
///
/// Returns an error if the read fails or the id/last-modified columns are missing.
pub async fn read_control_table(
    client: &dyn SheetsClient,
    doc_id: &str,
    metadata: &WorkbookMetadata,
    table_name: &str,
    headers: &ControlHeaders,
    tz: Tz,
) -> Result<Option<ControlTable>> {
    let Some((sheet, meta)) = metadata.find_table(table_name) else {
        tracing::warn!(table = table_name, "control table not found");
        return Ok(None);
    };
    let table = client.read_table_at(doc_id, &sheet.title, meta).await?;
    let header_row = table.header_row_index + 1;
    let first_column = table.start_column_index;
    let parsed = ControlTable::parse(table.into_grid(), header_row, headers, tz)?;
    Ok(parsed
        .filter(|t| !t.is_empty())
        .map(|t| ControlTable { first_column, ..t }))
}

/// Extracts a document ID from a reference.
///
/// URLs of the form `.../d/<id>/...` yield `<id>`; anything else is returned trimmed.
#[must_use]
pub fn extract_source_id(reference: &str) -> String {
    let reference = reference.trim();
    if let Some((_, rest)) = reference.split_once("/d/") {
        let id: String = rest
            .chars()
            .take_while(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
            .collect();
        if !id.is_empty() {
            return id;
        }
    }
    reference.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tabsync_core::table::row;

    fn grid(rows: &[&[&str]]) -> Grid {
        rows.iter().map(|r| row(r.iter().copied())).collect()
    }

    #[test]
    fn extracts_ids_from_urls() {
        assert_eq!(
            extract_source_id("https://docs.google.com/spreadsheets/d/1AbC-d_9/edit#gid=0"),
            "1AbC-d_9"
        );
        assert_eq!(extract_source_id("  1AbC  "), "1AbC");
        assert_eq!(extract_source_id("https://example.com/d/"), "https://example.com/d/");
    }

    #[test]
    fn parses_rows_with_indices() {
        let g = grid(&[
            &["sheet_id", "last_modified_datetime", "last_update_datetime"],
            &["X", "2024-01-01 10:00:00", "2024-01-01 09:00:00"],
            &["", "", ""],
            &["Y", "Error"],
        ]);
        let table = ControlTable::parse(g, 1, &ControlHeaders::default(), Tz::UTC)
            .expect("parse")
            .expect("non-empty");
        assert_eq!(table.entries.len(), 3);
        assert_eq!(table.entries[0].row_index, 2);
        assert_eq!(table.entries[2].row_index, 4);
        assert!(table.entries[0].last_modified.at().is_some());
        assert!(!table.entries[1].has_source());
        assert!(table.entries[2].last_modified.is_error());
        assert_eq!(table.entries[2].last_update, StampValue::Empty);
        assert_eq!(table.columns.last_update, Some(2));
    }

    #[test]
    fn missing_headers_are_errors() {
        let g = grid(&[&["url", "last_modified_datetime"]]);
        let err = ControlTable::parse(g, 1, &ControlHeaders::default(), Tz::UTC).unwrap_err();
        assert!(matches!(err, Error::ControlTable { .. }));
    }

    #[test]
    fn update_column_is_required_for_stamping() {
        let g = grid(&[&["sheet_id", "last_modified_datetime"], &["X", ""]]);
        let headers = ControlHeaders::default();
        let table = ControlTable::parse(g, 1, &headers, Tz::UTC)
            .expect("parse")
            .expect("non-empty");
        assert!(table.require_update_column(&headers).is_err());
    }

    #[test]
    fn update_column_is_offset_by_table_position() {
        let g = grid(&[
            &["sheet_id", "last_modified_datetime", "last_update_datetime"],
            &["X", "", ""],
        ]);
        let headers = ControlHeaders::default();
        let mut table = ControlTable::parse(g, 1, &headers, Tz::UTC)
            .expect("parse")
            .expect("non-empty");
        assert_eq!(table.require_update_column(&headers).expect("column"), 3);
        table.first_column = 2;
        assert_eq!(table.require_update_column(&headers).expect("column"), 5);
    }

    #[test]
    fn empty_grid_is_none() {
        let parsed = ControlTable::parse(Vec::new(), 1, &ControlHeaders::default(), Tz::UTC)
            .expect("parse");
        assert!(parsed.is_none());
    }
}
