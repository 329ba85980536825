//! Cell, row and grid primitives shared by the client and the engine.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// One cell value as read from or written to a tabular store.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Cell {
    /// Blank cell.
    #[default]
    Empty,
    /// Text value.
    Text(String),
    /// Numeric value.
    Number(f64),
    /// Boolean value.
    Bool(bool),
}

impl Cell {
    /// Returns true for blank cells and empty strings.
    #[must_use]
    pub fn is_blank(&self) -> bool {
        match self {
            Self::Empty => true,
            Self::Text(s) => s.is_empty(),
            Self::Number(_) | Self::Bool(_) => false,
        }
    }

    /// Returns the cell rendered as text, trimmed.
    #[must_use]
    pub fn trimmed(&self) -> String {
        self.to_string().trim().to_string()
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => Ok(()),
            Self::Text(s) => f.write_str(s),
            Self::Number(n) => write!(f, "{n}"),
            Self::Bool(b) => write!(f, "{b}"),
        }
    }
}

/// Empty strings become [`Cell::Empty`], matching what a read returns.
impl From<&str> for Cell {
    fn from(value: &str) -> Self {
        if value.is_empty() {
            Self::Empty
        } else {
            Self::Text(value.to_string())
        }
    }
}

impl From<String> for Cell {
    fn from(value: String) -> Self {
        if value.is_empty() {
            Self::Empty
        } else {
            Self::Text(value)
        }
    }
}

impl From<f64> for Cell {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<bool> for Cell {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl Serialize for Cell {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Empty => serializer.serialize_str(""),
            Self::Text(s) => serializer.serialize_str(s),
            Self::Number(n) => serializer.serialize_f64(*n),
            Self::Bool(b) => serializer.serialize_bool(*b),
        }
    }
}

impl<'de> Deserialize<'de> for Cell {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = serde_json::Value::deserialize(deserializer)?;
        Ok(match value {
            serde_json::Value::Null => Self::Empty,
            serde_json::Value::Bool(b) => Self::Bool(b),
            serde_json::Value::Number(n) => n.as_f64().map_or(Self::Empty, Self::Number),
            serde_json::Value::String(s) if s.is_empty() => Self::Empty,
            serde_json::Value::String(s) => Self::Text(s),
            other => Self::Text(other.to_string()),
        })
    }
}

/// Builds a positional row from anything convertible to cells.
#[must_use]
pub fn row<I, C>(cells: I) -> Vec<Cell>
where
    I: IntoIterator<Item = C>,
    C: Into<Cell>,
{
    cells.into_iter().map(Into::into).collect()
}

/// A row as returned by a read.
///
/// Structured table reads yield keyed rows; raw range reads yield positional
/// rows. The engine resolves both into positional form once, at snapshot time.
#[derive(Debug, Clone, PartialEq)]
pub enum Row {
    /// Column name to value.
    Keyed(BTreeMap<String, Cell>),
    /// Values in column order.
    Positional(Vec<Cell>),
}

impl Row {
    /// Resolves the row into column order. Missing keys become blank cells.
    #[must_use]
    pub fn into_positional(self, columns: &[String]) -> Vec<Cell> {
        match self {
            Self::Positional(cells) => cells,
            Self::Keyed(mut map) => columns
                .iter()
                .map(|c| map.remove(c).unwrap_or_default())
                .collect(),
        }
    }
}

/// Result of a structured (named table) read.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TableData {
    /// Header names in column order.
    pub columns: Vec<String>,
    /// Data rows, header excluded.
    pub rows: Vec<Row>,
    /// Zero-based sheet row holding the header.
    pub header_row_index: usize,
    /// Zero-based sheet column of the table's first column.
    pub start_column_index: usize,
}

impl TableData {
    /// Resolves the table into a header row followed by positional data rows.
    ///
    /// A table without data rows resolves to no rows at all.
    #[must_use]
    pub fn into_grid(self) -> Vec<Vec<Cell>> {
        if self.rows.is_empty() {
            return Vec::new();
        }
        let header = row(self.columns.iter().map(String::as_str));
        let columns = self.columns;
        std::iter::once(header)
            .chain(self.rows.into_iter().map(|r| r.into_positional(&columns)))
            .collect()
    }

    /// Finds the first keyed row lacking one of the table's columns.
    ///
    /// Returns the 1-based data row and the missing column name.
    #[must_use]
    pub fn first_missing_key(&self) -> Option<(usize, String)> {
        self.rows.iter().enumerate().find_map(|(i, r)| match r {
            Row::Keyed(map) => self
                .columns
                .iter()
                .find(|c| !map.contains_key(*c))
                .map(|c| (i + 1, c.clone())),
            Row::Positional(_) => None,
        })
    }
}

/// Grid capacity of a sheet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GridSize {
    /// Number of rows.
    pub row_count: usize,
    /// Number of columns.
    pub column_count: usize,
}

impl Default for GridSize {
    fn default() -> Self {
        Self {
            row_count: 1000,
            column_count: 26,
        }
    }
}

/// A zero-based, end-exclusive rectangle on one sheet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GridRange {
    /// Sheet the range lives on.
    pub sheet_id: i64,
    /// First row.
    pub start_row_index: usize,
    /// Row after the last.
    pub end_row_index: usize,
    /// First column.
    pub start_column_index: usize,
    /// Column after the last.
    pub end_column_index: usize,
}

/// Converts a 1-based column number to its letter form (`1 → A`, `27 → AA`).
#[must_use]
pub fn column_letter(column: usize) -> String {
    let mut n = column;
    let mut letters = Vec::new();
    while n > 0 {
        let rem = (n - 1) % 26;
        letters.push(char::from(b'A' + u8::try_from(rem).unwrap_or(0)));
        n = (n - rem - 1) / 26;
    }
    letters.iter().rev().collect()
}

/// Quotes a sheet name for use in an A1 range.
#[must_use]
pub fn quote_sheet(name: &str) -> String {
    format!("'{}'", name.replace('\'', "''"))
}

/// Builds an A1 reference for whole columns `A:<last>` of a sheet.
#[must_use]
pub fn full_columns_range(sheet: &str, column_count: usize) -> String {
    format!("{}!A:{}", quote_sheet(sheet), column_letter(column_count.max(1)))
}

/// Builds an A1 reference for a single cell (1-based row and column).
#[must_use]
pub fn cell_range(sheet: &str, row: usize, column: usize) -> String {
    format!("{}!{}{row}", quote_sheet(sheet), column_letter(column))
}

/// Builds an A1 reference for one column between two rows (1-based, inclusive).
#[must_use]
pub fn column_span_range(sheet: &str, column: usize, first_row: usize, last_row: usize) -> String {
    let letter = column_letter(column);
    format!("{}!{letter}{first_row}:{letter}{last_row}", quote_sheet(sheet))
}

/// Builds an A1 reference for a rectangle (1-based, inclusive corners).
#[must_use]
pub fn block_range(
    sheet: &str,
    first_row: usize,
    first_column: usize,
    last_row: usize,
    last_column: usize,
) -> String {
    format!(
        "{}!{}{first_row}:{}{last_row}",
        quote_sheet(sheet),
        column_letter(first_column),
        column_letter(last_column)
    )
}
