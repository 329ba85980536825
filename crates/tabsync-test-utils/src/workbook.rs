//! In-memory workbooks with operation tracing.
//!
//! [`MemoryWorkbook`] implements [`SheetsClient`] over any number of
//! documents. Reads follow the REST API's shape (trailing blank cells and rows
//! are dropped), batched writes are applied atomically and rejected when they
//! exceed a sheet's grid, and every call is recorded for assertions.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use tabsync_core::error::{Error, ErrorClass, Result};
use tabsync_core::remote::{
    Grid, ModifiedTimeProbe, SheetMetadata, SheetsClient, TableMetadata, WorkbookMetadata,
    WriteReply, WriteRequest,
};
use tabsync_core::table::{Cell, GridRange, GridSize, Row, TableData};

/// Kind of a client call, for failure injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpKind {
    /// `get_metadata`.
    GetMetadata,
    /// `read_range`.
    ReadRange,
    /// `read_table`.
    ReadTable,
    /// `batch_read`.
    BatchRead,
    /// `batch_write`.
    BatchWrite,
    /// `write_range`.
    WriteRange,
}

/// Record of a client call.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkbookOp {
    /// Metadata fetch.
    GetMetadata {
        /// Document.
        doc_id: String,
    },
    /// Raw range read.
    ReadRange {
        /// Document.
        doc_id: String,
        /// A1 range.
        range: String,
    },
    /// Structured table read.
    ReadTable {
        /// Document.
        doc_id: String,
        /// Table name.
        table: String,
    },
    /// Batched range read.
    BatchRead {
        /// Document.
        doc_id: String,
        /// A1 ranges.
        ranges: Vec<String>,
    },
    /// Batched write.
    BatchWrite {
        /// Document.
        doc_id: String,
        /// Requests sent.
        requests: Vec<WriteRequest>,
    },
    /// Values write.
    WriteRange {
        /// Document.
        doc_id: String,
        /// A1 range.
        range: String,
        /// Rows written.
        rows: Grid,
    },
}

impl WorkbookOp {
    /// Returns the call kind.
    pub fn kind(&self) -> OpKind {
        match self {
            Self::GetMetadata { .. } => OpKind::GetMetadata,
            Self::ReadRange { .. } => OpKind::ReadRange,
            Self::ReadTable { .. } => OpKind::ReadTable,
            Self::BatchRead { .. } => OpKind::BatchRead,
            Self::BatchWrite { .. } => OpKind::BatchWrite,
            Self::WriteRange { .. } => OpKind::WriteRange,
        }
    }

    /// Returns the document the call targeted.
    pub fn doc_id(&self) -> &str {
        match self {
            Self::GetMetadata { doc_id }
            | Self::ReadRange { doc_id, .. }
            | Self::ReadTable { doc_id, .. }
            | Self::BatchRead { doc_id, .. }
            | Self::BatchWrite { doc_id, .. }
            | Self::WriteRange { doc_id, .. } => doc_id,
        }
    }
}

#[derive(Debug, Clone)]
struct MemoryTable {
    table_id: String,
    name: String,
    range: GridRange,
}

#[derive(Debug, Clone)]
struct MemorySheet {
    sheet_id: i64,
    title: String,
    grid: GridSize,
    frozen_rows: usize,
    cells: Grid,
    table: Option<MemoryTable>,
}

impl MemorySheet {
    fn set(&mut self, row: usize, column: usize, cell: Cell) {
        if self.cells.len() <= row {
            self.cells.resize_with(row + 1, Vec::new);
        }
        let cells = &mut self.cells[row];
        if cells.len() <= column {
            cells.resize(column + 1, Cell::Empty);
        }
        cells[column] = cell;
    }

    /// Reads a zero-based, end-exclusive rectangle the way the REST API does.
    fn read(&self, rows: (usize, Option<usize>), columns: (usize, Option<usize>)) -> Grid {
        let row_end = rows.1.unwrap_or(self.cells.len()).min(self.cells.len());
        let mut out: Grid = (rows.0..row_end)
            .map(|r| {
                let source = &self.cells[r];
                let column_end = columns.1.unwrap_or(source.len()).min(source.len());
                let mut cells: Vec<Cell> = source
                    .get(columns.0..column_end)
                    .map(<[Cell]>::to_vec)
                    .unwrap_or_default();
                while cells.last().is_some_and(Cell::is_blank) {
                    cells.pop();
                }
                cells
            })
            .collect();
        while out.last().is_some_and(Vec::is_empty) {
            out.pop();
        }
        out
    }
}

#[derive(Debug, Clone, Default)]
struct Document {
    sheets: Vec<MemorySheet>,
}

impl Document {
    fn sheet(&self, title: &str) -> Option<&MemorySheet> {
        self.sheets.iter().find(|s| s.title == title)
    }

    fn sheet_mut(&mut self, title: &str) -> Option<&mut MemorySheet> {
        self.sheets.iter_mut().find(|s| s.title == title)
    }

    fn sheet_by_id(&mut self, sheet_id: i64) -> Result<&mut MemorySheet> {
        self.sheets
            .iter_mut()
            .find(|s| s.sheet_id == sheet_id)
            .ok_or_else(|| Error::permanent(format!("no sheet with id {sheet_id}")))
    }
}

#[derive(Debug)]
struct Injected {
    kind: OpKind,
    doc_id: Option<String>,
    class: ErrorClass,
    remaining: Option<usize>,
}

#[derive(Debug, Default)]
struct State {
    docs: HashMap<String, Document>,
    table_overrides: HashMap<(String, String), TableData>,
    next_sheet_id: i64,
    next_table_id: u64,
    operations: Vec<WorkbookOp>,
    failures: Vec<Injected>,
}

/// In-memory documents implementing [`SheetsClient`].
///
/// Cheap to clone; clones share state.
#[derive(Debug, Clone, Default)]
pub struct MemoryWorkbook {
    state: Arc<Mutex<State>>,
}

impl MemoryWorkbook {
    /// Creates an empty set of documents.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().expect("lock")
    }

    /// Adds a sheet with the default 1000 x 26 grid, creating the document if
    /// needed. Returns the sheet ID.
    pub fn add_sheet(&self, doc_id: &str, title: &str) -> i64 {
        self.add_sheet_with_grid(doc_id, title, GridSize::default())
    }

    /// Adds a sheet with an explicit grid. Returns the sheet ID.
    pub fn add_sheet_with_grid(&self, doc_id: &str, title: &str, grid: GridSize) -> i64 {
        let mut state = self.lock();
        state.next_sheet_id += 1;
        let sheet_id = state.next_sheet_id;
        state
            .docs
            .entry(doc_id.to_string())
            .or_default()
            .sheets
            .push(MemorySheet {
                sheet_id,
                title: title.to_string(),
                grid,
                frozen_rows: 0,
                cells: Vec::new(),
                table: None,
            });
        sheet_id
    }

    /// Replaces a sheet's contents with `rows` from A1, adding the sheet if needed.
    pub fn set_values(&self, doc_id: &str, title: &str, rows: Grid) {
        if !self.has_sheet(doc_id, title) {
            self.add_sheet(doc_id, title);
        }
        let mut state = self.lock();
        let sheet = state
            .docs
            .get_mut(doc_id)
            .and_then(|d| d.sheet_mut(title))
            .expect("sheet exists");
        sheet.cells = rows;
    }

    /// Attaches a structured table covering the sheet's current rows and
    /// header width. Returns the table ID.
    pub fn add_table(&self, doc_id: &str, title: &str, name: &str) -> String {
        self.add_table_at(doc_id, title, name, 0)
    }

    /// Like [`Self::add_table`], with the table's first column at zero-based
    /// sheet column `start_column_index`.
    pub fn add_table_at(
        &self,
        doc_id: &str,
        title: &str,
        name: &str,
        start_column_index: usize,
    ) -> String {
        let mut state = self.lock();
        state.next_table_id += 1;
        let table_id = format!("table-{}", state.next_table_id);
        let sheet = state
            .docs
            .get_mut(doc_id)
            .and_then(|d| d.sheet_mut(title))
            .expect("sheet exists");
        let width = sheet.cells.first().map_or(1, Vec::len);
        sheet.table = Some(MemoryTable {
            table_id: table_id.clone(),
            name: name.to_string(),
            range: GridRange {
                sheet_id: sheet.sheet_id,
                start_row_index: 0,
                end_row_index: sheet.cells.len().max(1),
                start_column_index,
                end_column_index: width.max(start_column_index + 1),
            },
        });
        table_id
    }

    /// Serves `data` for structured reads of `table` instead of the sheet contents.
    pub fn override_table(&self, doc_id: &str, table: &str, data: TableData) {
        self.lock()
            .table_overrides
            .insert((doc_id.to_string(), table.to_string()), data);
    }

    /// Returns true if the sheet exists.
    #[must_use]
    pub fn has_sheet(&self, doc_id: &str, title: &str) -> bool {
        self.lock()
            .docs
            .get(doc_id)
            .is_some_and(|d| d.sheet(title).is_some())
    }

    /// Returns a sheet's contents, trimmed like a REST read.
    #[must_use]
    pub fn values(&self, doc_id: &str, title: &str) -> Grid {
        self.lock()
            .docs
            .get(doc_id)
            .and_then(|d| d.sheet(title))
            .map(|s| s.read((0, None), (0, None)))
            .unwrap_or_default()
    }

    /// Returns a sheet's grid capacity.
    #[must_use]
    pub fn grid(&self, doc_id: &str, title: &str) -> Option<GridSize> {
        self.lock()
            .docs
            .get(doc_id)
            .and_then(|d| d.sheet(title))
            .map(|s| s.grid)
    }

    /// Returns the frozen row count of a sheet.
    #[must_use]
    pub fn frozen_rows(&self, doc_id: &str, title: &str) -> Option<usize> {
        self.lock()
            .docs
            .get(doc_id)
            .and_then(|d| d.sheet(title))
            .map(|s| s.frozen_rows)
    }

    /// Returns `(table_id, range)` of the table attached to a sheet.
    #[must_use]
    pub fn table(&self, doc_id: &str, title: &str) -> Option<(String, GridRange)> {
        self.lock()
            .docs
            .get(doc_id)
            .and_then(|d| d.sheet(title))
            .and_then(|s| s.table.as_ref())
            .map(|t| (t.table_id.clone(), t.range))
    }

    /// Sets the end row of a sheet's table.
    pub fn resize_table(&self, doc_id: &str, title: &str, end_row_index: usize) {
        let mut state = self.lock();
        if let Some(table) = state
            .docs
            .get_mut(doc_id)
            .and_then(|d| d.sheet_mut(title))
            .and_then(|s| s.table.as_mut())
        {
            table.range.end_row_index = end_row_index;
        }
    }

    /// Returns all recorded operations.
    #[must_use]
    pub fn operations(&self) -> Vec<WorkbookOp> {
        self.lock().operations.clone()
    }

    /// Returns recorded operations of one kind.
    #[must_use]
    pub fn operations_of(&self, kind: OpKind) -> Vec<WorkbookOp> {
        self.lock()
            .operations
            .iter()
            .filter(|op| op.kind() == kind)
            .cloned()
            .collect()
    }

    /// Clears recorded operations.
    pub fn clear_operations(&self) {
        self.lock().operations.clear();
    }

    /// Fails every `kind` call (for `doc_id`, or any document) with `class`.
    pub fn inject_failure(&self, kind: OpKind, doc_id: Option<&str>, class: ErrorClass) {
        self.push_failure(kind, doc_id, class, None);
    }

    /// Fails the next `times` matching calls with `class`.
    pub fn inject_failures(&self, kind: OpKind, doc_id: Option<&str>, class: ErrorClass, times: usize) {
        self.push_failure(kind, doc_id, class, Some(times));
    }

    /// Clears all injected failures.
    pub fn clear_failures(&self) {
        self.lock().failures.clear();
    }

    fn push_failure(&self, kind: OpKind, doc_id: Option<&str>, class: ErrorClass, remaining: Option<usize>) {
        self.lock().failures.push(Injected {
            kind,
            doc_id: doc_id.map(str::to_string),
            class,
            remaining,
        });
    }

    /// Records `op` and returns an injected failure if one matches.
    fn enter(&self, op: WorkbookOp) -> Result<std::sync::MutexGuard<'_, State>> {
        let mut state = self.lock();
        let kind = op.kind();
        let failure = state.failures.iter_mut().find(|f| {
            f.kind == kind
                && f.doc_id.as_deref().is_none_or(|d| d == op.doc_id())
                && f.remaining != Some(0)
        });
        let injected = failure.map(|f| {
            if let Some(n) = f.remaining.as_mut() {
                *n -= 1;
            }
            f.class
        });
        let message = format!("injected failure for {kind:?} on {}", op.doc_id());
        state.operations.push(op);
        match injected {
            Some(ErrorClass::Transient) => Err(Error::transient(message)),
            Some(ErrorClass::Permanent) => Err(Error::permanent(message)),
            None => Ok(state),
        }
    }
}

/// A parsed A1 reference: sheet plus zero-based, end-exclusive bounds.
#[derive(Debug, Clone, PartialEq, Eq)]
struct A1 {
    sheet: String,
    rows: (usize, Option<usize>),
    columns: (usize, Option<usize>),
}

fn parse_sheet(raw: &str) -> String {
    let raw = raw.trim();
    match raw.strip_prefix('\'').and_then(|r| r.strip_suffix('\'')) {
        Some(inner) => inner.replace("''", "'"),
        None => raw.to_string(),
    }
}

/// Splits `C12` into a zero-based column and optional zero-based row.
fn parse_corner(raw: &str) -> Result<(Option<usize>, Option<usize>)> {
    let letters: String = raw.chars().take_while(char::is_ascii_alphabetic).collect();
    let digits = &raw[letters.len()..];
    let column = (!letters.is_empty()).then(|| {
        letters
            .to_ascii_uppercase()
            .bytes()
            .fold(0usize, |acc, b| acc * 26 + usize::from(b - b'A' + 1))
            - 1
    });
    let row = if digits.is_empty() {
        None
    } else {
        let n: usize = digits
            .parse()
            .map_err(|_| Error::InvalidInput(format!("bad A1 reference: {raw}")))?;
        Some(n.saturating_sub(1))
    };
    Ok((column, row))
}

fn parse_a1(range: &str) -> Result<A1> {
    let Some((sheet, cells)) = range.rsplit_once('!') else {
        return Ok(A1 {
            sheet: parse_sheet(range),
            rows: (0, None),
            columns: (0, None),
        });
    };
    let (start, end) = cells.split_once(':').unwrap_or((cells, cells));
    let (start_column, start_row) = parse_corner(start)?;
    let (end_column, end_row) = parse_corner(end)?;
    Ok(A1 {
        sheet: parse_sheet(sheet),
        rows: (start_row.unwrap_or(0), end_row.map(|r| r + 1)),
        columns: (start_column.unwrap_or(0), end_column.map(|c| c + 1)),
    })
}

fn read_in(state: &State, doc_id: &str, range: &str) -> Result<Grid> {
    let a1 = parse_a1(range)?;
    let sheet = state
        .docs
        .get(doc_id)
        .and_then(|d| d.sheet(&a1.sheet))
        .ok_or_else(|| Error::permanent(format!("unable to parse range: {range}")))?;
    Ok(sheet.read(a1.rows, a1.columns))
}

fn apply(doc: &mut Document, state_ids: &mut (i64, u64), request: &WriteRequest) -> Result<WriteReply> {
    match request {
        WriteRequest::AddSheet {
            title,
            frozen_row_count,
        } => {
            if doc.sheet(title).is_some() {
                return Err(Error::permanent(format!("sheet '{title}' already exists")));
            }
            state_ids.0 += 1;
            let grid = GridSize::default();
            doc.sheets.push(MemorySheet {
                sheet_id: state_ids.0,
                title: title.clone(),
                grid,
                frozen_rows: *frozen_row_count,
                cells: Vec::new(),
                table: None,
            });
            Ok(WriteReply::AddSheet {
                sheet_id: state_ids.0,
                title: title.clone(),
                grid,
            })
        }
        WriteRequest::UpdateSheetProperties {
            sheet_id,
            row_count,
            column_count,
        } => {
            let sheet = doc.sheet_by_id(*sheet_id)?;
            if let Some(rows) = row_count {
                sheet.grid.row_count = *rows;
            }
            if let Some(columns) = column_count {
                sheet.grid.column_count = *columns;
            }
            Ok(WriteReply::Empty)
        }
        WriteRequest::AddTable { name, range, .. } => {
            let sheet = doc.sheet_by_id(range.sheet_id)?;
            if sheet.table.is_some() {
                return Err(Error::permanent(format!("sheet '{}' already has a table", sheet.title)));
            }
            if range.end_column_index > sheet.grid.column_count {
                return Err(Error::permanent("table range exceeds grid limits"));
            }
            state_ids.1 += 1;
            let table_id = format!("table-{}", state_ids.1);
            sheet.table = Some(MemoryTable {
                table_id: table_id.clone(),
                name: name.clone(),
                range: *range,
            });
            Ok(WriteReply::AddTable {
                table_id,
                sheet_id: range.sheet_id,
            })
        }
        WriteRequest::UpdateTable { table_id, range } => {
            let table = doc
                .sheets
                .iter_mut()
                .filter_map(|s| s.table.as_mut())
                .find(|t| &t.table_id == table_id)
                .ok_or_else(|| Error::permanent(format!("no table with id {table_id}")))?;
            table.range = *range;
            Ok(WriteReply::Empty)
        }
        WriteRequest::ClearValues { sheet_id } => {
            doc.sheet_by_id(*sheet_id)?.cells.clear();
            Ok(WriteReply::Empty)
        }
        WriteRequest::UpdateCells {
            sheet_id,
            start_row_index,
            start_column_index,
            rows,
        } => {
            let sheet = doc.sheet_by_id(*sheet_id)?;
            let width = rows.iter().map(Vec::len).max().unwrap_or(0);
            if start_row_index + rows.len() > sheet.grid.row_count
                || start_column_index + width > sheet.grid.column_count
            {
                return Err(Error::permanent("range exceeds grid limits"));
            }
            for (r, cells) in rows.iter().enumerate() {
                for (c, cell) in cells.iter().enumerate() {
                    sheet.set(start_row_index + r, start_column_index + c, cell.clone());
                }
            }
            Ok(WriteReply::Empty)
        }
    }
}

#[async_trait]
impl SheetsClient for MemoryWorkbook {
    async fn get_metadata(&self, doc_id: &str) -> Result<WorkbookMetadata> {
        let state = self.enter(WorkbookOp::GetMetadata {
            doc_id: doc_id.to_string(),
        })?;
        let doc = state
            .docs
            .get(doc_id)
            .ok_or_else(|| Error::NotFound(format!("document {doc_id}")))?;
        let sheets = doc
            .sheets
            .iter()
            .map(|s| SheetMetadata {
                sheet_id: s.sheet_id,
                title: s.title.clone(),
                grid: s.grid,
                tables: s
                    .table
                    .iter()
                    .map(|t| TableMetadata {
                        table_id: t.table_id.clone(),
                        name: t.name.clone(),
                        range: t.range,
                    })
                    .collect(),
            })
            .collect();
        Ok(WorkbookMetadata { sheets })
    }

    async fn read_range(&self, doc_id: &str, range: &str) -> Result<Grid> {
        let state = self.enter(WorkbookOp::ReadRange {
            doc_id: doc_id.to_string(),
            range: range.to_string(),
        })?;
        read_in(&state, doc_id, range)
    }

    async fn read_table_at(
        &self,
        doc_id: &str,
        sheet_title: &str,
        table: &TableMetadata,
    ) -> Result<TableData> {
        let state = self.enter(WorkbookOp::ReadTable {
            doc_id: doc_id.to_string(),
            table: table.name.clone(),
        })?;
        if let Some(data) = state
            .table_overrides
            .get(&(doc_id.to_string(), table.name.clone()))
        {
            return Ok(data.clone());
        }
        let Some((sheet, table)) = state.docs.get(doc_id).and_then(|d| {
            d.sheets
                .iter()
                .filter(|s| s.title == sheet_title)
                .find_map(|s| {
                    s.table
                        .as_ref()
                        .filter(|t| t.table_id == table.table_id)
                        .map(|t| (s, t))
                })
        }) else {
            return Err(Error::NotFound(format!("table {} on {sheet_title}", table.name)));
        };

        let r = table.range;
        let columns = (r.start_column_index, Some(r.end_column_index));
        let header = sheet
            .read((r.start_row_index, Some(r.start_row_index + 1)), columns)
            .into_iter()
            .next()
            .unwrap_or_default();
        let names: Vec<String> = header.iter().map(ToString::to_string).collect();
        let rows = sheet
            .read((r.start_row_index + 1, Some(r.end_row_index)), columns)
            .into_iter()
            .map(|cells| {
                let mut cells = cells.into_iter();
                Row::Keyed(
                    names
                        .iter()
                        .map(|n| (n.clone(), cells.next().unwrap_or_default()))
                        .collect::<BTreeMap<_, _>>(),
                )
            })
            .collect();
        Ok(TableData {
            columns: names,
            rows,
            header_row_index: r.start_row_index,
            start_column_index: r.start_column_index,
        })
    }

    async fn batch_read(&self, doc_id: &str, ranges: &[String]) -> Result<Vec<Grid>> {
        let state = self.enter(WorkbookOp::BatchRead {
            doc_id: doc_id.to_string(),
            ranges: ranges.to_vec(),
        })?;
        ranges.iter().map(|r| read_in(&state, doc_id, r)).collect()
    }

    async fn batch_write(&self, doc_id: &str, requests: &[WriteRequest]) -> Result<Vec<WriteReply>> {
        let mut state = self.enter(WorkbookOp::BatchWrite {
            doc_id: doc_id.to_string(),
            requests: requests.to_vec(),
        })?;
        let mut doc = state
            .docs
            .get(doc_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("document {doc_id}")))?;
        let mut ids = (state.next_sheet_id, state.next_table_id);
        let replies = requests
            .iter()
            .map(|request| apply(&mut doc, &mut ids, request))
            .collect::<Result<Vec<_>>>()?;
        state.docs.insert(doc_id.to_string(), doc);
        (state.next_sheet_id, state.next_table_id) = ids;
        Ok(replies)
    }

    async fn write_range(&self, doc_id: &str, range: &str, rows: &[Vec<Cell>]) -> Result<()> {
        let mut state = self.enter(WorkbookOp::WriteRange {
            doc_id: doc_id.to_string(),
            range: range.to_string(),
            rows: rows.to_vec(),
        })?;
        let a1 = parse_a1(range)?;
        let sheet = state
            .docs
            .get_mut(doc_id)
            .and_then(|d| d.sheet_mut(&a1.sheet))
            .ok_or_else(|| Error::permanent(format!("unable to parse range: {range}")))?;
        for (r, cells) in rows.iter().enumerate() {
            for (c, cell) in cells.iter().enumerate() {
                sheet.set(a1.rows.0 + r, a1.columns.0 + c, cell.clone());
            }
        }
        Ok(())
    }
}

/// A [`ModifiedTimeProbe`] answering from a script.
///
/// Unknown sources fail with a permanent error.
#[derive(Debug, Clone, Default)]
pub struct ScriptedProbe {
    answers: Arc<Mutex<HashMap<String, std::result::Result<DateTime<Utc>, ErrorClass>>>>,
    calls: Arc<Mutex<Vec<String>>>,
}

impl ScriptedProbe {
    /// Creates a probe with no answers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Answers `source_id` with `modified`.
    pub fn set(&self, source_id: &str, modified: DateTime<Utc>) {
        self.answers
            .lock()
            .expect("lock")
            .insert(source_id.to_string(), Ok(modified));
    }

    /// Fails probes of `source_id` with `class`.
    pub fn fail(&self, source_id: &str, class: ErrorClass) {
        self.answers
            .lock()
            .expect("lock")
            .insert(source_id.to_string(), Err(class));
    }

    /// Returns probed source IDs in call order.
    #[must_use]
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().expect("lock").clone()
    }
}

#[async_trait]
impl ModifiedTimeProbe for ScriptedProbe {
    async fn modified_time(&self, source_id: &str) -> Result<DateTime<Utc>> {
        self.calls.lock().expect("lock").push(source_id.to_string());
        match self.answers.lock().expect("lock").get(source_id) {
            Some(Ok(at)) => Ok(*at),
            Some(Err(ErrorClass::Transient)) => Err(Error::transient(format!("probe of {source_id} timed out"))),
            Some(Err(ErrorClass::Permanent)) | None => {
                Err(Error::permanent(format!("file not found: {source_id}")))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tabsync_core::table::row;

    #[test]
    fn a1_references() {
        let a1 = parse_a1("'it''s'!B2:C").expect("parse");
        assert_eq!(a1.sheet, "it's");
        assert_eq!(a1.rows, (1, None));
        assert_eq!(a1.columns, (1, Some(3)));

        let whole = parse_a1("'urls'").expect("parse");
        assert_eq!(whole.rows, (0, None));

        let cell = parse_a1("urls!C5").expect("parse");
        assert_eq!(cell.rows, (4, Some(5)));
        assert_eq!(cell.columns, (2, Some(3)));
    }

    #[tokio::test]
    async fn reads_drop_trailing_blanks() {
        let wb = MemoryWorkbook::new();
        wb.set_values("d", "s", vec![row(["a", "", ""]), row(["", ""]), Vec::new()]);
        let grid = wb.read_range("d", "'s'!A:C").await.expect("read");
        assert_eq!(grid, vec![row(["a"])]);
    }

    #[tokio::test]
    async fn batch_writes_are_atomic() {
        let wb = MemoryWorkbook::new();
        let sheet_id = wb.add_sheet_with_grid("d", "s", GridSize { row_count: 2, column_count: 2 });
        let requests = vec![
            WriteRequest::UpdateCells {
                sheet_id,
                start_row_index: 0,
                start_column_index: 0,
                rows: vec![row(["a"])],
            },
            WriteRequest::UpdateCells {
                sheet_id,
                start_row_index: 0,
                start_column_index: 0,
                rows: vec![row(["a"]), row(["b"]), row(["c"])],
            },
        ];
        assert!(wb.batch_write("d", &requests).await.is_err());
        assert!(wb.values("d", "s").is_empty());
    }

    #[tokio::test]
    async fn injected_failures_are_counted() {
        let wb = MemoryWorkbook::new();
        wb.add_sheet("d", "s");
        wb.inject_failures(OpKind::ReadRange, Some("d"), ErrorClass::Transient, 1);
        let err = wb.read_range("d", "s").await.unwrap_err();
        assert!(err.is_transient());
        wb.read_range("d", "s").await.expect("second call succeeds");
        assert_eq!(wb.operations_of(OpKind::ReadRange).len(), 2);
    }

    #[tokio::test]
    async fn structured_reads_are_keyed() {
        let wb = MemoryWorkbook::new();
        wb.set_values("d", "urls", vec![row(["id", "v"]), row(["X"])]);
        wb.add_table("d", "urls", "urls");
        let table = wb.read_table("d", "urls").await.expect("read").expect("table");
        assert_eq!(table.columns, vec!["id", "v"]);
        assert_eq!(
            table.into_grid(),
            vec![row(["id", "v"]), vec![Cell::from("X"), Cell::Empty]]
        );
    }

    #[tokio::test]
    async fn offset_tables_report_their_position() {
        let wb = MemoryWorkbook::new();
        wb.set_values("d", "urls", vec![row(["note", "id"]), row(["n", "X"])]);
        wb.add_table_at("d", "urls", "urls", 1);

        let metadata = wb.get_metadata("d").await.expect("metadata");
        let (sheet, meta) = metadata.find_table("urls").expect("table");
        let table = wb.read_table_at("d", &sheet.title, meta).await.expect("read");

        assert_eq!(table.start_column_index, 1);
        assert_eq!(table.into_grid(), vec![row(["id"]), row(["X"])]);
        assert_eq!(wb.operations_of(OpKind::GetMetadata).len(), 1);
    }
}
