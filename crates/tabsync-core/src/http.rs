//! REST clients for the Sheets and Drive APIs.
//!
//! Failures are classified here, once: HTTP 429, 5xx, timeouts and connect
//! failures are transient, everything else is permanent. Wrap the clients in
//! [`RetryingClient`](crate::retry::RetryingClient) for backoff.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::error::{Error, Result};
use crate::remote::{
    Grid, ModifiedTimeProbe, SheetMetadata, SheetsClient, TableMetadata, WorkbookMetadata,
    WriteReply, WriteRequest,
};
use crate::table::{Cell, GridRange, GridSize, Row, TableData, block_range};

/// Sheets API spreadsheet collection.
pub const SHEETS_BASE_URL: &str = "https://sheets.googleapis.com/v4/spreadsheets";
/// Drive API file collection.
pub const DRIVE_BASE_URL: &str = "https://www.googleapis.com/drive/v3/files";

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
const METADATA_FIELDS: &str = "sheets(properties(sheetId,title,gridProperties),tables)";

/// Authenticated transport shared by both clients.
#[derive(Clone)]
struct Transport {
    http: reqwest::Client,
    base_url: Url,
    token: String,
}

impl fmt::Debug for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transport")
            .field("base_url", &self.base_url.as_str())
            .field("token", &"<redacted>")
            .finish_non_exhaustive()
    }
}

impl Transport {
    fn new(base_url: &str, token: String) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| Error::Internal {
                message: format!("failed to build HTTP client: {e}"),
            })?;
        let base_url = Url::parse(base_url)
            .map_err(|e| Error::InvalidInput(format!("invalid API base URL: {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(Error::InvalidInput(format!(
                "API base URL cannot carry a path: {base_url}"
            )));
        }
        Ok(Self {
            http,
            base_url,
            token,
        })
    }

    fn url(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| Error::InvalidInput(format!("invalid API base URL: {}", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn execute(&self, request: reqwest::RequestBuilder, operation: &str) -> Result<Value> {
        let response = request
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| classify_transport(operation, &e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(operation, status, &body));
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| Error::permanent(format!("{operation}: unreadable response body: {e}")))
    }
}

fn classify_status(operation: &str, status: StatusCode, body: &str) -> Error {
    let message = format!("{operation} failed (status={status}): {body}");
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        Error::transient(message)
    } else {
        Error::permanent(message)
    }
}

fn classify_transport(operation: &str, err: &reqwest::Error) -> Error {
    let message = format!("{operation} request failed: {err}");
    if err.is_timeout() || err.is_connect() {
        Error::transient(message)
    } else {
        Error::permanent(message)
    }
}

fn decode<T: for<'de> Deserialize<'de>>(operation: &str, body: Value) -> Result<T> {
    serde_json::from_value(body).map_err(|e| Error::Serialization {
        message: format!("{operation}: unexpected response shape: {e}"),
    })
}

/// Sheets API v4 client with bearer authentication.
#[derive(Debug, Clone)]
pub struct HttpSheetsClient {
    transport: Transport,
}

impl HttpSheetsClient {
    /// Creates a client against the public Sheets endpoint.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(token: impl Into<String>) -> Result<Self> {
        Self::with_base_url(SHEETS_BASE_URL, token)
    }

    /// Creates a client against a custom endpoint (emulators, proxies).
    ///
    /// # Errors
    ///
    /// Returns an error if `base_url` is not a valid base URL.
    pub fn with_base_url(base_url: &str, token: impl Into<String>) -> Result<Self> {
        Ok(Self {
            transport: Transport::new(base_url, token.into())?,
        })
    }

    async fn values_get(&self, doc_id: &str, range: &str) -> Result<Grid> {
        let url = self.transport.url(&[doc_id, "values", range])?;
        let body = self
            .transport
            .execute(self.transport.http.get(url), "values.get")
            .await?;
        let value_range: WireValueRange = decode("values.get", body)?;
        Ok(value_range.values)
    }
}

#[async_trait]
impl SheetsClient for HttpSheetsClient {
    async fn get_metadata(&self, doc_id: &str) -> Result<WorkbookMetadata> {
        let mut url = self.transport.url(&[doc_id])?;
        url.query_pairs_mut().append_pair("fields", METADATA_FIELDS);
        let body = self
            .transport
            .execute(self.transport.http.get(url), "spreadsheets.get")
            .await?;
        let wire: WireSpreadsheet = decode("spreadsheets.get", body)?;
        Ok(wire.into_metadata())
    }

    async fn read_range(&self, doc_id: &str, range: &str) -> Result<Grid> {
        self.values_get(doc_id, range).await
    }

    async fn read_table_at(
        &self,
        doc_id: &str,
        sheet_title: &str,
        table: &TableMetadata,
    ) -> Result<TableData> {
        let header_row = table.range.start_row_index + 1;
        let first_column = table.range.start_column_index + 1;
        let range = block_range(
            sheet_title,
            header_row,
            first_column,
            table.range.end_row_index.max(header_row),
            table.range.end_column_index.max(first_column),
        );
        let mut values = self.values_get(doc_id, &range).await?.into_iter();
        let Some(header) = values.next() else {
            return Ok(TableData {
                header_row_index: table.range.start_row_index,
                start_column_index: table.range.start_column_index,
                ..TableData::default()
            });
        };

        let columns: Vec<String> = header.iter().map(ToString::to_string).collect();
        let rows = values
            .map(|cells| {
                let mut keyed = BTreeMap::new();
                let mut cells = cells.into_iter();
                for column in &columns {
                    keyed.insert(column.clone(), cells.next().unwrap_or_default());
                }
                Row::Keyed(keyed)
            })
            .collect();
        Ok(TableData {
            columns,
            rows,
            header_row_index: table.range.start_row_index,
            start_column_index: table.range.start_column_index,
        })
    }

    async fn batch_read(&self, doc_id: &str, ranges: &[String]) -> Result<Vec<Grid>> {
        let mut url = self.transport.url(&[doc_id, "values:batchGet"])?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("majorDimension", "ROWS");
            for range in ranges {
                query.append_pair("ranges", range);
            }
        }
        let body = self
            .transport
            .execute(self.transport.http.get(url), "values.batchGet")
            .await?;
        let wire: WireBatchGet = decode("values.batchGet", body)?;
        let mut grids: Vec<Grid> = wire.value_ranges.into_iter().map(|v| v.values).collect();
        grids.resize_with(ranges.len(), Vec::new);
        Ok(grids)
    }

    async fn batch_write(
        &self,
        doc_id: &str,
        requests: &[WriteRequest],
    ) -> Result<Vec<WriteReply>> {
        if requests.is_empty() {
            return Ok(Vec::new());
        }
        let url = self
            .transport
            .url(&[&format!("{doc_id}:batchUpdate")])?;
        let payload = json!({
            "requests": requests.iter().map(WriteRequest::to_api).collect::<Vec<_>>()
        });
        let body = self
            .transport
            .execute(
                self.transport.http.post(url).json(&payload),
                "spreadsheets.batchUpdate",
            )
            .await?;
        let wire: WireBatchUpdate = decode("spreadsheets.batchUpdate", body)?;
        Ok(wire.replies.into_iter().map(WireReply::into_reply).collect())
    }

    async fn write_range(&self, doc_id: &str, range: &str, rows: &[Vec<Cell>]) -> Result<()> {
        let mut url = self.transport.url(&[doc_id, "values", range])?;
        url.query_pairs_mut()
            .append_pair("valueInputOption", "USER_ENTERED");
        let payload = json!({ "range": range, "majorDimension": "ROWS", "values": rows });
        self.transport
            .execute(self.transport.http.put(url).json(&payload), "values.update")
            .await?;
        Ok(())
    }
}

/// Drive API v3 modification-time probe.
#[derive(Debug, Clone)]
pub struct HttpDriveProbe {
    transport: Transport,
}

impl HttpDriveProbe {
    /// Creates a probe against the public Drive endpoint.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(token: impl Into<String>) -> Result<Self> {
        Self::with_base_url(DRIVE_BASE_URL, token)
    }

    /// Creates a probe against a custom endpoint.
    ///
    /// # Errors
    ///
    /// Returns an error if `base_url` is not a valid base URL.
    pub fn with_base_url(base_url: &str, token: impl Into<String>) -> Result<Self> {
        Ok(Self {
            transport: Transport::new(base_url, token.into())?,
        })
    }
}

#[async_trait]
impl ModifiedTimeProbe for HttpDriveProbe {
    async fn modified_time(&self, source_id: &str) -> Result<DateTime<Utc>> {
        let mut url = self.transport.url(&[source_id])?;
        url.query_pairs_mut()
            .append_pair("fields", "modifiedTime")
            .append_pair("supportsAllDrives", "true");
        let body = self
            .transport
            .execute(self.transport.http.get(url), "files.get")
            .await?;
        let file: WireFile = decode("files.get", body)?;
        Ok(file.modified_time)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireFile {
    modified_time: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct WireValueRange {
    #[serde(default)]
    values: Grid,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireBatchGet {
    #[serde(default)]
    value_ranges: Vec<WireValueRange>,
}

#[derive(Debug, Deserialize)]
struct WireSpreadsheet {
    #[serde(default)]
    sheets: Vec<WireSheet>,
}

impl WireSpreadsheet {
    fn into_metadata(self) -> WorkbookMetadata {
        WorkbookMetadata {
            sheets: self.sheets.into_iter().map(WireSheet::into_sheet).collect(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct WireSheet {
    properties: WireSheetProperties,
    #[serde(default)]
    tables: Vec<WireTable>,
}

impl WireSheet {
    fn into_sheet(self) -> SheetMetadata {
        SheetMetadata {
            sheet_id: self.properties.sheet_id,
            title: self.properties.title,
            grid: self.properties.grid_properties,
            tables: self
                .tables
                .into_iter()
                .map(|t| TableMetadata {
                    table_id: t.table_id,
                    name: t.name,
                    range: t.range,
                })
                .collect(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireSheetProperties {
    #[serde(default)]
    sheet_id: i64,
    #[serde(default)]
    title: String,
    #[serde(default)]
    grid_properties: GridSize,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireTable {
    table_id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    range: GridRange,
}

#[derive(Debug, Deserialize)]
struct WireBatchUpdate {
    #[serde(default)]
    replies: Vec<WireReply>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireReply {
    add_sheet: Option<WireAddSheet>,
    add_table: Option<WireAddTable>,
}

#[derive(Debug, Deserialize)]
struct WireAddSheet {
    properties: WireSheetProperties,
}

#[derive(Debug, Deserialize)]
struct WireAddTable {
    table: WireTable,
}

impl WireReply {
    fn into_reply(self) -> WriteReply {
        if let Some(added) = self.add_sheet {
            return WriteReply::AddSheet {
                sheet_id: added.properties.sheet_id,
                title: added.properties.title,
                grid: added.properties.grid_properties,
            };
        }
        if let Some(added) = self.add_table {
            return WriteReply::AddTable {
                table_id: added.table.table_id,
                sheet_id: added.table.range.sheet_id,
            };
        }
        WriteReply::Empty
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification() {
        assert!(classify_status("op", StatusCode::TOO_MANY_REQUESTS, "").is_transient());
        assert!(classify_status("op", StatusCode::INTERNAL_SERVER_ERROR, "").is_transient());
        assert!(classify_status("op", StatusCode::SERVICE_UNAVAILABLE, "").is_transient());
        assert!(!classify_status("op", StatusCode::NOT_FOUND, "").is_transient());
        assert!(!classify_status("op", StatusCode::FORBIDDEN, "").is_transient());
    }

    #[test]
    fn metadata_decodes_with_defaults() {
        let body = json!({
            "sheets": [
                {
                    "properties": {
                        "sheetId": 0,
                        "title": "urls",
                        "gridProperties": { "rowCount": 50, "columnCount": 3 }
                    },
                    "tables": [
                        { "tableId": "t-1", "name": "urls", "range": { "endRowIndex": 5, "endColumnIndex": 3 } }
                    ]
                },
                { "properties": { "sheetId": 9, "title": "Orders" } }
            ]
        });
        let wire: WireSpreadsheet = decode("test", body).expect("decode");
        let meta = wire.into_metadata();
        assert_eq!(meta.sheets.len(), 2);
        assert_eq!(meta.sheets[0].grid.row_count, 50);
        assert_eq!(meta.sheets[1].grid, GridSize::default());
        let (_, table) = meta.find_table("urls").expect("table");
        assert_eq!(table.range.start_row_index, 0);
        assert_eq!(table.range.end_column_index, 3);
    }

    #[test]
    fn replies_decode_in_order() {
        let body = json!({
            "replies": [
                {},
                { "addTable": { "table": { "tableId": "abc", "range": { "sheetId": 4 } } } },
                { "addSheet": { "properties": { "sheetId": 7, "title": "New", "gridProperties": { "rowCount": 1000, "columnCount": 26 } } } }
            ]
        });
        let wire: WireBatchUpdate = decode("test", body).expect("decode");
        let replies: Vec<WriteReply> = wire.replies.into_iter().map(WireReply::into_reply).collect();
        assert_eq!(replies[0], WriteReply::Empty);
        assert_eq!(
            replies[1],
            WriteReply::AddTable {
                table_id: "abc".into(),
                sheet_id: 4
            }
        );
        assert!(matches!(replies[2], WriteReply::AddSheet { sheet_id: 7, .. }));
    }

    #[test]
    fn urls_escape_ranges() {
        let transport =
            Transport::new(SHEETS_BASE_URL, "s3cr3t".into()).expect("transport");
        let url = transport
            .url(&["doc", "values", "'My Sheet'!A:C"])
            .expect("url");
        assert_eq!(
            url.as_str(),
            "https://sheets.googleapis.com/v4/spreadsheets/doc/values/'My%20Sheet'!A:C"
        );
        assert!(!format!("{transport:?}").contains("s3cr3t"));
    }
}
