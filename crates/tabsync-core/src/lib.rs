//! # tabsync-core
//!
//! Shared primitives for tabsync, the table synchronization engine.
//!
//! - **Errors**: one error type with a typed transient/permanent classification
//! - **Remote contracts**: the [`SheetsClient`](remote::SheetsClient) and
//!   [`ModifiedTimeProbe`](remote::ModifiedTimeProbe) traits, the batched write
//!   request model and a bounded retry decorator
//! - **Tabular model**: cells, keyed/positional rows, grid ranges and A1 helpers
//! - **Timestamps**: the control-table timestamp codec
//! - **Coordination**: a document-scoped property store with CAS writes and an
//!   advisory lease built on it
//!
//! With the `http` feature, [`http`] provides REST clients for the Sheets and
//! Drive APIs.
//!
//! ## Example
//!
//! ```rust
//! use tabsync_core::prelude::*;
//!
//! let cells = row(["X", "a", "b"]);
//! assert_eq!(cells.len(), 3);
//! assert_eq!(column_letter(27), "AA");
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod error;
#[cfg(feature = "http")]
pub mod http;
pub mod lease;
pub mod observability;
pub mod remote;
pub mod retry;
pub mod storage;
pub mod table;
pub mod timestamp;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::error::{Error, ErrorClass, Result};
    pub use crate::lease::{AdvisoryLease, DEFAULT_LEASE_TTL, LeaseGuard, LeaseOutcome, LeaseRecord};
    pub use crate::remote::{
        Grid, ModifiedTimeProbe, SheetMetadata, SheetsClient, TableMetadata, WorkbookMetadata,
        WriteReply, WriteRequest,
    };
    pub use crate::retry::{RetryPolicy, RetryingClient, with_retry};
    pub use crate::storage::{
        MemoryPropertyStore, PropertyStore, VersionedValue, WritePrecondition, WriteResult,
    };
    pub use crate::table::{
        Cell, GridRange, GridSize, Row, TableData, block_range, cell_range, column_letter,
        column_span_range, full_columns_range, quote_sheet, row,
    };
    pub use crate::timestamp::{ERROR_SENTINEL, StampValue, TIMESTAMP_FORMAT, format_instant};
}

pub use error::{Error, ErrorClass, Result};
