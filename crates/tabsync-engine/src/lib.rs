//! # tabsync-engine
//!
//! Synchronizes rows from many source tables into shared destination tables
//! of one workbook, driven by a control table of per-source timestamps.
//!
//! - **Staleness checks**: refresh recorded modification times from the
//!   source of truth, on a schedule guarded by an advisory lease
//! - **Queue building**: decide which sources need work and whether their
//!   rows are synced in place or appended
//! - **Merging**: turn source rows into one batched write per source while
//!   keeping an in-memory snapshot of the destination consistent
//!
//! ## Guarantees
//!
//! - **At-least-once**: a source is re-synced until its update stamp is newer
//!   than its modification time; re-syncing replaces its rows
//! - **Isolated failures**: a failing source is stamped `Error` and the run
//!   continues
//! - **Single checker**: at most one staleness check runs per document; a
//!   crashed holder blocks others for at most one lease TTL
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use chrono::Utc;
//! use tabsync_core::remote::{ModifiedTimeProbe, SheetsClient};
//! use tabsync_core::storage::MemoryPropertyStore;
//! use tabsync_engine::prelude::*;
//!
//! # async fn example(
//! #     client: Arc<dyn SheetsClient>,
//! #     probe: Arc<dyn ModifiedTimeProbe>,
//! # ) -> Result<()> {
//! let settings = SyncSettings::from_json(r#"{"dataRanges":[{"sourceName":"Orders","range":"Orders!A1:D"}]}"#)?
//!     .with_env_overrides()?;
//! let ctx = SyncContext::new("doc-id", client, probe, Arc::new(MemoryPropertyStore::new()), settings);
//!
//! let summary = run_sync(&ctx, Utc::now()).await?;
//! println!("{} items, {} failed", summary.items.len(), summary.failed());
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod config;
pub mod context;
pub mod control;
pub mod error;
pub mod executor;
pub mod metrics;
pub mod orchestrator;
pub mod queue;
pub mod run_log;
pub mod schedule;
pub mod snapshot;
pub mod staleness;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::config::{DataRange, IntervalUnit, LogLevel, Schedule, SyncSettings};
    pub use crate::context::SyncContext;
    pub use crate::control::{ControlEntry, ControlTable, extract_source_id};
    pub use crate::error::{Error, Result};
    pub use crate::executor::{SourceOutcome, TableOutcome, TablePlan, plan_table, sync_source};
    pub use crate::metrics::SyncMetrics;
    pub use crate::orchestrator::{RunSummary, WorkflowReport, run_sync, scheduled_workflow};
    pub use crate::queue::{QueueItem, SyncMode, SyncNeed, build_queue, classify};
    pub use crate::run_log::{LogRecord, LogSink, LogStatus, TracingLogSink};
    pub use crate::schedule::{ScheduleManager, TickOutcome};
    pub use crate::snapshot::{TableState, TargetState, snapshot};
    pub use crate::staleness::{CheckStats, StalenessChecker, StalenessWindow};
}
