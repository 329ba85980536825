//! Run orchestrator: one full synchronization pass over the control table.
//!
//! A run validates settings, reads the control table, snapshots the
//! destination, builds the queue and processes items strictly one after
//! another. A failing item is logged, stamped `Error` and does not stop the
//! run.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::Instrument;

use tabsync_core::observability::{item_span, run_span};
use tabsync_core::remote::{WriteReply, WriteRequest};
use tabsync_core::table::{Cell, cell_range};
use tabsync_core::timestamp::ERROR_SENTINEL;

use crate::context::SyncContext;
use crate::control::read_control_table;
use crate::error::{Error, Result};
use crate::executor::{SourceOutcome, read_and_trim_source, sync_source};
use crate::queue::{QueueItem, build_queue};
use crate::run_log::should_log_item;
use crate::schedule::{ScheduleManager, TickOutcome};
use crate::snapshot::{TargetState, snapshot};

/// Result of one queue item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemReport {
    /// The processed item.
    pub item: QueueItem,
    /// Whether the item failed.
    pub has_error: bool,
    /// Rows merged across all tables.
    pub total_rows: usize,
    /// Per-table summary, or the failure.
    pub details: String,
}

/// Result of a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    /// Sheets created before processing.
    pub sheets_created: usize,
    /// Items in queue order.
    pub items: Vec<ItemReport>,
}

impl RunSummary {
    /// Number of failed items.
    #[must_use]
    pub fn failed(&self) -> usize {
        self.items.iter().filter(|i| i.has_error).count()
    }

    /// Rows merged across all items.
    #[must_use]
    pub fn total_rows(&self) -> usize {
        self.items.iter().map(|i| i.total_rows).sum()
    }
}

/// Result of a scheduled invocation.
#[derive(Debug, Default)]
pub struct WorkflowReport {
    /// The schedule tick, unless it failed.
    pub tick: Option<TickOutcome>,
    /// The sync run, unless it failed.
    pub sync: Option<RunSummary>,
}

/// Runs one synchronization pass.
///
/// # Errors
///
/// Returns a configuration error before any work when the settings are
/// unusable, a control table error when the update column is missing, or the
/// error of a failed metadata read or sheet creation. Per-item failures are
/// reported in the summary instead.
pub async fn run_sync(ctx: &SyncContext, now: DateTime<Utc>) -> Result<RunSummary> {
    run_sync_inner(ctx, now)
        .instrument(run_span("run_sync", &ctx.doc_id))
        .await
}

async fn run_sync_inner(ctx: &SyncContext, now: DateTime<Utc>) -> Result<RunSummary> {
    let _timer = ctx.metrics.time_run("run_sync");
    let settings = &ctx.settings;

    if settings.data_ranges.is_empty() {
        return Err(Error::configuration("no destination tables configured"));
    }
    settings.validate()?;

    let metadata = ctx.client.get_metadata(&ctx.doc_id).await?;
    let Some(control) = read_control_table(
        ctx.client.as_ref(),
        &ctx.doc_id,
        &metadata,
        &settings.control_table_name,
        &settings.headers,
        settings.timezone,
    )
    .await?
    else {
        tracing::info!("control table is empty");
        return Ok(RunSummary::default());
    };
    let update_column = control.require_update_column(&settings.headers)?;

    let mut state = snapshot(ctx, &metadata).await;
    let queue = build_queue(&control.entries, &state, &settings.data_ranges);
    if queue.is_empty() {
        tracing::info!("all sources up to date");
        return Ok(RunSummary::default());
    }
    tracing::info!(items = queue.len(), "queue built");

    let mut summary = RunSummary {
        sheets_created: ensure_infrastructure(ctx, &mut state).await?,
        items: Vec::with_capacity(queue.len()),
    };

    for (position, item) in queue.into_iter().enumerate() {
        if position > 0 {
            tokio::time::sleep(settings.sleep_time()).await;
        }
        let span = item_span(&item.source_id, item.mode.as_str(), item.control_row_index);
        let report = process_item(ctx, &mut state, item, update_column, now)
            .instrument(span)
            .await;
        summary.items.push(report);
    }

    tracing::info!(
        items = summary.items.len(),
        failed = summary.failed(),
        rows = summary.total_rows(),
        "sync run complete"
    );
    Ok(summary)
}

async fn process_item(
    ctx: &SyncContext,
    state: &mut TargetState,
    item: QueueItem,
    update_column: usize,
    now: DateTime<Utc>,
) -> ItemReport {
    tracing::info!("processing source");
    let result = merge_source(ctx, state, &item).await;

    let (has_error, total_rows, details) = match result {
        Ok(outcome) => (false, outcome.total_rows(), outcome.details()),
        Err(err) => {
            tracing::error!(error = %err, "source failed");
            (true, 0, format!("CRITICAL: {err}"))
        }
    };
    ctx.metrics
        .record_queue_item(item.mode.as_str(), if has_error { "error" } else { "success" });

    if should_log_item(ctx.settings.log_level, has_error, &details) {
        ctx.emit_log(now, &item.source_id, item.mode.as_str(), has_error, total_rows, details.clone())
            .await;
    }

    let stamp = if has_error {
        ERROR_SENTINEL.to_string()
    } else {
        ctx.format_timestamp(now)
    };
    let range = cell_range(
        &ctx.settings.control_sheet_name,
        item.control_row_index,
        update_column,
    );
    if let Err(err) = ctx
        .client
        .write_range(&ctx.doc_id, &range, &[vec![Cell::Text(stamp)]])
        .await
    {
        tracing::error!(error = %err, range = %range, "failed to stamp last update");
    }

    ItemReport {
        item,
        has_error,
        total_rows,
        details,
    }
}

async fn merge_source(
    ctx: &SyncContext,
    state: &mut TargetState,
    item: &QueueItem,
) -> Result<SourceOutcome> {
    let tables = read_and_trim_source(ctx, &item.source_id, &ctx.settings.data_ranges).await?;
    sync_source(ctx, state, &item.source_id, item.mode, &tables).await
}

/// Creates every configured destination sheet that does not exist yet, in one
/// batched write, and registers the new sheets in `state`. Returns the number
/// of sheets created.
///
/// # Errors
///
/// Returns an error if the batched write fails.
pub async fn ensure_infrastructure(ctx: &SyncContext, state: &mut TargetState) -> Result<usize> {
    let mut missing: Vec<&str> = Vec::new();
    for range in &ctx.settings.data_ranges {
        let sheet = range.sheet_name();
        if !state.sheets.contains_key(sheet) && !missing.contains(&sheet) {
            missing.push(sheet);
        }
    }
    if missing.is_empty() {
        return Ok(0);
    }

    tracing::info!(sheets = ?missing, "creating missing destination sheets");
    let requests: Vec<WriteRequest> = missing
        .iter()
        .map(|title| WriteRequest::AddSheet {
            title: (*title).to_string(),
            frozen_row_count: ctx.settings.grid.frozen_rows,
        })
        .collect();
    let replies = ctx.client.batch_write(&ctx.doc_id, &requests).await?;

    let mut created = 0;
    for reply in replies {
        if let WriteReply::AddSheet {
            sheet_id,
            title,
            grid,
        } = reply
        {
            state.register_sheet(title, sheet_id, grid);
            created += 1;
        }
    }
    Ok(created)
}

/// Scheduled entry point: a schedule tick followed by a sync run.
///
/// Failures of either step are logged and leave the matching report field empty.
pub async fn scheduled_workflow(ctx: &SyncContext, now: DateTime<Utc>) -> WorkflowReport {
    let tick = match ScheduleManager::new(ctx).tick(now).await {
        Ok(outcome) => Some(outcome),
        Err(err) => {
            tracing::error!(error = %err, "schedule tick failed");
            None
        }
    };
    let sync = match run_sync(ctx, now).await {
        Ok(summary) => Some(summary),
        Err(err) => {
            tracing::error!(error = %err, "sync run failed");
            None
        }
    };
    WorkflowReport { tick, sync }
}
