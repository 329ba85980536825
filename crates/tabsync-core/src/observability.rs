//! Observability infrastructure for tabsync.
//!
//! Initialization helpers and span constructors so every component logs with
//! the same fields.

use std::sync::Once;
use tracing::Span;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

static INIT: Once = Once::new();

/// Log output format.
#[derive(Debug, Clone, Copy, Default)]
pub enum LogFormat {
    /// JSON structured logs (for production).
    Json,
    /// Pretty-printed logs (for development).
    #[default]
    Pretty,
}

/// Initializes the logging subsystem.
///
/// Call once at application startup. Safe to call multiple times;
/// subsequent calls are no-ops.
///
/// # Environment Variables
///
/// - `RUST_LOG`: Controls log levels (e.g., `info`, `tabsync_engine=debug`)
///
/// # Example
///
/// ```rust
/// use tabsync_core::observability::{init_logging, LogFormat};
///
/// init_logging(LogFormat::Pretty);
/// ```
pub fn init_logging(format: LogFormat) {
    INIT.call_once(|| {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        match format {
            LogFormat::Json => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(fmt::layer().json())
                    .init();
            }
            LogFormat::Pretty => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(fmt::layer().pretty())
                    .init();
            }
        }
    });
}

/// Creates a span for one sync run against a destination document.
#[must_use]
pub fn run_span(operation: &str, doc_id: &str) -> Span {
    tracing::info_span!("sync_run", op = operation, doc_id = doc_id)
}

/// Creates a span for processing a single queued source.
#[must_use]
pub fn item_span(source_id: &str, mode: &str, control_row: usize) -> Span {
    tracing::info_span!(
        "sync_item",
        source_id = source_id,
        mode = mode,
        control_row = control_row,
    )
}
