//! Shared test utilities for tabsync integration tests.
//!
//! This crate provides:
//! - [`MemoryWorkbook`]: in-memory documents with operation recording and failure injection
//! - [`ScriptedProbe`]: a modification-time probe answering from a script
//! - [`TestHarness`]: a destination document with a control table, wired into a context
//! - Factory functions for settings and data ranges
//!
//! # Example
//!
//! ```rust,ignore
//! use tabsync_test_utils::{TestHarness, data_range, test_settings};
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let h = TestHarness::new(test_settings(vec![data_range("Orders", "Orders!A1:C", "")], vec![]));
//!     h.set_control(&[["S1", "2024-01-02 00:00:00", ""]]);
//!     // ... run test ...
//! }
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]
#![allow(clippy::must_use_candidate)]
// Test utilities use expect/unwrap for cleaner test code - panics are acceptable in tests
#![allow(clippy::expect_used)]
#![allow(clippy::unwrap_used)]
#![allow(clippy::missing_panics_doc)]

pub mod fixtures;
pub mod workbook;

pub use fixtures::*;
pub use workbook::*;

/// Initialize test logging (call once per test module).
pub fn init_test_logging() {
    use tracing_subscriber::{EnvFilter, fmt};

    let _ = fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("tabsync=debug".parse().expect("valid directive")),
        )
        .with_test_writer()
        .try_init();
}
