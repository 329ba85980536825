//! Transient remote failures are retried at the client boundary.

#![allow(clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use tabsync_core::error::ErrorClass;
use tabsync_core::retry::{RetryPolicy, RetryingClient};
use tabsync_engine::context::SyncContext;
use tabsync_engine::orchestrator::run_sync;
use tabsync_engine::staleness::{StalenessChecker, StalenessWindow};
use tabsync_test_utils::{OpKind, TestHarness, at, data_range, init_test_logging, test_settings};

fn retrying(h: &TestHarness, max_retries: u32) -> SyncContext {
    let policy = RetryPolicy {
        max_retries,
        base_delay: Duration::ZERO,
    };
    SyncContext::new(
        h.ctx.doc_id.clone(),
        Arc::new(RetryingClient::new(h.workbook.clone(), policy)),
        Arc::new(RetryingClient::new(h.probe.clone(), policy)),
        h.store.clone(),
        h.ctx.settings.clone(),
    )
    .with_log_sink(Arc::new(h.log.clone()))
}

fn harness() -> TestHarness {
    init_test_logging();
    let h = TestHarness::new(test_settings(vec![data_range("Orders", "Orders!A1:C", "")], vec![]));
    h.set_control(&[["S1", "2024-01-02 00:00:00", ""]]);
    h.add_source("S1", "Orders", &[&["id", "qty"], &["1", "5"]]);
    h
}

#[tokio::test]
async fn transient_write_failures_are_retried() {
    let h = harness();
    h.workbook
        .inject_failures(OpKind::BatchWrite, None, ErrorClass::Transient, 2);
    let ctx = retrying(&h, 3);

    let summary = run_sync(&ctx, at("2024-01-03 08:00:00")).await.expect("run");

    assert_eq!(summary.failed(), 0);
    assert_eq!(h.destination("Orders").len(), 2);
    // Two failed sheet creations, then sheet creation and the merge.
    assert_eq!(h.workbook.operations_of(OpKind::BatchWrite).len(), 4);
}

#[tokio::test]
async fn exhausted_retries_fail_the_item() {
    let h = harness();
    h.workbook
        .inject_failures(OpKind::BatchRead, Some("S1"), ErrorClass::Transient, 5);
    let ctx = retrying(&h, 2);

    let summary = run_sync(&ctx, at("2024-01-03 08:00:00")).await.expect("run");

    assert_eq!(summary.failed(), 1);
    assert_eq!(h.workbook.operations_of(OpKind::BatchRead).len(), 3);
    assert_eq!(h.control_rows()[0][2], "Error");
}

#[tokio::test]
async fn permanent_failures_are_not_retried() {
    let h = harness();
    h.workbook
        .inject_failures(OpKind::BatchRead, Some("S1"), ErrorClass::Permanent, 1);
    let ctx = retrying(&h, 3);

    let summary = run_sync(&ctx, at("2024-01-03 08:00:00")).await.expect("run");

    assert_eq!(summary.failed(), 1);
    assert_eq!(h.workbook.operations_of(OpKind::BatchRead).len(), 1);
}

#[tokio::test]
async fn transient_probe_failures_are_retried() {
    let h = harness();
    h.probe.fail("S1", ErrorClass::Transient);
    let ctx = retrying(&h, 2);

    let stats = StalenessChecker::new(&ctx)
        .check(StalenessWindow::Unbounded, at("2024-01-03 08:00:00"))
        .await
        .expect("check");

    assert_eq!(stats.errors, 1);
    assert_eq!(h.probe.calls().len(), 3);
    assert_eq!(h.control_rows()[0][1], "Error");
}
