//! Staleness checks and schedule ticks.

#![allow(clippy::expect_used)]

use std::sync::Arc;

use tabsync_core::error::ErrorClass;
use tabsync_core::lease::{AdvisoryLease, LeaseOutcome};
use tabsync_core::storage::PropertyStore;
use tabsync_engine::config::{IntervalUnit, LogLevel, Schedule, SyncSettings};
use tabsync_engine::orchestrator::scheduled_workflow;
use tabsync_engine::run_log::{CHECK_DATES_MODE, LogStatus, SYSTEM_PROBE_SOURCE};
use tabsync_engine::schedule::{LEASE_KEY, ScheduleManager, TickOutcome, last_run_key};
use tabsync_engine::staleness::{CheckStats, StalenessChecker, StalenessWindow};
use tabsync_test_utils::{OpKind, TestHarness, at, data_range, init_test_logging, test_settings};

fn hourly(max_age_days: u32) -> Schedule {
    Schedule {
        max_age_days,
        interval_value: 1,
        interval_unit: IntervalUnit::Hours,
        active: true,
    }
}

fn harness(settings: SyncSettings) -> TestHarness {
    init_test_logging();
    TestHarness::new(settings)
}

#[tokio::test]
async fn check_records_changes_noise_and_failures() {
    let h = harness(SyncSettings {
        log_level: LogLevel::Errors,
        ..test_settings(vec![], vec![])
    });
    h.set_control(&[
        ["A", "2024-01-01 00:00:00", "2024-01-02 00:00:00"],
        ["B", "2024-01-01 00:00:00", "2024-01-02 00:00:00"],
        ["C", "2024-01-01 00:00:00", "2024-01-02 00:00:00"],
        ["D", "2024-01-01 00:00:00", "Error"],
        ["", "", ""],
    ]);
    h.probe.set("A", at("2024-01-05 12:30:00"));
    h.probe.set("B", at("2024-01-01 00:00:03"));
    h.probe.fail("C", ErrorClass::Permanent);

    let stats = StalenessChecker::new(&h.ctx)
        .check(StalenessWindow::Unbounded, at("2024-01-06 00:00:00"))
        .await
        .expect("check");

    assert_eq!(
        stats,
        CheckStats {
            checked: 3,
            changed: 1,
            errors: 1
        }
    );
    assert_eq!(h.probe.calls(), vec!["A", "B", "C"]);

    let modified: Vec<String> = h.control_rows().into_iter().map(|r| r[1].clone()).collect();
    assert_eq!(
        modified[..4],
        [
            "2024-01-05 12:30:00".to_string(),
            "2024-01-01 00:00:00".to_string(),
            "Error".to_string(),
            "2024-01-01 00:00:00".to_string(),
        ]
    );

    let records = h.log.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].source_ref, SYSTEM_PROBE_SOURCE);
    assert_eq!(records[0].mode, CHECK_DATES_MODE);
    assert_eq!(records[0].status, LogStatus::Error);
    assert_eq!(records[0].details, "Range: All, Checked: 3, Changed: 1, Errors: 1");
}

#[tokio::test]
async fn check_skips_rows_outside_the_window() {
    let h = harness(test_settings(vec![], vec![]));
    h.set_control(&[
        ["OLD", "2023-12-01 00:00:00", "2023-12-02 00:00:00"],
        ["NEW", "2024-01-08 00:00:00", "2024-01-08 00:00:00"],
        ["BLANK", "", ""],
    ]);
    h.probe.set("OLD", at("2024-01-09 00:00:00"));
    h.probe.set("NEW", at("2024-01-09 00:00:00"));
    h.probe.set("BLANK", at("2024-01-09 00:00:00"));

    let stats = StalenessChecker::new(&h.ctx)
        .run_single_check(7, at("2024-01-10 00:00:00"))
        .await
        .expect("check");

    assert_eq!(stats.checked, 2);
    assert_eq!(stats.changed, 2);
    assert_eq!(h.probe.calls(), vec!["NEW", "BLANK"]);
    let control = h.control_rows();
    assert_eq!(control[0][1], "2023-12-01 00:00:00");
    assert_eq!(control[1][1], "2024-01-09 00:00:00");
    assert_eq!(control[2][1], "2024-01-09 00:00:00");
    assert!(h.log.records().is_empty());
}

#[tokio::test]
async fn check_then_sync_picks_up_changed_sources() {
    let h = harness(test_settings(vec![data_range("Orders", "Orders!A1:C", "")], vec![]));
    h.set_control(&[["S1", "2024-01-01 00:00:00", "2024-01-02 00:00:00"]]);
    h.add_source("S1", "Orders", &[&["id", "qty"], &["1", "5"]]);
    h.probe.set("S1", at("2024-01-03 00:00:00"));

    let now = at("2024-01-04 00:00:00");
    StalenessChecker::new(&h.ctx)
        .check(StalenessWindow::Unbounded, now)
        .await
        .expect("check");
    let summary = tabsync_engine::orchestrator::run_sync(&h.ctx, now)
        .await
        .expect("run");

    assert_eq!(summary.items.len(), 1);
    assert_eq!(h.control_rows()[0][2], "2024-01-04 00:00:00");
}

#[tokio::test]
async fn check_failure_to_read_propagates() {
    let h = harness(test_settings(vec![], vec![]));
    h.set_control(&[["A", "2024-01-01 00:00:00", ""]]);
    h.workbook
        .inject_failure(OpKind::ReadRange, None, ErrorClass::Permanent);

    let result = StalenessChecker::new(&h.ctx)
        .check(StalenessWindow::Unbounded, at("2024-01-04 00:00:00"))
        .await;
    assert!(result.is_err());
    assert!(h.workbook.operations_of(OpKind::WriteRange).is_empty());
}

#[tokio::test]
async fn tick_runs_due_schedules_and_stamps_last_run() {
    let h = harness(test_settings(vec![], vec![hourly(7), hourly(0)]));
    h.set_control(&[["A", "2024-01-01 00:00:00", "2024-01-02 00:00:00"]]);
    h.probe.set("A", at("2024-01-01 00:00:00"));

    let now = at("2024-01-04 00:00:00");
    let manager = ScheduleManager::new(&h.ctx);
    let outcome = manager.tick(now).await.expect("tick");

    match outcome {
        TickOutcome::Checked { stats, due, window } => {
            assert_eq!(due, vec![0, 1]);
            assert_eq!(window, StalenessWindow::Unbounded);
            assert_eq!(stats.checked, 1);
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert_eq!(manager.last_run(0).await.expect("read"), Some(now));
    assert_eq!(manager.last_run(1).await.expect("read"), Some(now));

    let lease = AdvisoryLease::new(h.store.clone(), LEASE_KEY, h.ctx.settings.lease_ttl());
    assert!(!lease.is_held(now).await.expect("lease"));
}

#[tokio::test]
async fn tick_respects_intervals_with_tolerance() {
    let h = harness(test_settings(vec![], vec![hourly(0)]));
    let manager = ScheduleManager::new(&h.ctx);
    let start = at("2024-01-04 00:00:00");

    assert!(matches!(manager.tick(start).await.expect("tick"), TickOutcome::Checked { .. }));
    assert_eq!(
        manager.tick(at("2024-01-04 00:30:00")).await.expect("tick"),
        TickOutcome::NothingDue
    );
    assert!(matches!(
        manager.tick(at("2024-01-04 00:59:55")).await.expect("tick"),
        TickOutcome::Checked { .. }
    ));
}

#[tokio::test]
async fn tick_backs_off_while_lease_is_held() {
    let h = harness(test_settings(vec![], vec![hourly(0)]));
    h.set_control(&[["A", "2024-01-01 00:00:00", ""]]);
    h.probe.set("A", at("2024-01-03 00:00:00"));
    let now = at("2024-01-04 00:00:00");

    let other = AdvisoryLease::new(h.store.clone(), LEASE_KEY, h.ctx.settings.lease_ttl());
    let LeaseOutcome::Acquired(guard) = other.try_acquire(now).await.expect("acquire") else {
        panic!("lease should be free");
    };

    let outcome = ScheduleManager::new(&h.ctx).tick(now).await.expect("tick");

    let held = match outcome {
        TickOutcome::Skipped(held) => held,
        other => panic!("expected skip, got {other:?}"),
    };
    assert_eq!(held.holder_id, other.holder_id());
    assert!(h.probe.calls().is_empty());
    assert!(h.store.get(&last_run_key(0)).await.expect("get").is_none());
    assert_eq!(h.control_rows()[0][1], "2024-01-01 00:00:00");

    guard.release().await.expect("release");
}

#[tokio::test]
async fn expired_lease_is_taken_over() {
    let h = harness(test_settings(vec![], vec![hourly(0)]));
    let start = at("2024-01-04 00:00:00");

    let crashed = AdvisoryLease::new(h.store.clone(), LEASE_KEY, h.ctx.settings.lease_ttl());
    let LeaseOutcome::Acquired(guard) = crashed.try_acquire(start).await.expect("acquire") else {
        panic!("lease should be free");
    };
    std::mem::forget(guard);

    let later = start + chrono::Duration::from_std(h.ctx.settings.lease_ttl()).expect("ttl");
    let outcome = ScheduleManager::new(&h.ctx).tick(later).await.expect("tick");
    assert!(matches!(outcome, TickOutcome::Checked { .. }));
}

#[tokio::test]
async fn inactive_and_missing_schedules_do_nothing() {
    let h = harness(test_settings(vec![], vec![]));
    assert_eq!(
        ScheduleManager::new(&h.ctx).tick(at("2024-01-04 00:00:00")).await.expect("tick"),
        TickOutcome::NoSchedules
    );

    let inactive = Schedule {
        active: false,
        ..hourly(0)
    };
    let h = harness(test_settings(vec![], vec![inactive]));
    assert_eq!(
        ScheduleManager::new(&h.ctx).tick(at("2024-01-04 00:00:00")).await.expect("tick"),
        TickOutcome::NothingDue
    );
    assert!(h.workbook.operations_of(OpKind::ReadRange).is_empty());
}

#[tokio::test]
async fn reset_clears_run_state() {
    let h = harness(test_settings(vec![], vec![hourly(0), hourly(3)]));
    let manager = ScheduleManager::new(&h.ctx);
    manager.tick(at("2024-01-04 00:00:00")).await.expect("tick");

    assert_eq!(manager.reset_run_state().await.expect("reset"), 2);
    assert_eq!(manager.last_run(0).await.expect("read"), None);
    assert!(matches!(
        manager.tick(at("2024-01-04 00:01:00")).await.expect("tick"),
        TickOutcome::Checked { .. }
    ));
}

#[tokio::test]
async fn failed_check_leaves_run_state_untouched() {
    let h = harness(test_settings(vec![], vec![hourly(0)]));
    h.set_control(&[["A", "2024-01-01 00:00:00", ""]]);
    h.workbook
        .inject_failures(OpKind::ReadRange, None, ErrorClass::Transient, 1);
    let manager = ScheduleManager::new(&h.ctx);

    assert!(manager.tick(at("2024-01-04 00:00:00")).await.is_err());
    assert_eq!(manager.last_run(0).await.expect("read"), None);

    let lease = AdvisoryLease::new(
        Arc::clone(&h.ctx.store),
        LEASE_KEY,
        h.ctx.settings.lease_ttl(),
    );
    assert!(!lease.is_held(at("2024-01-04 00:00:00")).await.expect("lease"));
}

#[tokio::test]
async fn scheduled_workflow_checks_then_syncs() {
    let h = harness(test_settings(
        vec![data_range("Orders", "Orders!A1:C", "")],
        vec![hourly(0)],
    ));
    h.set_control(&[["S1", "2024-01-01 00:00:00", "2024-01-02 00:00:00"]]);
    h.add_source("S1", "Orders", &[&["id", "qty"], &["1", "5"]]);
    h.probe.set("S1", at("2024-01-03 00:00:00"));

    let report = scheduled_workflow(&h.ctx, at("2024-01-04 00:00:00")).await;

    assert!(matches!(report.tick, Some(TickOutcome::Checked { .. })));
    let sync = report.sync.expect("sync ran");
    assert_eq!(sync.items.len(), 1);
    assert_eq!(h.destination("Orders").len(), 2);
}
