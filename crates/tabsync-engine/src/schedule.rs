//! Schedule manager: periodic staleness checks under an advisory lease.
//!
//! Every tick tries to take the document lease. While another invocation
//! holds it (and its TTL has not run out) the tick does nothing at all,
//! including touching run state. A crashed holder blocks ticks for at most
//! one TTL.
//!
//! Run state is one property per schedule index holding the epoch
//! milliseconds of its last run.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use tabsync_core::lease::{AdvisoryLease, LeaseOutcome};
use tabsync_core::storage::{PropertyStore, WritePrecondition};

use crate::config::{IntervalUnit, Schedule};
use crate::context::SyncContext;
use crate::error::Result;
use crate::staleness::{CheckStats, StalenessChecker, StalenessWindow};

/// Property key of the advisory lease.
pub const LEASE_KEY: &str = "syncSchedule_running";
/// Prefix of the per-schedule last-run keys.
pub const LAST_RUN_PREFIX: &str = "syncSchedule_lastRun_";

/// Returns the last-run key of schedule `index`.
#[must_use]
pub fn last_run_key(index: usize) -> String {
    format!("{LAST_RUN_PREFIX}{index}")
}

impl Schedule {
    /// Returns the interval between runs.
    ///
    /// Minute intervals are coalesced to 1, 5, 10, 15 or 30 minutes.
    #[must_use]
    pub fn interval(&self) -> chrono::Duration {
        let value = i64::from(self.interval_value.max(1));
        match self.interval_unit {
            IntervalUnit::Minutes => chrono::Duration::minutes(match value {
                ..5 => 1,
                5..10 => 5,
                10..15 => 10,
                15..30 => 15,
                _ => 30,
            }),
            IntervalUnit::Hours => chrono::Duration::hours(value),
            IntervalUnit::Days => chrono::Duration::days(value),
            IntervalUnit::Weeks => chrono::Duration::weeks(value),
        }
    }

    /// Returns true if the schedule should run at `now`.
    #[must_use]
    pub fn is_due(
        &self,
        last_run: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
        tolerance: chrono::Duration,
    ) -> bool {
        if !self.active {
            return false;
        }
        last_run.is_none_or(|last| now - last >= self.interval() - tolerance)
    }
}

/// The live lease that made a tick back off.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LeaseHeld {
    /// Holder ID of the live lease.
    pub holder_id: String,
    /// When the holder started.
    pub started_at: DateTime<Utc>,
}

/// What a tick did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// Another invocation holds the lease.
    Skipped(LeaseHeld),
    /// No schedules are configured.
    NoSchedules,
    /// No schedule was due.
    NothingDue,
    /// One staleness check ran for the due schedules.
    Checked {
        /// Check statistics.
        stats: CheckStats,
        /// Indices of the schedules that were due.
        due: Vec<usize>,
        /// Window used for the check.
        window: StalenessWindow,
    },
}

impl TickOutcome {
    /// Metric label of the outcome.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Skipped(_) => "lease_held",
            Self::NoSchedules => "no_schedules",
            Self::NothingDue => "nothing_due",
            Self::Checked { .. } => "checked",
        }
    }
}

/// Evaluates schedules and runs due staleness checks.
#[derive(Debug)]
pub struct ScheduleManager<'a> {
    ctx: &'a SyncContext,
}

impl<'a> ScheduleManager<'a> {
    /// Creates a manager over `ctx`.
    #[must_use]
    pub const fn new(ctx: &'a SyncContext) -> Self {
        Self { ctx }
    }

    fn lease(&self) -> AdvisoryLease<dyn PropertyStore> {
        AdvisoryLease::new(
            Arc::clone(&self.ctx.store),
            LEASE_KEY,
            self.ctx.settings.lease_ttl(),
        )
    }

    /// Runs one schedule tick.
    ///
    /// The lease is released on every exit path once acquired.
    ///
    /// # Errors
    ///
    /// Returns an error if the property store or the staleness check fails.
    /// Run state is only stamped after a successful check.
    #[tracing::instrument(skip(self, now), fields(doc_id = %self.ctx.doc_id))]
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<TickOutcome> {
        let guard = match self.lease().try_acquire(now).await? {
            LeaseOutcome::Acquired(guard) => guard,
            LeaseOutcome::Held {
                holder_id,
                started_at,
            } => {
                tracing::info!(holder = %holder_id, %started_at, "schedule run in progress, skipping");
                let outcome = TickOutcome::Skipped(LeaseHeld {
                    holder_id,
                    started_at,
                });
                self.ctx.metrics.record_schedule_tick(outcome.label());
                return Ok(outcome);
            }
        };

        let result = self.run_due(now).await;

        if let Err(err) = guard.release().await {
            tracing::warn!(error = %err, "schedule lease release failed");
        }

        match &result {
            Ok(outcome) => {
                tracing::info!(outcome = outcome.label(), "schedule tick complete");
                self.ctx.metrics.record_schedule_tick(outcome.label());
            }
            Err(err) => {
                tracing::error!(error = %err, "schedule tick failed");
                self.ctx.metrics.record_schedule_tick("error");
            }
        }
        result
    }

    async fn run_due(&self, now: DateTime<Utc>) -> Result<TickOutcome> {
        let schedules = &self.ctx.settings.schedules;
        if schedules.is_empty() {
            return Ok(TickOutcome::NoSchedules);
        }

        let tolerance = self.ctx.settings.due_tolerance();
        let mut due = Vec::new();
        let mut window: Option<StalenessWindow> = None;
        for (index, schedule) in schedules.iter().enumerate() {
            let last_run = self.last_run(index).await?;
            if schedule.is_due(last_run, now, tolerance) {
                let w = StalenessWindow::from_max_age_days(schedule.max_age_days);
                window = Some(window.map_or(w, |current| current.union(w)));
                due.push(index);
            }
        }

        let Some(window) = window else {
            tracing::debug!("no schedule due");
            return Ok(TickOutcome::NothingDue);
        };

        tracing::info!(?due, %window, "running due schedules");
        let stats = StalenessChecker::new(self.ctx).check(window, now).await?;

        let stamp = now.timestamp_millis().to_string();
        for &index in &due {
            self.ctx
                .store
                .put(&last_run_key(index), stamp.clone(), WritePrecondition::None)
                .await?;
        }

        Ok(TickOutcome::Checked { stats, due, window })
    }

    /// Reads the last run of schedule `index`.
    ///
    /// An unreadable value counts as never run.
    ///
    /// # Errors
    ///
    /// Returns an error if the property store fails.
    pub async fn last_run(&self, index: usize) -> Result<Option<DateTime<Utc>>> {
        let key = last_run_key(index);
        let Some(stored) = self.ctx.store.get(&key).await? else {
            return Ok(None);
        };
        let parsed = stored
            .value
            .trim()
            .parse::<i64>()
            .ok()
            .and_then(DateTime::from_timestamp_millis);
        if parsed.is_none() {
            tracing::warn!(key = %key, value = %stored.value, "ignoring unreadable last run");
        }
        Ok(parsed)
    }

    /// Clears the last-run state of every schedule. Returns the number of keys removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the property store fails.
    pub async fn reset_run_state(&self) -> Result<usize> {
        let keys = self.ctx.store.list_keys(LAST_RUN_PREFIX).await?;
        for key in &keys {
            self.ctx.store.delete(key).await?;
        }
        tracing::info!(removed = keys.len(), "schedule run state reset");
        Ok(keys.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schedule(value: u32, unit: IntervalUnit) -> Schedule {
        Schedule {
            max_age_days: 0,
            interval_value: value,
            interval_unit: unit,
            active: true,
        }
    }

    #[test]
    fn minute_intervals_coalesce() {
        let cases = [(0, 1), (1, 1), (4, 1), (5, 5), (9, 5), (12, 10), (20, 15), (45, 30)];
        for (value, minutes) in cases {
            assert_eq!(
                schedule(value, IntervalUnit::Minutes).interval(),
                chrono::Duration::minutes(minutes),
                "value {value}"
            );
        }
    }

    #[test]
    fn larger_units_scale() {
        assert_eq!(schedule(0, IntervalUnit::Hours).interval(), chrono::Duration::hours(1));
        assert_eq!(schedule(3, IntervalUnit::Days).interval(), chrono::Duration::days(3));
        assert_eq!(schedule(2, IntervalUnit::Weeks).interval(), chrono::Duration::weeks(2));
    }

    #[test]
    fn due_respects_tolerance() {
        let s = schedule(1, IntervalUnit::Hours);
        let now = Utc::now();
        let tolerance = chrono::Duration::seconds(10);
        assert!(s.is_due(None, now, tolerance));
        assert!(s.is_due(Some(now - chrono::Duration::minutes(59) - chrono::Duration::seconds(55)), now, tolerance));
        assert!(!s.is_due(Some(now - chrono::Duration::minutes(59)), now, tolerance));
    }

    #[test]
    fn inactive_is_never_due() {
        let mut s = schedule(1, IntervalUnit::Minutes);
        s.active = false;
        assert!(!s.is_due(None, Utc::now(), chrono::Duration::zero()));
    }

    #[test]
    fn last_run_keys() {
        assert_eq!(last_run_key(2), "syncSchedule_lastRun_2");
    }
}
