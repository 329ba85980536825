//! Sync queue: which sources need work this run, and in which mode.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use tabsync_core::timestamp::StampValue;

use crate::config::DataRange;
use crate::control::ControlEntry;
use crate::snapshot::TargetState;

/// How a source's rows are merged into a destination table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncMode {
    /// Replace the source's existing rows.
    Sync,
    /// Add rows after the existing ones.
    Append,
    /// Replace the whole table.
    Replace,
}

impl SyncMode {
    /// Returns the canonical name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Sync => "sync",
            Self::Append => "append",
            Self::Replace => "replace",
        }
    }
}

impl fmt::Display for SyncMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a control row needs syncing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncNeed {
    /// Up to date, or blocked by a previous error.
    NoAction,
    /// Modified since the last sync, or never synced.
    NeedWork,
}

/// Classifies a control row from its two timestamps.
///
/// A row is left alone when its last sync failed (`Error`) or when both
/// timestamps parse and the sync is not older than the modification.
#[must_use]
pub fn classify(last_modified: &StampValue, last_update: &StampValue) -> SyncNeed {
    if last_update.is_error() {
        return SyncNeed::NoAction;
    }
    match (last_modified.at(), last_update.at()) {
        (Some(modified), Some(updated)) if updated >= modified => SyncNeed::NoAction,
        _ => SyncNeed::NeedWork,
    }
}

/// One source to process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueItem {
    /// Source document ID.
    pub source_id: String,
    /// Reference as entered in the control table.
    pub raw_ref: String,
    /// Merge mode.
    pub mode: SyncMode,
    /// 1-based control table row to stamp.
    pub control_row_index: usize,
}

/// Collects every `Source_ID` present in the configured destination tables.
#[must_use]
pub fn destination_source_ids(state: &TargetState, ranges: &[DataRange]) -> HashSet<String> {
    ranges
        .iter()
        .flat_map(|range| state.rows(range.sheet_name()).iter().skip(1))
        .filter_map(|row| row.first())
        .map(tabsync_core::table::Cell::trimmed)
        .filter(|id| !id.is_empty())
        .collect()
}

/// Builds the run queue.
///
/// Sources already present in a destination table are queued as
/// [`SyncMode::Sync`], the others as [`SyncMode::Append`]. All sync items
/// precede all append items; each group keeps control-row order.
#[must_use]
pub fn build_queue(
    entries: &[ControlEntry],
    state: &TargetState,
    ranges: &[DataRange],
) -> Vec<QueueItem> {
    let present = destination_source_ids(state, ranges);

    let (sync, append): (Vec<_>, Vec<_>) = entries
        .iter()
        .filter(|e| e.has_source())
        .filter(|e| classify(&e.last_modified, &e.last_update) == SyncNeed::NeedWork)
        .map(|e| {
            let source_id = e.source_id();
            let mode = if present.contains(&source_id) {
                SyncMode::Sync
            } else {
                SyncMode::Append
            };
            QueueItem {
                source_id,
                raw_ref: e.source_ref.clone(),
                mode,
                control_row_index: e.row_index,
            }
        })
        .partition(|item| item.mode == SyncMode::Sync);

    sync.into_iter().chain(append).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono_tz::Tz;
    use tabsync_core::table::{Cell, row};

    fn stamp(raw: &str) -> StampValue {
        StampValue::parse(raw, Tz::UTC)
    }

    fn entry(row_index: usize, source: &str, modified: &str, updated: &str) -> ControlEntry {
        ControlEntry {
            row_index,
            source_ref: source.into(),
            last_modified: stamp(modified),
            last_update: stamp(updated),
            raw_last_modified: Cell::from(modified),
        }
    }

    #[test]
    fn classification() {
        let older = "2024-01-01 09:00:00";
        let newer = "2024-01-01 10:00:00";
        assert_eq!(classify(&stamp(newer), &stamp(older)), SyncNeed::NeedWork);
        assert_eq!(classify(&stamp(older), &stamp(newer)), SyncNeed::NoAction);
        assert_eq!(classify(&stamp(newer), &stamp(newer)), SyncNeed::NoAction);
        assert_eq!(classify(&stamp(newer), &stamp("")), SyncNeed::NeedWork);
        assert_eq!(classify(&stamp(newer), &stamp("Error")), SyncNeed::NoAction);
        assert_eq!(classify(&stamp("garbage"), &stamp(older)), SyncNeed::NeedWork);
    }

    #[test]
    fn sync_items_precede_append_items() {
        let mut state = TargetState::default();
        state.values.insert(
            "Orders".into(),
            vec![row(["Source_ID", "a"]), row(["B", "1"]), row(["D", "2"])],
        );
        let ranges = vec![DataRange {
            source_name: "Orders".into(),
            range: "Orders!A1:A".into(),
            not_empty_column: String::new(),
        }];
        let entries = vec![
            entry(2, "A", "2024-01-02 00:00:00", ""),
            entry(3, "B", "2024-01-02 00:00:00", "2024-01-01 00:00:00"),
            entry(4, "", "", ""),
            entry(5, "C", "2024-01-01 00:00:00", "2024-01-02 00:00:00"),
            entry(6, "https://docs.google.com/spreadsheets/d/D/edit", "", ""),
        ];

        let queue = build_queue(&entries, &state, &ranges);
        let order: Vec<_> = queue.iter().map(|q| (q.source_id.as_str(), q.mode)).collect();
        assert_eq!(
            order,
            vec![("B", SyncMode::Sync), ("D", SyncMode::Sync), ("A", SyncMode::Append)]
        );
        assert_eq!(queue[1].control_row_index, 6);
        assert!(queue[1].raw_ref.starts_with("https://"));
    }

    #[test]
    fn header_row_is_not_a_source() {
        let mut state = TargetState::default();
        state.values.insert("Orders".into(), vec![row(["Source_ID", "a"])]);
        let ranges = vec![DataRange {
            source_name: "Orders".into(),
            range: String::new(),
            not_empty_column: String::new(),
        }];
        assert!(destination_source_ids(&state, &ranges).is_empty());
    }
}
