//! Natural-key collapse and empty-row removal.

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::model::TimelineRow;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollapseStats {
    pub input_rows: u64,
    pub duplicate_rows_removed: u64,
    pub empty_rows_removed: u64,
    pub output_rows: u64,
}

// Among rows sharing a timestamp a row carrying pump data always wins, then the
// most populated one, then the earlier lineage and input order. Empty columns of
// the winner are filled from the rows it replaces.
pub fn collapse_rows(mut rows: Vec<TimelineRow>) -> (Vec<TimelineRow>, CollapseStats) {
    let mut stats = CollapseStats {
        input_rows: rows.len() as u64,
        ..CollapseStats::default()
    };

    rows.sort_by_key(|r| (r.ts_ms_utc, r.lineage));

    let mut kept: Vec<TimelineRow> = Vec::with_capacity(rows.len());
    let mut best_key = (false, 0usize);
    for row in rows {
        let key = preference(&row);
        match kept.last_mut() {
            Some(current) if current.ts_ms_utc == row.ts_ms_utc => {
                stats.duplicate_rows_removed += 1;
                if key > best_key {
                    let replaced = std::mem::replace(current, row);
                    absorb(current, replaced);
                    best_key = key;
                } else {
                    absorb(current, row);
                }
            }
            _ => {
                best_key = key;
                kept.push(row);
            }
        }
    }

    let before_empty = kept.len();
    kept.retain(|r| !r.is_empty());
    stats.empty_rows_removed = (before_empty - kept.len()) as u64;
    stats.output_rows = kept.len() as u64;

    info!(
        component = "collapse",
        event = "collapse.finish",
        input_rows = stats.input_rows,
        duplicate_rows_removed = stats.duplicate_rows_removed,
        empty_rows_removed = stats.empty_rows_removed,
        output_rows = stats.output_rows
    );

    (kept, stats)
}

fn preference(row: &TimelineRow) -> (bool, usize) {
    (row.pump.is_some(), row.derived_non_null_count())
}

fn absorb(winner: &mut TimelineRow, other: TimelineRow) {
    for (slot, value) in winner.signals.iter_mut().zip(other.signals) {
        if slot.is_none() {
            *slot = value;
        }
    }
    for (flag, raised) in winner.events.iter_mut().zip(other.events) {
        *flag |= raised;
    }
    if winner.pump.is_none() {
        winner.pump = other.pump;
    }
    if winner.patient_id.is_none() {
        winner.patient_id = other.patient_id.clone();
    }
    // Never attach another patient's profile to the winner.
    if winner.profile.is_none() && winner.patient_id == other.patient_id {
        winner.profile = other.profile;
    }
}
