//! Binary indicator columns for discrete clinical events.

use std::collections::BTreeSet;

use tracing::info;

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::model::{EventMarker, JoinStats, TimelineRow};
use crate::schema::event_column_name;

pub fn join_event_flag(
    rows: &mut [TimelineRow],
    events: &[EventMarker],
    event_code: &str,
    slot: usize,
) -> Result<JoinStats, PipelineError> {
    let mut total = 0u64;
    let mut stamps = BTreeSet::new();
    for marker in events.iter().filter(|e| e.event_code == event_code) {
        total += 1;
        stamps.insert(marker.ts_ms_utc);
    }

    let mut stats = JoinStats {
        column: event_column_name(event_code),
        duplicates_resolved: total - stamps.len() as u64,
        ..JoinStats::default()
    };

    let mut hit = BTreeSet::new();
    for row in rows.iter_mut() {
        let width = row.events.len();
        let flag = row
            .events
            .get_mut(slot)
            .ok_or(PipelineError::ColumnCountMismatch {
                kind: "event",
                ts_ms_utc: row.ts_ms_utc,
                found: width,
                expected: slot + 1,
            })?;
        if stamps.contains(&row.ts_ms_utc) {
            *flag = true;
            stats.matched_rows += 1;
            hit.insert(row.ts_ms_utc);
        } else {
            stats.null_rows += 1;
        }
    }
    stats.orphaned = (stamps.len() - hit.len()) as u64;

    Ok(stats)
}

pub fn join_event_flags(
    rows: &mut [TimelineRow],
    events: &[EventMarker],
    cfg: &PipelineConfig,
) -> Result<Vec<JoinStats>, PipelineError> {
    let mut out = Vec::with_capacity(cfg.event_codes.len());
    for (slot, code) in cfg.event_codes.iter().enumerate() {
        out.push(join_event_flag(rows, events, code, slot)?);
    }

    info!(
        component = "events",
        event = "events.finish",
        event_codes = out.len(),
        flagged_rows = out.iter().map(|s| s.matched_rows).sum::<u64>()
    );

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn marker(ts_ms_utc: i64, code: &str) -> EventMarker {
        EventMarker {
            patient_id: "p1".to_string(),
            ts_ms_utc,
            event_code: code.to_string(),
        }
    }

    #[test]
    fn repeated_markers_set_one_flag_without_duplicating_rows() {
        let mut rows: Vec<TimelineRow> = [1_000, 2_000]
            .iter()
            .map(|ts| TimelineRow::placeholder(*ts, 0, 2))
            .collect();
        let events = vec![
            marker(2_000, "OXYGEN"),
            marker(2_000, "OXYGEN"),
            marker(1_000, "RECOVERY"),
            marker(5_000, "OXYGEN"),
        ];

        let stats = join_event_flag(&mut rows, &events, "OXYGEN", 1).expect("join");

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].events, vec![false, false]);
        assert_eq!(rows[1].events, vec![false, true]);
        assert_eq!(stats.matched_rows, 1);
        assert_eq!(stats.duplicates_resolved, 1);
        assert_eq!(stats.orphaned, 1);
    }

    #[test]
    fn flags_follow_config_order() {
        let mut rows = vec![TimelineRow::placeholder(1_000, 0, 2)];
        let events = vec![marker(1_000, "RECOVERY")];

        let stats = join_event_flags(&mut rows, &events, &PipelineConfig::default()).expect("join");

        assert_eq!(rows[0].events, vec![true, false]);
        assert_eq!(stats[0].column, "evt_recovery");
        assert_eq!(stats[1].matched_rows, 0);
    }
}
