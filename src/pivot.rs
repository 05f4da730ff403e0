//! Signal pivot: one value column per monitored signal code.

use std::collections::BTreeMap;

use tracing::{debug, info};

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::model::{JoinStats, Observation, TimelineRow};
use crate::schema::signal_column_name;

// Timestamp is the only join key.
pub fn join_signal(
    rows: &mut [TimelineRow],
    observations: &[Observation],
    signal_code: &str,
    slot: usize,
) -> Result<JoinStats, PipelineError> {
    let mut candidates: Vec<&Observation> = observations
        .iter()
        .filter(|o| o.signal_code == signal_code)
        .collect();
    candidates.sort_by(|a, b| {
        a.ts_ms_utc
            .cmp(&b.ts_ms_utc)
            .then_with(|| a.patient_id.cmp(&b.patient_id))
            .then_with(|| a.signal_code.cmp(&b.signal_code))
            .then_with(|| a.value.total_cmp(&b.value))
    });

    let mut chosen: BTreeMap<i64, f64> = BTreeMap::new();
    let mut stats = JoinStats {
        column: signal_column_name(signal_code),
        ..JoinStats::default()
    };
    for obs in candidates {
        if chosen.contains_key(&obs.ts_ms_utc) {
            stats.duplicates_resolved += 1;
        } else {
            chosen.insert(obs.ts_ms_utc, obs.value);
        }
    }

    let mut seen = 0u64;
    let mut last_ts = None;
    for row in rows.iter_mut() {
        let width = row.signals.len();
        let slot_ref = row
            .signals
            .get_mut(slot)
            .ok_or(PipelineError::ColumnCountMismatch {
                kind: "signal",
                ts_ms_utc: row.ts_ms_utc,
                found: width,
                expected: slot + 1,
            })?;
        match chosen.get(&row.ts_ms_utc) {
            Some(value) => {
                *slot_ref = Some(*value);
                stats.matched_rows += 1;
                if last_ts != Some(row.ts_ms_utc) {
                    seen += 1;
                }
            }
            None => stats.null_rows += 1,
        }
        last_ts = Some(row.ts_ms_utc);
    }
    stats.orphaned = (chosen.len() as u64).saturating_sub(seen);

    debug!(
        component = "pivot",
        event = "pivot.signal.joined",
        signal_code,
        matched_rows = stats.matched_rows,
        null_rows = stats.null_rows,
        duplicates_resolved = stats.duplicates_resolved,
        orphaned = stats.orphaned
    );

    Ok(stats)
}

pub fn join_all_signals(
    rows: &mut [TimelineRow],
    observations: &[Observation],
    cfg: &PipelineConfig,
) -> Result<Vec<JoinStats>, PipelineError> {
    let mut out = Vec::with_capacity(cfg.signal_codes.len());
    for (slot, code) in cfg.signal_codes.iter().enumerate() {
        out.push(join_signal(rows, observations, code, slot)?);
    }

    info!(
        component = "pivot",
        event = "pivot.finish",
        signals = out.len(),
        duplicates_resolved = out.iter().map(|s| s.duplicates_resolved).sum::<u64>()
    );

    Ok(out)
}
