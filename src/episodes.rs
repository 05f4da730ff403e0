//! Per-patient step indexing and the minimum-length attrition filter.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::PipelineError;
use crate::model::{EpisodeRow, TimelineRow};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DroppedEpisode {
    pub patient_id: String,
    pub episode_len: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpisodeReport {
    pub patients_total: u64,
    pub patients_retained: u64,
    pub rows_retained: u64,
    pub unattributed_rows: u64,
    pub dropped: Vec<DroppedEpisode>,
}

pub fn index_episodes(
    rows: &[TimelineRow],
    min_episode_len: u32,
) -> Result<(Vec<EpisodeRow>, EpisodeReport), PipelineError> {
    let mut report = EpisodeReport::default();
    let mut by_patient: BTreeMap<&str, Vec<&TimelineRow>> = BTreeMap::new();
    for row in rows {
        match row.patient_id.as_deref() {
            Some(patient_id) => by_patient.entry(patient_id).or_default().push(row),
            None => report.unattributed_rows += 1,
        }
    }
    report.patients_total = by_patient.len() as u64;

    let mut out = Vec::new();
    for (patient_id, mut patient_rows) in by_patient {
        patient_rows.sort_by_key(|r| r.ts_ms_utc);
        for pair in patient_rows.windows(2) {
            if pair[1].ts_ms_utc <= pair[0].ts_ms_utc {
                return Err(PipelineError::ordering(
                    Some(patient_id),
                    pair[1].ts_ms_utc,
                    pair[0].ts_ms_utc,
                ));
            }
        }

        let episode_len = patient_rows.len() as u32;
        if episode_len <= min_episode_len {
            debug!(
                component = "episodes",
                event = "episodes.patient.dropped",
                patient_id,
                episode_len,
                min_episode_len
            );
            report.dropped.push(DroppedEpisode {
                patient_id: patient_id.to_string(),
                episode_len,
            });
            continue;
        }

        report.patients_retained += 1;
        out.extend(patient_rows.into_iter().enumerate().map(|(idx, row)| EpisodeRow {
            patient_id: patient_id.to_string(),
            step: idx as u32 + 1,
            episode_len,
            row: row.clone(),
        }));
    }
    report.rows_retained = out.len() as u64;

    info!(
        component = "episodes",
        event = "episodes.filter.finish",
        patients_total = report.patients_total,
        patients_retained = report.patients_retained,
        patients_dropped = report.dropped.len(),
        rows_retained = report.rows_retained,
        unattributed_rows = report.unattributed_rows
    );

    Ok((out, report))
}
