//! Fixed-size window segmentation of enriched episodes.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::model::{EnrichedRow, WindowedRow};
use crate::pool::{UnitFailure, WorkerPool};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentationReport {
    pub patients: u64,
    pub input_rows: u64,
    pub output_rows: u64,
    pub full_windows: u64,
    pub partial_windows: u64,
    pub failed_units: Vec<UnitFailure>,
}

// Every row appears exactly once. Full windows take the state of their last row;
// the final 1..=window_size rows stay unlabelled.
pub fn segment_episode(
    rows: &[EnrichedRow],
    window_size: usize,
) -> Result<Vec<WindowedRow>, PipelineError> {
    if window_size == 0 {
        return Err(PipelineError::InvalidConfig(
            "window_size must be > 0".to_string(),
        ));
    }
    let n = rows.len();
    if n == 0 {
        return Ok(Vec::new());
    }

    for pair in rows.windows(2) {
        if pair[1].ts_ms_utc <= pair[0].ts_ms_utc {
            return Err(PipelineError::ordering(
                Some(&pair[1].patient_id),
                pair[1].ts_ms_utc,
                pair[0].ts_ms_utc,
            ));
        }
    }

    let full_windows = (n - 1) / window_size;
    let labels = (0..full_windows)
        .map(|w| {
            let representative = &rows[(w + 1) * window_size - 1];
            match representative.state {
                Some(v) if !v.is_finite() => Err(PipelineError::NonFiniteValue {
                    column: "state",
                    unit: format!(
                        "patient {} at {}",
                        representative.patient_id, representative.ts_ms_utc
                    ),
                }),
                other => Ok(other),
            }
        })
        .collect::<Result<Vec<Option<f64>>, PipelineError>>()?;

    let out = rows
        .iter()
        .enumerate()
        .map(|(idx, row)| {
            let window = idx / window_size;
            let last_in_window = if window < full_windows {
                (window + 1) * window_size - 1
            } else {
                n - 1
            };
            WindowedRow {
                window_index: window as u32,
                bstate: labels.get(window).copied().flatten(),
                remaining_steps: (n - idx - 1) as u32,
                terminal: idx == last_in_window,
                row: row.clone(),
            }
        })
        .collect();

    Ok(out)
}

pub fn segment_population(
    rows: &[EnrichedRow],
    cfg: &PipelineConfig,
    pool: &WorkerPool,
) -> Result<(Vec<WindowedRow>, SegmentationReport), PipelineError> {
    let mut by_patient: BTreeMap<&str, Vec<EnrichedRow>> = BTreeMap::new();
    for row in rows {
        by_patient
            .entry(row.patient_id.as_str())
            .or_default()
            .push(row.clone());
    }
    let episodes: Vec<(&str, Vec<EnrichedRow>)> = by_patient.into_iter().collect();

    let outcome = pool.map_partitions(
        "segment",
        &episodes,
        |(patient_id, _)| (*patient_id).to_string(),
        |(_, episode)| segment_episode(episode, cfg.window_size),
    )?;

    let mut report = SegmentationReport {
        patients: episodes.len() as u64,
        input_rows: rows.len() as u64,
        failed_units: outcome.failures,
        ..SegmentationReport::default()
    };

    let mut out = Vec::with_capacity(rows.len());
    for windowed in outcome.results {
        let windows = windowed.iter().filter(|r| r.terminal).count() as u64;
        if windows > 0 {
            report.full_windows += windows - 1;
            report.partial_windows += 1;
        }
        out.extend(windowed);
    }
    report.output_rows = out.len() as u64;

    info!(
        component = "segment",
        event = "segment.finish",
        patients = report.patients,
        input_rows = report.input_rows,
        output_rows = report.output_rows,
        full_windows = report.full_windows,
        partial_windows = report.partial_windows,
        failed_units = report.failed_units.len()
    );

    Ok((out, report))
}
