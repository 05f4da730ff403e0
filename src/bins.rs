//! Per-label summary statistics over windowed rows.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::model::{BinStatistic, BinStatus, WindowedRow};
use crate::pool::{UnitFailure, WorkerPool};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BinReport {
    pub bins_total: u64,
    pub populated_bins: u64,
    pub empty_bins: Vec<i64>,
    pub rows_in_range: u64,
    pub failed_units: Vec<UnitFailure>,
}

// Every label in range yields a row, empty ones included.
pub fn reduce_bins(
    rows: &[WindowedRow],
    cfg: &PipelineConfig,
    pool: &WorkerPool,
) -> Result<(Vec<BinStatistic>, BinReport), PipelineError> {
    let (lo, hi) = cfg.bin_range;
    let in_range: Vec<&WindowedRow> = rows
        .iter()
        .filter(|r| matches!(r.bstate, Some(label) if label >= lo as f64 && label <= hi as f64))
        .collect();
    let bins: Vec<i64> = (lo..=hi).collect();

    let outcome = pool.map_partitions(
        "bins",
        &bins,
        |bin| format!("bin {bin}"),
        |bin| reduce_bin(*bin, &in_range),
    )?;

    let mut stats = outcome.results;
    stats.sort_by_key(|s| s.bin_value);

    let empty_bins: Vec<i64> = stats
        .iter()
        .filter(|s| s.status == BinStatus::Empty)
        .map(|s| s.bin_value)
        .collect();
    if !empty_bins.is_empty() {
        warn!(
            component = "bins",
            event = "bins.empty",
            empty_bins = ?empty_bins
        );
    }

    let report = BinReport {
        bins_total: bins.len() as u64,
        populated_bins: (stats.len() - empty_bins.len()) as u64,
        empty_bins,
        rows_in_range: in_range.len() as u64,
        failed_units: outcome.failures,
    };

    info!(
        component = "bins",
        event = "bins.finish",
        bins_total = report.bins_total,
        populated_bins = report.populated_bins,
        empty_bins = report.empty_bins.len(),
        rows_in_range = report.rows_in_range,
        failed_units = report.failed_units.len()
    );

    Ok((stats, report))
}

pub fn reduce_bin(bin_value: i64, rows: &[&WindowedRow]) -> Result<BinStatistic, PipelineError> {
    let label = bin_value as f64;
    let mut count = 0u64;
    let mut actions = Vec::new();
    let mut outcomes = Vec::new();
    let mut diffs = Vec::new();

    for row in rows.iter().filter(|r| r.bstate == Some(label)) {
        count += 1;
        let action = finite(row.row.action, "action", bin_value)?;
        let outcome = finite(row.row.outcome, "outcome", bin_value)?;
        if let Some(a) = action {
            actions.push(a);
        }
        if let Some(o) = outcome {
            outcomes.push(o);
        }
        if let (Some(a), Some(o)) = (action, outcome) {
            diffs.push(a - o);
        }
    }

    let (action_mean, action_sd) = mean_and_sd(&actions);
    let (outcome_mean, outcome_sd) = mean_and_sd(&outcomes);
    let (diff_mean, diff_sd) = mean_and_sd(&diffs);
    let status = if count == 0 {
        BinStatus::Empty
    } else {
        BinStatus::Populated
    };

    debug!(
        component = "bins",
        event = "bins.unit.reduced",
        bin_value,
        observation_count = count,
        status = status.as_str()
    );

    Ok(BinStatistic {
        bin_value,
        action_mean,
        action_sd,
        outcome_mean,
        outcome_sd,
        diff_mean,
        diff_sd,
        observation_count: count,
        status,
    })
}

// Sample standard deviation (n - 1).
pub fn mean_and_sd(values: &[f64]) -> (Option<f64>, Option<f64>) {
    if values.is_empty() {
        return (None, None);
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    if values.len() < 2 {
        return (Some(mean), None);
    }
    let variance = values
        .iter()
        .map(|v| {
            let d = *v - mean;
            d * d
        })
        .sum::<f64>()
        / (n - 1.0);
    (Some(mean), Some(variance.sqrt()))
}

fn finite(
    value: Option<f64>,
    column: &'static str,
    bin_value: i64,
) -> Result<Option<f64>, PipelineError> {
    match value {
        Some(v) if !v.is_finite() => Err(PipelineError::NonFiniteValue {
            column,
            unit: format!("bin {bin_value}"),
        }),
        other => Ok(other),
    }
}
