//! Elapsed time since the preceding row.

use std::collections::HashMap;

use tracing::info;

use crate::config::IntervalScope;
use crate::error::PipelineError;
use crate::model::TimelineRow;

const MS_PER_SECOND: f64 = 1_000.0;

// Rows must already be strictly ascending by timestamp.
pub fn compute_intervals(
    rows: &mut [TimelineRow],
    scope: IntervalScope,
) -> Result<(), PipelineError> {
    let mut previous_global: Option<i64> = None;
    let mut previous_by_patient: HashMap<Option<String>, i64> = HashMap::new();

    for row in rows.iter_mut() {
        if let Some(prev) = previous_global {
            if row.ts_ms_utc <= prev {
                return Err(PipelineError::ordering(
                    row.patient_id.as_deref(),
                    row.ts_ms_utc,
                    prev,
                ));
            }
        }

        let predecessor = match scope {
            IntervalScope::Global => previous_global,
            IntervalScope::PerPatient => previous_by_patient
                .insert(row.patient_id.clone(), row.ts_ms_utc),
        };
        row.elapsed_since_prev_s =
            predecessor.map(|prev| (row.ts_ms_utc - prev) as f64 / MS_PER_SECOND);
        previous_global = Some(row.ts_ms_utc);
    }

    info!(
        component = "intervals",
        event = "intervals.finish",
        rows = rows.len(),
        scope = ?scope
    );

    Ok(())
}
