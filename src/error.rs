//! Errors raised by the pipeline stages.

use thiserror::Error;

pub const UNATTRIBUTED: &str = "<unattributed>";

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("invalid pipeline config: {0}")]
    InvalidConfig(String),
    #[error(
        "ordering violation for patient {patient_id}: timestamp {ts_ms_utc} does not follow {previous_ts_ms_utc}"
    )]
    OrderingViolation {
        patient_id: String,
        ts_ms_utc: i64,
        previous_ts_ms_utc: i64,
    },
    #[error("row at {ts_ms_utc} has {found} {kind} columns, expected {expected}")]
    ColumnCountMismatch {
        kind: &'static str,
        ts_ms_utc: i64,
        found: usize,
        expected: usize,
    },
    #[error("non-finite {column} value for {unit}")]
    NonFiniteValue { column: &'static str, unit: String },
    #[error("worker pool could not be built: {0}")]
    WorkerPool(String),
}

impl PipelineError {
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::InvalidConfig(_)
                | Self::OrderingViolation { .. }
                | Self::ColumnCountMismatch { .. }
                | Self::WorkerPool(_)
        )
    }

    pub(crate) fn ordering(
        patient_id: Option<&str>,
        ts_ms_utc: i64,
        previous_ts_ms_utc: i64,
    ) -> Self {
        Self::OrderingViolation {
            patient_id: patient_id.unwrap_or(UNATTRIBUTED).to_string(),
            ts_ms_utc,
            previous_ts_ms_utc,
        }
    }
}
