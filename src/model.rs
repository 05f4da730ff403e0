//! Row types shared by every pipeline stage.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub patient_id: String,
    pub ts_ms_utc: i64,
    pub signal_code: String,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PumpRecord {
    pub patient_id: String,
    pub ts_ms_utc: i64,
    pub elapsed_since_prior_s: Option<f64>,
    pub dosage: Option<f64>,
    pub dosage_rate: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventMarker {
    pub patient_id: String,
    pub ts_ms_utc: i64,
    pub event_code: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PatientProfile {
    pub sex: u8,
    pub age: f64,
    pub height: f64,
    pub weight: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseRecord {
    pub patient_id: String,
    pub created_ts_ms_utc: i64,
    pub profile: PatientProfile,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceTables {
    pub observations: Vec<Observation>,
    pub pumps: Vec<PumpRecord>,
    pub events: Vec<EventMarker>,
    pub cases: Vec<CaseRecord>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PumpFields {
    pub elapsed_since_prior_s: Option<f64>,
    pub dosage: Option<f64>,
    pub dosage_rate: Option<f64>,
}

impl PumpFields {
    fn non_null_count(&self) -> usize {
        [self.elapsed_since_prior_s, self.dosage, self.dosage_rate]
            .iter()
            .filter(|v| v.is_some())
            .count()
    }
}

// Declaration order breaks collapse ties.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Lineage {
    Timeline,
    Case,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineRow {
    pub patient_id: Option<String>,
    pub ts_ms_utc: i64,
    pub lineage: Lineage,
    pub pump: Option<PumpFields>,
    pub signals: Vec<Option<f64>>,
    pub events: Vec<bool>,
    pub profile: Option<PatientProfile>,
    pub elapsed_since_prev_s: Option<f64>,
}

impl TimelineRow {
    pub fn placeholder(ts_ms_utc: i64, signal_count: usize, event_count: usize) -> Self {
        Self {
            patient_id: None,
            ts_ms_utc,
            lineage: Lineage::Timeline,
            pump: None,
            signals: vec![None; signal_count],
            events: vec![false; event_count],
            profile: None,
            elapsed_since_prev_s: None,
        }
    }

    pub fn derived_non_null_count(&self) -> usize {
        let pump = self.pump.map(|p| p.non_null_count()).unwrap_or(0);
        let signals = self.signals.iter().filter(|v| v.is_some()).count();
        let events = self.events.iter().filter(|flag| **flag).count();
        let profile = if self.profile.is_some() { 4 } else { 0 };
        pump + signals + events + profile
    }

    pub fn is_empty(&self) -> bool {
        self.derived_non_null_count() == 0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpisodeRow {
    pub patient_id: String,
    pub step: u32,
    pub episode_len: u32,
    pub row: TimelineRow,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedRow {
    pub patient_id: String,
    pub ts_ms_utc: i64,
    pub position: Option<i64>,
    pub state: Option<f64>,
    pub action: Option<f64>,
    pub outcome: Option<f64>,
    pub features: Vec<Option<f64>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnrichedTable {
    pub feature_names: Vec<String>,
    pub rows: Vec<EnrichedRow>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowedRow {
    pub window_index: u32,
    // None for the final partial window.
    pub bstate: Option<f64>,
    pub remaining_steps: u32,
    pub terminal: bool,
    pub row: EnrichedRow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinStatus {
    Populated,
    Empty,
}

impl BinStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Populated => "populated",
            Self::Empty => "empty",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BinStatistic {
    pub bin_value: i64,
    pub action_mean: Option<f64>,
    pub action_sd: Option<f64>,
    pub outcome_mean: Option<f64>,
    pub outcome_sd: Option<f64>,
    pub diff_mean: Option<f64>,
    pub diff_sd: Option<f64>,
    pub observation_count: u64,
    pub status: BinStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinStats {
    pub column: String,
    pub matched_rows: u64,
    pub null_rows: u64,
    pub duplicates_resolved: u64,
    pub orphaned: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derived_count_ignores_identity_and_interval() {
        let mut row = TimelineRow::placeholder(1_000, 2, 1);
        row.patient_id = Some("p1".to_string());
        row.elapsed_since_prev_s = Some(3.0);
        assert!(row.is_empty());

        row.signals[1] = Some(97.0);
        row.events[0] = true;
        row.pump = Some(PumpFields {
            elapsed_since_prior_s: None,
            dosage: Some(2.0),
            dosage_rate: Some(0.5),
        });
        assert_eq!(row.derived_non_null_count(), 4);

        row.profile = Some(PatientProfile {
            sex: 1,
            age: 54.0,
            height: 170.0,
            weight: 70.0,
        });
        assert_eq!(row.derived_non_null_count(), 8);
    }

    #[test]
    fn timeline_lineage_sorts_before_case_lineage() {
        assert!(Lineage::Timeline < Lineage::Case);
    }
}
