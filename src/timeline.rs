//! Timestamp union, pump join and case identity attachment.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::PipelineConfig;
use crate::model::{
    CaseRecord, JoinStats, Lineage, PatientProfile, PumpFields, PumpRecord, SourceTables,
    TimelineRow,
};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityStats {
    pub attributed_by_pump: u64,
    pub attributed_by_case: u64,
    pub unattributed: u64,
    pub case_rows_appended: u64,
}

pub fn build_timeline(
    sources: &SourceTables,
    cfg: &PipelineConfig,
) -> (Vec<TimelineRow>, JoinStats) {
    let mut stamps = BTreeSet::new();
    stamps.extend(sources.events.iter().map(|e| e.ts_ms_utc));
    stamps.extend(sources.observations.iter().map(|o| o.ts_ms_utc));
    stamps.extend(sources.pumps.iter().map(|p| p.ts_ms_utc));
    stamps.extend(sources.cases.iter().map(|c| c.created_ts_ms_utc));

    let (pumps_by_ts, duplicates_resolved) = dedupe_pumps(&sources.pumps);

    let mut stats = JoinStats {
        column: "pump".to_string(),
        duplicates_resolved,
        ..JoinStats::default()
    };

    let rows: Vec<TimelineRow> = stamps
        .into_iter()
        .map(|ts_ms_utc| {
            let mut row = TimelineRow::placeholder(
                ts_ms_utc,
                cfg.signal_codes.len(),
                cfg.event_codes.len(),
            );
            match pumps_by_ts.get(&ts_ms_utc) {
                Some(pump) => {
                    row.patient_id = Some(pump.patient_id.clone());
                    row.pump = Some(PumpFields {
                        elapsed_since_prior_s: pump.elapsed_since_prior_s,
                        dosage: pump.dosage,
                        dosage_rate: pump.dosage_rate,
                    });
                    stats.matched_rows += 1;
                }
                None => stats.null_rows += 1,
            }
            row
        })
        .collect();

    info!(
        component = "timeline",
        event = "timeline.build.finish",
        timestamps = rows.len(),
        pump_matched = stats.matched_rows,
        pump_duplicates_resolved = stats.duplicates_resolved
    );

    (rows, stats)
}

// Pump identity first, then the latest case created at or before the row.
pub fn attach_case_identity(
    mut rows: Vec<TimelineRow>,
    cases: &[CaseRecord],
    cfg: &PipelineConfig,
) -> (Vec<TimelineRow>, IdentityStats) {
    let mut ordered_cases: Vec<&CaseRecord> = cases.iter().collect();
    ordered_cases.sort_by(|a, b| {
        a.created_ts_ms_utc
            .cmp(&b.created_ts_ms_utc)
            .then_with(|| a.patient_id.cmp(&b.patient_id))
    });

    // Latest case wins when a patient was registered more than once.
    let profiles: HashMap<&str, PatientProfile> = ordered_cases
        .iter()
        .map(|c| (c.patient_id.as_str(), c.profile))
        .collect();

    rows.sort_by_key(|r| (r.ts_ms_utc, r.lineage));

    let mut stats = IdentityStats::default();
    let mut cursor = 0;
    let mut active_case: Option<&CaseRecord> = None;

    for row in rows.iter_mut() {
        while cursor < ordered_cases.len() && ordered_cases[cursor].created_ts_ms_utc <= row.ts_ms_utc
        {
            active_case = Some(ordered_cases[cursor]);
            cursor += 1;
        }

        if row.patient_id.is_some() {
            stats.attributed_by_pump += 1;
        } else if let Some(case) = active_case {
            row.patient_id = Some(case.patient_id.clone());
            stats.attributed_by_case += 1;
        } else {
            stats.unattributed += 1;
        }

        if let Some(patient_id) = row.patient_id.as_deref() {
            row.profile = profiles.get(patient_id).copied();
        }
    }

    for case in &ordered_cases {
        let mut row = TimelineRow::placeholder(
            case.created_ts_ms_utc,
            cfg.signal_codes.len(),
            cfg.event_codes.len(),
        );
        row.patient_id = Some(case.patient_id.clone());
        row.lineage = Lineage::Case;
        row.profile = Some(case.profile);
        rows.push(row);
        stats.case_rows_appended += 1;
    }

    rows.sort_by_key(|r| (r.ts_ms_utc, r.lineage));

    info!(
        component = "timeline",
        event = "timeline.identity.finish",
        attributed_by_pump = stats.attributed_by_pump,
        attributed_by_case = stats.attributed_by_case,
        unattributed = stats.unattributed,
        case_rows_appended = stats.case_rows_appended
    );

    (rows, stats)
}

// One pump record per timestamp; the lowest patient id wins, then the first in input order.
fn dedupe_pumps(pumps: &[PumpRecord]) -> (BTreeMap<i64, &PumpRecord>, u64) {
    let mut ordered: Vec<&PumpRecord> = pumps.iter().collect();
    ordered.sort_by(|a, b| {
        a.ts_ms_utc
            .cmp(&b.ts_ms_utc)
            .then_with(|| a.patient_id.cmp(&b.patient_id))
    });

    let mut by_ts = BTreeMap::new();
    let mut duplicates = 0u64;
    for pump in ordered {
        if by_ts.contains_key(&pump.ts_ms_utc) {
            duplicates += 1;
        } else {
            by_ts.insert(pump.ts_ms_utc, pump);
        }
    }
    (by_ts, duplicates)
}
