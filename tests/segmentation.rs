use std::fs;

use sedation_episodes::{
    build_bin_schema, build_windowed_schema, load_enriched_table, reduce_bins, segment_population,
    BinStatus, EnrichedRow, EnrichedTable, OutputStore, PipelineConfig, PipelineError, RunContext,
    WorkerPool,
};
use tempfile::tempdir;

fn episode(patient_id: &str, len: usize, start_ts: i64) -> Vec<EnrichedRow> {
    (0..len)
        .map(|i| EnrichedRow {
            patient_id: patient_id.to_string(),
            ts_ms_utc: start_ts + i as i64 * 5_000,
            position: Some(i as i64 + 1),
            state: Some(30.0 + (i % 51) as f64),
            action: Some(if i % 2 == 0 { 1.0 } else { 3.0 }),
            outcome: Some(0.5),
            features: vec![Some(i as f64)],
        })
        .collect()
}

fn config(workers: usize) -> PipelineConfig {
    PipelineConfig {
        workers,
        ..PipelineConfig::default()
    }
}

fn defaults() -> PipelineConfig {
    PipelineConfig::default()
}

fn pool(workers: usize) -> WorkerPool {
    WorkerPool::new(workers).expect("pool")
}

fn mixed_population() -> Vec<EnrichedRow> {
    let mut rows = Vec::new();
    for (idx, len) in [1usize, 299, 300, 301, 650, 1_000].iter().enumerate() {
        rows.extend(episode(&format!("p{idx}"), *len, 1_000_000 * idx as i64));
    }
    rows
}

#[test]
fn every_row_is_kept_once_per_patient() {
    let rows = mixed_population();
    let (windowed, report) =
        segment_population(&rows, &defaults(), &pool(3))
            .expect("segment");

    assert_eq!(windowed.len(), rows.len());
    assert_eq!(report.input_rows, report.output_rows);
    for (input, output) in rows.iter().zip(&windowed) {
        assert_eq!(&output.row, input);
    }
    // 1 -> 0 full, 299 -> 0, 300 -> 0, 301 -> 1, 650 -> 2, 1000 -> 3
    assert_eq!(report.full_windows, 6);
    assert_eq!(report.partial_windows, 6);
    assert!(report.failed_units.is_empty());
}

#[test]
fn exactly_window_size_rows_stay_unlabelled_and_one_more_labels_them() {
    let (at_size, _) =
        segment_population(&episode("a", 300, 0), &defaults(), &pool(1))
            .expect("segment");
    assert!(at_size.iter().all(|w| w.bstate.is_none() && w.window_index == 0));

    let (one_more, _) =
        segment_population(&episode("b", 301, 0), &defaults(), &pool(1))
            .expect("segment");
    let label = one_more[299].row.state;
    assert!(label.is_some());
    assert!(one_more[..300].iter().all(|w| w.bstate == label));
    assert_eq!(one_more[300].bstate, None);
    assert_eq!(one_more[300].window_index, 1);
    assert_eq!(one_more[0].remaining_steps, 300);
    assert_eq!(one_more[300].remaining_steps, 0);
    assert!(one_more[299].terminal && one_more[300].terminal);
}

#[test]
fn worker_count_does_not_change_results() {
    let rows = mixed_population();

    let (serial, serial_report) =
        segment_population(&rows, &defaults(), &pool(1))
            .expect("segment");
    let (parallel, parallel_report) =
        segment_population(&rows, &defaults(), &pool(8))
            .expect("segment");
    assert_eq!(serial, parallel);
    assert_eq!(serial_report, parallel_report);

    let (serial_bins, _) =
        reduce_bins(&serial, &defaults(), &pool(1))
            .expect("bins");
    let (parallel_bins, _) =
        reduce_bins(&parallel, &defaults(), &pool(8))
            .expect("bins");
    assert_eq!(serial_bins, parallel_bins);
}

#[test]
fn single_label_bin_matches_closed_form() {
    let mut rows = episode("p1", 301, 0);
    rows[299].state = Some(50.0);

    let mut ctx = RunContext::new(config(2)).expect("valid config");
    let table = EnrichedTable {
        feature_names: vec!["bis".to_string()],
        rows,
    };
    let (_, stats) = ctx.segment_and_reduce(&table).expect("run");

    // One row per label in 30..=80, ascending.
    assert_eq!(stats.len(), 51);
    assert!(stats.windows(2).all(|p| p[0].bin_value < p[1].bin_value));

    let bin = stats.iter().find(|s| s.bin_value == 50).expect("bin 50");
    assert_eq!(bin.status, BinStatus::Populated);
    assert_eq!(bin.observation_count, 300);

    // 150 ones and 150 threes: every deviation from the mean is 1.
    let expected_sd = (300.0_f64 / 299.0).sqrt();
    assert_eq!(bin.action_mean, Some(2.0));
    assert!((bin.action_sd.expect("sd") - expected_sd).abs() < 1e-12);
    assert_eq!(bin.outcome_mean, Some(0.5));
    assert_eq!(bin.outcome_sd, Some(0.0));
    assert_eq!(bin.diff_mean, Some(1.5));
    assert!((bin.diff_sd.expect("sd") - expected_sd).abs() < 1e-12);

    let report = ctx.report().bins.as_ref().expect("bin report");
    assert_eq!(report.populated_bins, 1);
    assert_eq!(report.empty_bins.len(), 50);
    assert_eq!(report.rows_in_range, 300);
}

#[test]
fn empty_bins_are_reported_explicitly() {
    let (windowed, _) =
        segment_population(&episode("p1", 120, 0), &defaults(), &pool(1))
            .expect("segment");
    let (stats, report) =
        reduce_bins(&windowed, &defaults(), &pool(1))
            .expect("bins");

    assert_eq!(stats.len(), 51);
    assert!(stats.iter().all(|s| s.status == BinStatus::Empty));
    assert!(stats.iter().all(|s| s.observation_count == 0 && s.action_mean.is_none()));
    assert_eq!(report.empty_bins, (30..=80).collect::<Vec<i64>>());
}

#[test]
fn non_finite_label_fails_only_its_patient() {
    let mut rows = episode("bad", 301, 0);
    rows[299].state = Some(f64::NAN);
    rows.extend(episode("good", 301, 10_000_000));

    let mut ctx = RunContext::new(config(4)).expect("valid config");
    let table = EnrichedTable {
        feature_names: vec!["bis".to_string()],
        rows,
    };
    let (windowed, _) = ctx.segment_and_reduce(&table).expect("run");

    assert_eq!(windowed.len(), 301);
    assert!(windowed.iter().all(|w| w.row.patient_id == "good"));
    let report = ctx.report();
    assert_eq!(report.failed_unit_count(), 1);
    let failure = &report.segmentation.as_ref().expect("segmentation").failed_units[0];
    assert_eq!(failure.stage, "segment");
    assert_eq!(failure.unit, "bad");
}

#[test]
fn unordered_episode_aborts_the_stage() {
    let mut rows = episode("p1", 10, 0);
    rows.swap(3, 4);
    rows.extend(episode("p2", 10, 1_000_000));

    let err =
        segment_population(&rows, &defaults(), &pool(2))
            .expect_err("ordering violation");
    assert!(matches!(err, PipelineError::OrderingViolation { .. }));
    assert!(err.is_fatal());
}

#[test]
fn enriched_csv_flows_into_stored_bin_statistics() {
    let dir = tempdir().expect("temp dir");
    let csv_path = dir.path().join("enriched.csv");

    let mut body = String::from("patient_id,ts_ms_utc,position,state,bis,action,outcome\n");
    for i in 0..301 {
        let state = if i == 299 { "42".to_string() } else { format!("{}", 40 + i % 5) };
        let action = if i % 10 == 0 { "" } else { "2.5" };
        body.push_str(&format!("p1,{},{},{},{},{},1.0\n", i * 5_000, i + 1, state, 45.0, action));
    }
    fs::write(&csv_path, body).expect("write csv");

    let table = load_enriched_table(&csv_path).expect("load");
    assert_eq!(table.feature_names, vec!["bis".to_string()]);
    assert_eq!(table.rows.len(), 301);
    assert_eq!(table.rows[0].action, None);

    let mut ctx = RunContext::new(config(2)).expect("valid config");
    let (windowed, stats) = ctx.segment_and_reduce(&table).expect("run");

    let bin = stats.iter().find(|s| s.bin_value == 42).expect("bin 42");
    assert_eq!(bin.observation_count, 300);
    assert_eq!(bin.action_mean, Some(2.5));
    assert_eq!(bin.action_sd, Some(0.0));
    assert_eq!(bin.outcome_mean, Some(1.0));
    assert_eq!(bin.diff_mean, Some(1.5));

    let mut store = OutputStore::open_in_memory().expect("store");
    let windowed_schema = build_windowed_schema(ctx.config(), &table.feature_names);
    store
        .write_windowed(&windowed_schema, &windowed)
        .expect("write windowed");
    store
        .write_bin_statistics(&build_bin_schema(ctx.config()), &stats)
        .expect("write bins");

    assert_eq!(store.row_count("windowed_rows").expect("count"), 301);
    assert_eq!(store.read_bin_statistics().expect("read"), stats);
}
