use std::path::PathBuf;

use sedation_episodes::{
    build_bin_schema, build_windowed_schema, init_logging, load_enriched_table, log_run_finish,
    log_run_start, logging_config_from_env, pipeline_config_from_env, OutputStore, RunContext,
};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let logging_cfg = logging_config_from_env();
    init_logging(&logging_cfg)?;

    let pipeline_cfg = pipeline_config_from_env();
    log_run_start("segment_episodes", &logging_cfg, &pipeline_cfg);

    let enriched_path = std::env::var("SEDATION_ENRICHED_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("data/enriched.csv"));
    let store_path = std::env::var("SEDATION_STORE_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("data/sedation.sqlite"));

    let table = load_enriched_table(&enriched_path)?;
    let mut ctx = RunContext::new(pipeline_cfg)?;
    let (windowed, stats) = ctx.segment_and_reduce(&table)?;

    let windowed_schema = build_windowed_schema(ctx.config(), &table.feature_names);
    let bin_schema = build_bin_schema(ctx.config());
    let mut store = OutputStore::open(&store_path)?;
    store.write_windowed(&windowed_schema, &windowed)?;
    store.write_bin_statistics(&bin_schema, &stats)?;

    let failed_units = ctx.report().failed_unit_count();
    log_run_finish("segment_episodes", failed_units, ctx.elapsed_ms());
    println!("{}", serde_json::to_string_pretty(ctx.report())?);

    if failed_units > 0 {
        return Err(format!("{failed_units} unit(s) failed; see report").into());
    }
    Ok(())
}
