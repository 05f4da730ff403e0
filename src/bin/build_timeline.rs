use std::path::PathBuf;

use sedation_episodes::{
    build_episode_schema, init_logging, load_source_tables, log_run_finish, log_run_start,
    logging_config_from_env, pipeline_config_from_env, OutputStore, RunContext,
};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let logging_cfg = logging_config_from_env();
    init_logging(&logging_cfg)?;

    let pipeline_cfg = pipeline_config_from_env();
    log_run_start("build_timeline", &logging_cfg, &pipeline_cfg);

    let source_dir = std::env::var("SEDATION_SOURCE_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("data/sources"));
    let store_path = std::env::var("SEDATION_STORE_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("data/sedation.sqlite"));

    let sources = load_source_tables(&source_dir)?;
    let mut ctx = RunContext::new(pipeline_cfg)?;

    let (timeline_schema, timeline) = ctx.align_timeline(&sources)?;
    let episodes = ctx.build_episodes(&timeline)?;
    let episode_schema = build_episode_schema(ctx.config());

    let mut store = OutputStore::open(&store_path)?;
    store.write_timeline(&timeline_schema, &timeline)?;
    store.write_episodes(&episode_schema, &episodes)?;

    log_run_finish("build_timeline", 0, ctx.elapsed_ms());
    println!("{}", serde_json::to_string_pretty(ctx.report())?);
    Ok(())
}
