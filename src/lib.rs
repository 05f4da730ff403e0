//! Sedation episode dataset construction.
//!
//! Current implemented scope:
//! - timeline alignment: timestamp union, signal pivot, event flags, case identity,
//!   natural-key collapse and inter-row intervals
//! - episode indexing with the minimum-length attrition filter
//! - fixed-window segmentation of enriched episodes and per-bin statistics
//! - CSV source loading and SQLite output tables

mod bins;
mod collapse;
mod config;
mod episodes;
mod error;
mod events;
mod intervals;
mod model;
mod observability;
mod pipeline;
mod pivot;
mod pool;
mod schema;
mod store;
mod timeline;
mod windows;

pub use bins::{mean_and_sd, reduce_bin, reduce_bins, BinReport};
pub use collapse::{collapse_rows, CollapseStats};
pub use config::{
    pipeline_config_from_env, validate_config, IntervalScope, PipelineConfig,
    DEFAULT_BIN_RANGE, DEFAULT_EVENT_CODES, DEFAULT_MIN_EPISODE_LEN, DEFAULT_SIGNAL_CODES,
    DEFAULT_WINDOW_SIZE,
};
pub use episodes::{index_episodes, DroppedEpisode, EpisodeReport};
pub use error::{PipelineError, UNATTRIBUTED};
pub use events::{join_event_flag, join_event_flags};
pub use intervals::compute_intervals;
pub use model::{
    BinStatistic, BinStatus, CaseRecord, EnrichedRow, EnrichedTable, EpisodeRow, EventMarker,
    JoinStats, Lineage, Observation, PatientProfile, PumpFields, PumpRecord, SourceTables,
    TimelineRow, WindowedRow,
};
pub use observability::{
    init_logging, log_run_finish, log_run_start, log_stage_finish, logging_config_from_env,
    LogFormat, LoggingConfig, LoggingInitError,
};
pub use pipeline::{PipelineReport, RunContext, TimelineReport};
pub use pivot::{join_all_signals, join_signal};
pub use pool::{PartitionOutcome, UnitFailure, WorkerPool};
pub use schema::{
    assert_schema_compatible, build_bin_schema, build_episode_schema, build_timeline_schema,
    build_windowed_schema, ColumnSpec, ColumnType, SchemaError, TableSchema,
    TABLE_SCHEMA_VERSION,
};
pub use store::{
    load_enriched_table, load_source_tables, parse_timestamp_ms, OutputStore, StoreError,
    CASES_FILE, EVENTS_FILE, OBSERVATIONS_FILE, PUMPS_FILE,
};
pub use timeline::{attach_case_identity, build_timeline, IdentityStats};
pub use windows::{segment_episode, segment_population, SegmentationReport};
