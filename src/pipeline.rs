//! Run-scoped orchestration of the two pipeline halves.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::bins::{reduce_bins, BinReport};
use crate::collapse::{collapse_rows, CollapseStats};
use crate::config::{validate_config, PipelineConfig};
use crate::episodes::{index_episodes, EpisodeReport};
use crate::error::PipelineError;
use crate::events::join_event_flags;
use crate::intervals::compute_intervals;
use crate::model::{
    BinStatistic, EnrichedTable, EpisodeRow, JoinStats, SourceTables, TimelineRow, WindowedRow,
};
use crate::observability::log_stage_finish;
use crate::pivot::join_all_signals;
use crate::pool::WorkerPool;
use crate::schema::{build_timeline_schema, TableSchema};
use crate::timeline::{attach_case_identity, build_timeline, IdentityStats};
use crate::windows::{segment_population, SegmentationReport};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimelineReport {
    pub distinct_timestamps: u64,
    pub pump_join: JoinStats,
    pub signal_joins: Vec<JoinStats>,
    pub event_joins: Vec<JoinStats>,
    pub identity: IdentityStats,
    pub collapse: CollapseStats,
    pub output_rows: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineReport {
    pub started_at: String,
    pub timeline: Option<TimelineReport>,
    pub episodes: Option<EpisodeReport>,
    pub segmentation: Option<SegmentationReport>,
    pub bins: Option<BinReport>,
}

impl PipelineReport {
    pub fn failed_unit_count(&self) -> usize {
        self.segmentation
            .as_ref()
            .map(|s| s.failed_units.len())
            .unwrap_or(0)
            + self.bins.as_ref().map(|b| b.failed_units.len()).unwrap_or(0)
    }
}

#[derive(Debug)]
pub struct RunContext {
    config: PipelineConfig,
    pool: WorkerPool,
    started_at: DateTime<Utc>,
    report: PipelineReport,
}

impl RunContext {
    pub fn new(config: PipelineConfig) -> Result<Self, PipelineError> {
        validate_config(&config)?;
        let pool = WorkerPool::new(config.workers)?;
        let started_at = Utc::now();
        Ok(Self {
            config,
            pool,
            started_at,
            report: PipelineReport {
                started_at: started_at.to_rfc3339(),
                ..PipelineReport::default()
            },
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    pub fn report(&self) -> &PipelineReport {
        &self.report
    }

    pub fn into_report(self) -> PipelineReport {
        self.report
    }

    pub fn elapsed_ms(&self) -> i64 {
        (Utc::now() - self.started_at).num_milliseconds()
    }

    pub fn align_timeline(
        &mut self,
        sources: &SourceTables,
    ) -> Result<(TableSchema, Vec<TimelineRow>), PipelineError> {
        let stage_start = Utc::now();
        let cfg = &self.config;
        let schema = build_timeline_schema(cfg);

        let (mut rows, pump_join) = build_timeline(sources, cfg);
        let distinct_timestamps = rows.len() as u64;
        let signal_joins = join_all_signals(&mut rows, &sources.observations, cfg)?;
        let event_joins = join_event_flags(&mut rows, &sources.events, cfg)?;
        let (rows, identity) = attach_case_identity(rows, &sources.cases, cfg);
        let (mut rows, collapse) = collapse_rows(rows);
        compute_intervals(&mut rows, cfg.interval_scope)?;

        log_stage_finish(
            "timeline",
            distinct_timestamps,
            rows.len() as u64,
            (Utc::now() - stage_start).num_milliseconds(),
        );

        self.report.timeline = Some(TimelineReport {
            distinct_timestamps,
            pump_join,
            signal_joins,
            event_joins,
            identity,
            collapse,
            output_rows: rows.len() as u64,
        });

        Ok((schema, rows))
    }

    pub fn build_episodes(
        &mut self,
        rows: &[TimelineRow],
    ) -> Result<Vec<EpisodeRow>, PipelineError> {
        let stage_start = Utc::now();
        let (episodes, report) = index_episodes(rows, self.config.min_episode_len)?;

        log_stage_finish(
            "episodes",
            rows.len() as u64,
            episodes.len() as u64,
            (Utc::now() - stage_start).num_milliseconds(),
        );
        self.report.episodes = Some(report);

        Ok(episodes)
    }

    pub fn segment_and_reduce(
        &mut self,
        table: &EnrichedTable,
    ) -> Result<(Vec<WindowedRow>, Vec<BinStatistic>), PipelineError> {
        let stage_start = Utc::now();
        let (windowed, segmentation) =
            segment_population(&table.rows, &self.config, &self.pool)?;
        log_stage_finish(
            "segment",
            table.rows.len() as u64,
            windowed.len() as u64,
            (Utc::now() - stage_start).num_milliseconds(),
        );

        let stage_start = Utc::now();
        let (stats, bins) = reduce_bins(&windowed, &self.config, &self.pool)?;
        log_stage_finish(
            "bins",
            windowed.len() as u64,
            stats.len() as u64,
            (Utc::now() - stage_start).num_milliseconds(),
        );

        if !segmentation.failed_units.is_empty() || !bins.failed_units.is_empty() {
            info!(
                component = "pipeline",
                event = "pipeline.units.failed",
                segment_failures = segmentation.failed_units.len(),
                bin_failures = bins.failed_units.len()
            );
        }

        self.report.segmentation = Some(segmentation);
        self.report.bins = Some(bins);

        Ok((windowed, stats))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_config_is_rejected_before_any_work() {
        let cfg = PipelineConfig {
            window_size: 0,
            ..PipelineConfig::default()
        };
        assert!(matches!(
            RunContext::new(cfg),
            Err(PipelineError::InvalidConfig(_))
        ));
    }

    #[test]
    fn fresh_context_has_empty_report() {
        let ctx = RunContext::new(PipelineConfig::default()).expect("valid config");
        assert!(ctx.report().timeline.is_none());
        assert_eq!(ctx.report().failed_unit_count(), 0);
        assert_eq!(ctx.pool().workers(), ctx.config().workers);
        assert!(!ctx.report().started_at.is_empty());
    }
}
