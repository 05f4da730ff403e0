//! Versioned column sets of the persisted output tables.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::info;

use crate::config::PipelineConfig;

pub const TABLE_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnType {
    Text,
    Integer,
    Real,
}

impl ColumnType {
    pub fn sql_type(self) -> &'static str {
        match self {
            Self::Text => "TEXT",
            Self::Integer => "INTEGER",
            Self::Real => "REAL",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub name: String,
    pub dtype: ColumnType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    pub table: String,
    pub version: u32,
    pub fingerprint: String,
    pub columns: Vec<ColumnSpec>,
}

impl TableSchema {
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }
}

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("schema version mismatch for {table}: expected {expected}, got {actual}")]
    VersionMismatch {
        table: String,
        expected: u32,
        actual: u32,
    },
    #[error("schema fingerprint mismatch for {table}: expected {expected}, got {actual}")]
    FingerprintMismatch {
        table: String,
        expected: String,
        actual: String,
    },
}

pub fn build_timeline_schema(cfg: &PipelineConfig) -> TableSchema {
    let mut columns = vec![
        column("patient_id", ColumnType::Text),
        column("ts_ms_utc", ColumnType::Integer),
        column("pump_elapsed_s", ColumnType::Real),
        column("dosage", ColumnType::Real),
        column("dosage_rate", ColumnType::Real),
    ];
    for code in &cfg.signal_codes {
        columns.push(column(&signal_column_name(code), ColumnType::Real));
    }
    for code in &cfg.event_codes {
        columns.push(column(&event_column_name(code), ColumnType::Integer));
    }
    columns.extend([
        column("sex", ColumnType::Integer),
        column("age", ColumnType::Real),
        column("height", ColumnType::Real),
        column("weight", ColumnType::Real),
        column("elapsed_since_prev_s", ColumnType::Real),
    ]);

    finish("timeline_rows", cfg.schema_version, columns)
}

pub fn build_episode_schema(cfg: &PipelineConfig) -> TableSchema {
    let timeline = build_timeline_schema(cfg);
    let mut columns = timeline.columns;
    columns.push(column("step", ColumnType::Integer));
    columns.push(column("episode_len", ColumnType::Integer));
    finish("episode_rows", cfg.schema_version, columns)
}

pub fn build_windowed_schema(cfg: &PipelineConfig, feature_names: &[String]) -> TableSchema {
    let mut columns = vec![
        column("patient_id", ColumnType::Text),
        column("ts_ms_utc", ColumnType::Integer),
        column("position", ColumnType::Integer),
        column("state", ColumnType::Real),
    ];
    for name in feature_names {
        columns.push(column(&feature_column_name(name), ColumnType::Real));
    }
    columns.extend([
        column("action", ColumnType::Real),
        column("outcome", ColumnType::Real),
        column("window_index", ColumnType::Integer),
        column("bstate", ColumnType::Real),
        column("remaining_steps", ColumnType::Integer),
        column("terminal", ColumnType::Integer),
    ]);
    finish("windowed_rows", cfg.schema_version, columns)
}

pub fn build_bin_schema(cfg: &PipelineConfig) -> TableSchema {
    let columns = vec![
        column("bin_value", ColumnType::Integer),
        column("action_mean", ColumnType::Real),
        column("action_sd", ColumnType::Real),
        column("outcome_mean", ColumnType::Real),
        column("outcome_sd", ColumnType::Real),
        column("diff_mean", ColumnType::Real),
        column("diff_sd", ColumnType::Real),
        column("observation_count", ColumnType::Integer),
        column("status", ColumnType::Text),
    ];
    finish("bin_statistics", cfg.schema_version, columns)
}

pub fn assert_schema_compatible(
    expected_version: u32,
    expected_fingerprint: &str,
    actual: &TableSchema,
) -> Result<(), SchemaError> {
    if expected_version != actual.version {
        return Err(SchemaError::VersionMismatch {
            table: actual.table.clone(),
            expected: expected_version,
            actual: actual.version,
        });
    }

    if expected_fingerprint != actual.fingerprint {
        return Err(SchemaError::FingerprintMismatch {
            table: actual.table.clone(),
            expected: expected_fingerprint.to_string(),
            actual: actual.fingerprint.clone(),
        });
    }

    Ok(())
}

pub fn signal_column_name(code: &str) -> String {
    format!("sig_{}", sanitize(code))
}

pub fn event_column_name(code: &str) -> String {
    format!("evt_{}", sanitize(code))
}

pub fn feature_column_name(name: &str) -> String {
    format!("f_{}", sanitize(name))
}

// SQLite identifiers are built from these names, so keep them to [a-z0-9_].
fn sanitize(raw: &str) -> String {
    raw.trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect()
}

fn column(name: &str, dtype: ColumnType) -> ColumnSpec {
    ColumnSpec {
        name: name.to_string(),
        dtype,
    }
}

fn finish(table: &str, version: u32, columns: Vec<ColumnSpec>) -> TableSchema {
    let fingerprint = schema_fingerprint(table, version, &columns);

    info!(
        component = "schema",
        event = "schema.built",
        table,
        version,
        column_count = columns.len(),
        fingerprint = fingerprint
    );

    TableSchema {
        table: table.to_string(),
        version,
        fingerprint,
        columns,
    }
}

fn schema_fingerprint(table: &str, version: u32, columns: &[ColumnSpec]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("table:{table};"));
    hasher.update(format!("version:{version};"));
    hasher.update("columns:");
    for column in columns {
        hasher.update(column.name.as_bytes());
        hasher.update(format!(":{};", column.dtype.sql_type()));
    }
    hex::encode(hasher.finalize())
}
