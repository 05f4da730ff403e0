//! Pipeline configuration, defaults and environment overrides.

use std::collections::HashMap;
use std::env;
use std::thread;

use serde::{Deserialize, Serialize};

use crate::error::PipelineError;
use crate::schema::{event_column_name, signal_column_name, TABLE_SCHEMA_VERSION};

pub const DEFAULT_SIGNAL_CODES: [&str; 5] = ["SPO2", "PR", "BIS", "ETCO2", "EMG"];
pub const DEFAULT_EVENT_CODES: [&str; 2] = ["RECOVERY", "OXYGEN"];
pub const DEFAULT_MIN_EPISODE_LEN: u32 = 300;
pub const DEFAULT_WINDOW_SIZE: usize = 300;
pub const DEFAULT_BIN_RANGE: (i64, i64) = (30, 80);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IntervalScope {
    Global,
    PerPatient,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub signal_codes: Vec<String>,
    pub event_codes: Vec<String>,
    // strictly more steps than this
    pub min_episode_len: u32,
    pub window_size: usize,
    pub bin_range: (i64, i64),
    pub workers: usize,
    pub interval_scope: IntervalScope,
    pub schema_version: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            signal_codes: DEFAULT_SIGNAL_CODES.iter().map(|c| c.to_string()).collect(),
            event_codes: DEFAULT_EVENT_CODES.iter().map(|c| c.to_string()).collect(),
            min_episode_len: DEFAULT_MIN_EPISODE_LEN,
            window_size: DEFAULT_WINDOW_SIZE,
            bin_range: DEFAULT_BIN_RANGE,
            workers: default_workers(),
            interval_scope: IntervalScope::Global,
            schema_version: TABLE_SCHEMA_VERSION,
        }
    }
}

pub fn pipeline_config_from_env() -> PipelineConfig {
    let mut config = PipelineConfig::default();

    if let Some(workers) = env_parsed::<usize>("SEDATION_WORKERS") {
        config.workers = workers;
    }
    if let Some(window_size) = env_parsed::<usize>("SEDATION_WINDOW_SIZE") {
        config.window_size = window_size;
    }
    if let Some(min_len) = env_parsed::<u32>("SEDATION_MIN_EPISODE_LEN") {
        config.min_episode_len = min_len;
    }
    if let Some(codes) = env_list("SEDATION_SIGNALS") {
        config.signal_codes = codes;
    }
    if let Some(codes) = env_list("SEDATION_EVENTS") {
        config.event_codes = codes;
    }
    if let Ok(scope) = env::var("SEDATION_INTERVAL_SCOPE") {
        if let Some(parsed) = parse_interval_scope(&scope) {
            config.interval_scope = parsed;
        }
    }

    config
}

pub fn validate_config(cfg: &PipelineConfig) -> Result<(), PipelineError> {
    if cfg.workers == 0 {
        return Err(PipelineError::InvalidConfig(
            "workers must be > 0".to_string(),
        ));
    }
    if cfg.window_size == 0 {
        return Err(PipelineError::InvalidConfig(
            "window_size must be > 0".to_string(),
        ));
    }
    if cfg.bin_range.0 > cfg.bin_range.1 {
        return Err(PipelineError::InvalidConfig(format!(
            "bin_range start {} exceeds end {}",
            cfg.bin_range.0, cfg.bin_range.1
        )));
    }
    if cfg.schema_version != TABLE_SCHEMA_VERSION {
        return Err(PipelineError::InvalidConfig(format!(
            "schema_version must equal TABLE_SCHEMA_VERSION ({TABLE_SCHEMA_VERSION})"
        )));
    }

    validate_codes("signal_codes", &cfg.signal_codes, signal_column_name)?;
    validate_codes("event_codes", &cfg.event_codes, event_column_name)?;

    Ok(())
}

// Codes become column names, so two codes that sanitize to the same column collide.
fn validate_codes(
    field: &str,
    codes: &[String],
    column_name: fn(&str) -> String,
) -> Result<(), PipelineError> {
    let mut seen: HashMap<String, &str> = HashMap::new();
    for code in codes {
        if code.trim().is_empty() {
            return Err(PipelineError::InvalidConfig(format!(
                "{field} entries must be non-empty"
            )));
        }
        let column = column_name(code);
        if let Some(previous) = seen.insert(column.clone(), code.as_str()) {
            return Err(PipelineError::InvalidConfig(format!(
                "{field} entries must map to unique columns ('{previous}' and '{code}' both map to '{column}')"
            )));
        }
    }
    Ok(())
}

fn default_workers() -> usize {
    thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

fn env_parsed<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok()?.trim().parse().ok()
}

fn env_list(key: &str) -> Option<Vec<String>> {
    let raw = env::var(key).ok()?;
    let codes: Vec<String> = raw
        .split(',')
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
        .collect();
    if codes.is_empty() {
        None
    } else {
        Some(codes)
    }
}

fn parse_interval_scope(raw: &str) -> Option<IntervalScope> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "global" => Some(IntervalScope::Global),
        "patient" | "per_patient" | "per-patient" => Some(IntervalScope::PerPatient),
        _ => None,
    }
}
