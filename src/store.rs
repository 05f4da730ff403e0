//! Pipeline boundaries: CSV source tables in, SQLite output tables out.

use std::collections::HashMap;
use std::fs::File;
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use csv::StringRecord;
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use thiserror::Error;
use tracing::info;

use crate::model::{
    BinStatistic, BinStatus, CaseRecord, EnrichedRow, EnrichedTable, EpisodeRow, EventMarker,
    Observation, PatientProfile, PumpRecord, SourceTables, TimelineRow, WindowedRow,
};
use crate::schema::{feature_column_name, TableSchema};

pub const OBSERVATIONS_FILE: &str = "observations.csv";
pub const PUMPS_FILE: &str = "pumps.csv";
pub const EVENTS_FILE: &str = "events.csv";
pub const CASES_FILE: &str = "cases.csv";

const ENRICHED_RESERVED: [&str; 6] = [
    "patient_id",
    "ts_ms_utc",
    "position",
    "state",
    "action",
    "outcome",
];

const DATETIME_FORMATS: [&str; 4] = [
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
];

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("{file} is missing required column '{column}'")]
    MissingColumn { file: String, column: &'static str },
    #[error("{file} columns '{first}' and '{second}' both map to output column '{column}'")]
    DuplicateColumn {
        file: String,
        first: String,
        second: String,
        column: String,
    },
    #[error("{file} line {line}: failed to parse field {field} value '{value}'")]
    ParseField {
        file: String,
        line: u64,
        field: &'static str,
        value: String,
    },
    #[error("table {table} expects {expected} values per row, got {found}")]
    RowWidth {
        table: String,
        expected: usize,
        found: usize,
    },
    #[error("unknown bin status '{0}'")]
    UnknownBinStatus(String),
}

pub fn load_source_tables(dir: &Path) -> Result<SourceTables, StoreError> {
    let tables = SourceTables {
        observations: read_csv(&dir.join(OBSERVATIONS_FILE), parse_observation)?,
        pumps: read_csv(&dir.join(PUMPS_FILE), parse_pump)?,
        events: read_csv(&dir.join(EVENTS_FILE), parse_event)?,
        cases: read_csv(&dir.join(CASES_FILE), parse_case)?,
    };

    info!(
        component = "store",
        event = "store.sources.loaded",
        dir = %dir.display(),
        observations = tables.observations.len(),
        pumps = tables.pumps.len(),
        events = tables.events.len(),
        cases = tables.cases.len()
    );

    Ok(tables)
}

pub fn load_enriched_table(path: &Path) -> Result<EnrichedTable, StoreError> {
    let mut reader = open_csv(path)?;
    let headers = Headers::new(path, reader.headers()?.clone());
    let feature_columns: Vec<(usize, String)> = headers
        .record
        .iter()
        .enumerate()
        .filter(|(_, name)| !ENRICHED_RESERVED.contains(name))
        .map(|(idx, name)| (idx, name.to_string()))
        .collect();

    let mut output_names: HashMap<String, &str> = HashMap::new();
    for (_, name) in &feature_columns {
        let column = feature_column_name(name);
        if let Some(first) = output_names.insert(column.clone(), name.as_str()) {
            return Err(StoreError::DuplicateColumn {
                file: headers.file.clone(),
                first: first.to_string(),
                second: name.clone(),
                column,
            });
        }
    }

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        let line = line_of(&record);
        let mut features = Vec::with_capacity(feature_columns.len());
        for (idx, _) in &feature_columns {
            features.push(parse_opt_f64(&headers, &record, line, *idx, "feature")?);
        }
        rows.push(EnrichedRow {
            patient_id: headers.text(&record, "patient_id")?,
            ts_ms_utc: headers.timestamp(&record, line, "ts_ms_utc")?,
            position: headers.opt_i64(&record, line, "position")?,
            state: headers.opt_f64(&record, line, "state")?,
            action: headers.opt_f64(&record, line, "action")?,
            outcome: headers.opt_f64(&record, line, "outcome")?,
            features,
        });
    }

    info!(
        component = "store",
        event = "store.enriched.loaded",
        path = %path.display(),
        rows = rows.len(),
        features = feature_columns.len()
    );

    Ok(EnrichedTable {
        feature_names: feature_columns.into_iter().map(|(_, name)| name).collect(),
        rows,
    })
}

pub struct OutputStore {
    conn: Connection,
}

impl OutputStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| StoreError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let conn = Connection::open(path)?;
        conn.execute_batch(
            "
            PRAGMA journal_mode=WAL;
            PRAGMA synchronous=NORMAL;
            PRAGMA temp_store=MEMORY;
            ",
        )?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS table_schemas (
                table_name TEXT PRIMARY KEY,
                version INTEGER NOT NULL,
                fingerprint TEXT NOT NULL
            );
            ",
        )?;
        Ok(Self { conn })
    }

    pub fn write_timeline(
        &mut self,
        schema: &TableSchema,
        rows: &[TimelineRow],
    ) -> Result<u64, StoreError> {
        self.replace_table(schema, rows.iter().map(timeline_values))
    }

    pub fn write_episodes(
        &mut self,
        schema: &TableSchema,
        rows: &[EpisodeRow],
    ) -> Result<u64, StoreError> {
        self.replace_table(
            schema,
            rows.iter().map(|e| {
                let mut values = timeline_values(&e.row);
                values.push(Value::Integer(e.step as i64));
                values.push(Value::Integer(e.episode_len as i64));
                values
            }),
        )
    }

    pub fn write_windowed(
        &mut self,
        schema: &TableSchema,
        rows: &[WindowedRow],
    ) -> Result<u64, StoreError> {
        self.replace_table(schema, rows.iter().map(windowed_values))
    }

    pub fn write_bin_statistics(
        &mut self,
        schema: &TableSchema,
        stats: &[BinStatistic],
    ) -> Result<u64, StoreError> {
        self.replace_table(
            schema,
            stats.iter().map(|s| {
                vec![
                    Value::Integer(s.bin_value),
                    real(s.action_mean),
                    real(s.action_sd),
                    real(s.outcome_mean),
                    real(s.outcome_sd),
                    real(s.diff_mean),
                    real(s.diff_sd),
                    Value::Integer(s.observation_count as i64),
                    Value::Text(s.status.as_str().to_string()),
                ]
            }),
        )
    }

    pub fn read_bin_statistics(&self) -> Result<Vec<BinStatistic>, StoreError> {
        let mut stmt = self.conn.prepare(
            "
            SELECT bin_value, action_mean, action_sd, outcome_mean, outcome_sd,
                   diff_mean, diff_sd, observation_count, status
            FROM bin_statistics
            ORDER BY row_ord ASC
            ",
        )?;
        let mut rows = stmt.query([])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let status: String = row.get(8)?;
            let count: i64 = row.get(7)?;
            out.push(BinStatistic {
                bin_value: row.get(0)?,
                action_mean: row.get(1)?,
                action_sd: row.get(2)?,
                outcome_mean: row.get(3)?,
                outcome_sd: row.get(4)?,
                diff_mean: row.get(5)?,
                diff_sd: row.get(6)?,
                observation_count: count.max(0) as u64,
                status: parse_bin_status(&status)?,
            });
        }
        Ok(out)
    }

    pub fn row_count(&self, table: &str) -> Result<u64, StoreError> {
        let count: i64 =
            self.conn
                .query_row(&format!("SELECT COUNT(*) FROM \"{table}\""), [], |row| {
                    row.get(0)
                })?;
        Ok(count.max(0) as u64)
    }

    pub fn stored_schema(&self, table: &str) -> Result<Option<(u32, String)>, StoreError> {
        let found = self
            .conn
            .query_row(
                "SELECT version, fingerprint FROM table_schemas WHERE table_name = ?1",
                params![table],
                |row| Ok((row.get::<_, u32>(0)?, row.get::<_, String>(1)?)),
            )
            .optional()?;
        Ok(found)
    }

    fn replace_table<I>(&mut self, schema: &TableSchema, rows: I) -> Result<u64, StoreError>
    where
        I: Iterator<Item = Vec<Value>>,
    {
        let column_defs: Vec<String> = schema
            .columns
            .iter()
            .map(|c| format!("\"{}\" {}", c.name, c.dtype.sql_type()))
            .collect();
        let column_names: Vec<String> = schema
            .columns
            .iter()
            .map(|c| format!("\"{}\"", c.name))
            .collect();
        let placeholders: Vec<String> = (1..=schema.columns.len() + 1)
            .map(|i| format!("?{i}"))
            .collect();

        let tx = self.conn.transaction()?;
        tx.execute_batch(&format!(
            "DROP TABLE IF EXISTS \"{table}\";
             CREATE TABLE \"{table}\" (row_ord INTEGER PRIMARY KEY, {defs});",
            table = schema.table,
            defs = column_defs.join(", ")
        ))?;

        let mut written = 0u64;
        {
            let mut stmt = tx.prepare(&format!(
                "INSERT INTO \"{}\" (row_ord, {}) VALUES ({})",
                schema.table,
                column_names.join(", "),
                placeholders.join(", ")
            ))?;
            for values in rows {
                if values.len() != schema.columns.len() {
                    return Err(StoreError::RowWidth {
                        table: schema.table.clone(),
                        expected: schema.columns.len(),
                        found: values.len(),
                    });
                }
                let ord = Value::Integer(written as i64);
                stmt.execute(params_from_iter(std::iter::once(ord).chain(values)))?;
                written += 1;
            }
        }

        tx.execute(
            "
            INSERT INTO table_schemas (table_name, version, fingerprint)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(table_name) DO UPDATE SET
                version = excluded.version,
                fingerprint = excluded.fingerprint
            ",
            params![schema.table, schema.version, schema.fingerprint],
        )?;
        tx.commit()?;

        info!(
            component = "store",
            event = "store.table.written",
            table = %schema.table,
            rows = written,
            fingerprint = %schema.fingerprint
        );

        Ok(written)
    }
}

fn timeline_values(row: &TimelineRow) -> Vec<Value> {
    let mut values = vec![
        row.patient_id
            .as_ref()
            .map(|p| Value::Text(p.clone()))
            .unwrap_or(Value::Null),
        Value::Integer(row.ts_ms_utc),
        real(row.pump.and_then(|p| p.elapsed_since_prior_s)),
        real(row.pump.and_then(|p| p.dosage)),
        real(row.pump.and_then(|p| p.dosage_rate)),
    ];
    values.extend(row.signals.iter().map(|v| real(*v)));
    values.extend(row.events.iter().map(|flag| Value::Integer(i64::from(*flag))));
    match row.profile {
        Some(profile) => values.extend([
            Value::Integer(i64::from(profile.sex)),
            Value::Real(profile.age),
            Value::Real(profile.height),
            Value::Real(profile.weight),
        ]),
        None => values.extend([Value::Null, Value::Null, Value::Null, Value::Null]),
    }
    values.push(real(row.elapsed_since_prev_s));
    values
}

fn windowed_values(w: &WindowedRow) -> Vec<Value> {
    let mut values = vec![
        Value::Text(w.row.patient_id.clone()),
        Value::Integer(w.row.ts_ms_utc),
        w.row.position.map(Value::Integer).unwrap_or(Value::Null),
        real(w.row.state),
    ];
    values.extend(w.row.features.iter().map(|v| real(*v)));
    values.extend([
        real(w.row.action),
        real(w.row.outcome),
        Value::Integer(i64::from(w.window_index)),
        real(w.bstate),
        Value::Integer(i64::from(w.remaining_steps)),
        Value::Integer(i64::from(w.terminal)),
    ]);
    values
}

fn real(value: Option<f64>) -> Value {
    value.map(Value::Real).unwrap_or(Value::Null)
}

fn parse_bin_status(raw: &str) -> Result<BinStatus, StoreError> {
    match raw {
        "populated" => Ok(BinStatus::Populated),
        "empty" => Ok(BinStatus::Empty),
        other => Err(StoreError::UnknownBinStatus(other.to_string())),
    }
}

fn open_csv(path: &Path) -> Result<csv::Reader<File>, StoreError> {
    let file = File::open(path).map_err(|source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(file))
}

fn read_csv<T>(
    path: &Path,
    parse: fn(&Headers, &StringRecord) -> Result<T, StoreError>,
) -> Result<Vec<T>, StoreError> {
    let mut reader = open_csv(path)?;
    let headers = Headers::new(path, reader.headers()?.clone());
    let mut out = Vec::new();
    for record in reader.records() {
        out.push(parse(&headers, &record?)?);
    }
    Ok(out)
}

fn parse_observation(h: &Headers, record: &StringRecord) -> Result<Observation, StoreError> {
    let line = line_of(record);
    Ok(Observation {
        patient_id: h.text(record, "patient_id")?,
        ts_ms_utc: h.timestamp(record, line, "ts_ms_utc")?,
        signal_code: h.text(record, "signal_code")?,
        value: h.f64(record, line, "value")?,
    })
}

fn parse_pump(h: &Headers, record: &StringRecord) -> Result<PumpRecord, StoreError> {
    let line = line_of(record);
    Ok(PumpRecord {
        patient_id: h.text(record, "patient_id")?,
        ts_ms_utc: h.timestamp(record, line, "ts_ms_utc")?,
        elapsed_since_prior_s: h.opt_f64(record, line, "elapsed_since_prior_s")?,
        dosage: h.opt_f64(record, line, "dosage")?,
        dosage_rate: h.opt_f64(record, line, "dosage_rate")?,
    })
}

fn parse_event(h: &Headers, record: &StringRecord) -> Result<EventMarker, StoreError> {
    let line = line_of(record);
    Ok(EventMarker {
        patient_id: h.text(record, "patient_id")?,
        ts_ms_utc: h.timestamp(record, line, "ts_ms_utc")?,
        event_code: h.text(record, "event_code")?,
    })
}

fn parse_case(h: &Headers, record: &StringRecord) -> Result<CaseRecord, StoreError> {
    let line = line_of(record);
    let sex_raw = h.raw(record, "sex")?;
    let sex = match sex_raw {
        "0" => 0,
        "1" => 1,
        other => {
            return Err(StoreError::ParseField {
                file: h.file.clone(),
                line,
                field: "sex",
                value: other.to_string(),
            })
        }
    };
    Ok(CaseRecord {
        patient_id: h.text(record, "patient_id")?,
        created_ts_ms_utc: h.timestamp(record, line, "created_ts_ms_utc")?,
        profile: PatientProfile {
            sex,
            age: h.f64(record, line, "age")?,
            height: h.f64(record, line, "height")?,
            weight: h.f64(record, line, "weight")?,
        },
    })
}

fn line_of(record: &StringRecord) -> u64 {
    record.position().map(|p| p.line()).unwrap_or(0)
}

struct Headers {
    file: String,
    record: StringRecord,
    index: HashMap<String, usize>,
}

impl Headers {
    fn new(path: &Path, record: StringRecord) -> Self {
        let index = record
            .iter()
            .enumerate()
            .map(|(idx, name)| (name.to_string(), idx))
            .collect();
        Self {
            file: path.display().to_string(),
            record,
            index,
        }
    }

    fn position(&self, column: &'static str) -> Result<usize, StoreError> {
        self.index
            .get(column)
            .copied()
            .ok_or_else(|| StoreError::MissingColumn {
                file: self.file.clone(),
                column,
            })
    }

    fn raw<'r>(&self, record: &'r StringRecord, column: &'static str) -> Result<&'r str, StoreError> {
        let idx = self.position(column)?;
        Ok(record.get(idx).unwrap_or_default())
    }

    fn text(&self, record: &StringRecord, column: &'static str) -> Result<String, StoreError> {
        Ok(self.raw(record, column)?.to_string())
    }

    fn f64(&self, record: &StringRecord, line: u64, column: &'static str) -> Result<f64, StoreError> {
        let raw = self.raw(record, column)?;
        parse_finite(raw).ok_or_else(|| self.parse_error(line, column, raw))
    }

    fn opt_f64(
        &self,
        record: &StringRecord,
        line: u64,
        column: &'static str,
    ) -> Result<Option<f64>, StoreError> {
        match self.index.get(column) {
            Some(idx) => parse_opt_f64(self, record, line, *idx, column),
            None => Ok(None),
        }
    }

    fn opt_i64(
        &self,
        record: &StringRecord,
        line: u64,
        column: &'static str,
    ) -> Result<Option<i64>, StoreError> {
        let Some(idx) = self.index.get(column) else {
            return Ok(None);
        };
        let raw = record.get(*idx).unwrap_or_default();
        if is_null(raw) {
            return Ok(None);
        }
        raw.parse::<i64>()
            .map(Some)
            .map_err(|_| self.parse_error(line, column, raw))
    }

    fn timestamp(
        &self,
        record: &StringRecord,
        line: u64,
        column: &'static str,
    ) -> Result<i64, StoreError> {
        let raw = self.raw(record, column)?;
        parse_timestamp_ms(raw).ok_or_else(|| self.parse_error(line, column, raw))
    }

    fn parse_error(&self, line: u64, field: &'static str, value: &str) -> StoreError {
        StoreError::ParseField {
            file: self.file.clone(),
            line,
            field,
            value: value.to_string(),
        }
    }
}

fn parse_opt_f64(
    headers: &Headers,
    record: &StringRecord,
    line: u64,
    idx: usize,
    field: &'static str,
) -> Result<Option<f64>, StoreError> {
    let raw = record.get(idx).unwrap_or_default();
    if is_null(raw) {
        return Ok(None);
    }
    parse_finite(raw)
        .map(Some)
        .ok_or_else(|| headers.parse_error(line, field, raw))
}

// Measurements must be real numbers; "inf" and "NaN" parse as f64 but are rejected.
fn parse_finite(raw: &str) -> Option<f64> {
    raw.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

fn is_null(raw: &str) -> bool {
    matches!(
        raw.to_ascii_lowercase().as_str(),
        "" | "na" | "nan" | "null" | "none"
    )
}

pub fn parse_timestamp_ms(raw: &str) -> Option<i64> {
    let raw = raw.trim();
    if let Ok(ms) = raw.parse::<i64>() {
        return Some(ms);
    }
    DATETIME_FORMATS.iter().find_map(|fmt| {
        NaiveDateTime::parse_from_str(raw, fmt)
            .ok()
            .map(|dt| dt.and_utc().timestamp_millis())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;
    use crate::schema::{build_bin_schema, build_timeline_schema};
    use std::io::Write;
    use tempfile::tempdir;

    fn write_file(dir: &Path, name: &str, body: &str) {
        let mut file = File::create(dir.join(name)).unwrap();
        file.write_all(body.as_bytes()).unwrap();
    }

    #[test]
    fn timestamps_accept_epoch_millis_and_datetimes() {
        assert_eq!(parse_timestamp_ms("1704067200000"), Some(1_704_067_200_000));
        assert_eq!(
            parse_timestamp_ms("2024-01-01 00:00:01"),
            Some(1_704_067_201_000)
        );
        assert_eq!(
            parse_timestamp_ms("2024-01-01T00:00:00.250"),
            Some(1_704_067_200_250)
        );
        assert_eq!(parse_timestamp_ms("yesterday"), None);
    }

    #[test]
    fn loads_source_tables_with_nulls_and_rejects_bad_sex() {
        let dir = tempdir().unwrap();
        write_file(
            dir.path(),
            OBSERVATIONS_FILE,
            "patient_id,ts_ms_utc,signal_code,value\np1,1000,BIS,45.5\n",
        );
        write_file(
            dir.path(),
            PUMPS_FILE,
            "patient_id,ts_ms_utc,elapsed_since_prior_s,dosage,dosage_rate\np1,2000,,3.5,NA\n",
        );
        write_file(
            dir.path(),
            EVENTS_FILE,
            "patient_id,ts_ms_utc,event_code\np1,2024-01-01 00:00:00,OXYGEN\n",
        );
        write_file(
            dir.path(),
            CASES_FILE,
            "patient_id,created_ts_ms_utc,sex,age,height,weight\np1,500,1,60,170,72.5\n",
        );

        let tables = load_source_tables(dir.path()).expect("load");
        assert_eq!(tables.observations[0].value, 45.5);
        assert_eq!(tables.pumps[0].elapsed_since_prior_s, None);
        assert_eq!(tables.pumps[0].dosage, Some(3.5));
        assert_eq!(tables.pumps[0].dosage_rate, None);
        assert_eq!(tables.events[0].ts_ms_utc, 1_704_067_200_000);
        assert_eq!(tables.cases[0].profile.sex, 1);

        write_file(
            dir.path(),
            CASES_FILE,
            "patient_id,created_ts_ms_utc,sex,age,height,weight\np1,500,2,60,170,72.5\n",
        );
        let err = load_source_tables(dir.path()).expect_err("sex must be 0 or 1");
        assert!(matches!(err, StoreError::ParseField { field: "sex", line: 2, .. }));
    }

    #[test]
    fn enriched_table_splits_reserved_columns_from_features() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("enriched.csv");
        write_file(
            dir.path(),
            "enriched.csv",
            "patient_id,ts_ms_utc,lag_bis,state,action,outcome,lag_pr\np1,1000,1.5,40,0.2,,7\n",
        );

        let table = load_enriched_table(&path).expect("load");
        assert_eq!(table.feature_names, vec!["lag_bis", "lag_pr"]);
        let row = &table.rows[0];
        assert_eq!(row.position, None);
        assert_eq!(row.state, Some(40.0));
        assert_eq!(row.outcome, None);
        assert_eq!(row.features, vec![Some(1.5), Some(7.0)]);
    }

    #[test]
    fn non_finite_measurements_are_parse_errors() {
        let dir = tempdir().unwrap();
        write_file(
            dir.path(),
            OBSERVATIONS_FILE,
            "patient_id,ts_ms_utc,signal_code,value\np1,1000,BIS,45\np1,2000,BIS,nan\n",
        );
        write_file(dir.path(), PUMPS_FILE, "patient_id,ts_ms_utc\n");
        write_file(dir.path(), EVENTS_FILE, "patient_id,ts_ms_utc,event_code\n");
        write_file(
            dir.path(),
            CASES_FILE,
            "patient_id,created_ts_ms_utc,sex,age,height,weight\n",
        );

        let err = load_source_tables(dir.path()).expect_err("nan is not a measurement");
        assert!(matches!(err, StoreError::ParseField { field: "value", line: 3, .. }));

        let path = dir.path().join("enriched.csv");
        write_file(
            dir.path(),
            "enriched.csv",
            "patient_id,ts_ms_utc,state,lag_bis\np1,1000,40,inf\n",
        );
        let err = load_enriched_table(&path).expect_err("inf is not a feature value");
        assert!(matches!(err, StoreError::ParseField { field: "feature", line: 2, .. }));
    }

    #[test]
    fn feature_columns_must_map_to_distinct_output_names() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("enriched.csv");
        write_file(
            dir.path(),
            "enriched.csv",
            "patient_id,ts_ms_utc,state,lag-bis,lag_bis\np1,1000,40,1,2\n",
        );

        let err = load_enriched_table(&path).expect_err("lag-bis and lag_bis collide");
        match err {
            StoreError::DuplicateColumn { first, second, column, .. } => {
                assert_eq!(first, "lag-bis");
                assert_eq!(second, "lag_bis");
                assert_eq!(column, "f_lag_bis");
            }
            other => panic!("expected DuplicateColumn, got {other:?}"),
        }
    }

    #[test]
    fn missing_required_column_is_reported() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("enriched.csv");
        write_file(dir.path(), "enriched.csv", "patient_id,state\np1,40\n");

        let err = load_enriched_table(&path).expect_err("ts column is required");
        assert!(matches!(err, StoreError::MissingColumn { column: "ts_ms_utc", .. }));
    }

    #[test]
    fn bin_statistics_round_trip_in_order() {
        let cfg = PipelineConfig::default();
        let schema = build_bin_schema(&cfg);
        let stats = vec![
            BinStatistic {
                bin_value: 30,
                action_mean: None,
                action_sd: None,
                outcome_mean: None,
                outcome_sd: None,
                diff_mean: None,
                diff_sd: None,
                observation_count: 0,
                status: BinStatus::Empty,
            },
            BinStatistic {
                bin_value: 31,
                action_mean: Some(1.5),
                action_sd: Some(0.5),
                outcome_mean: Some(2.0),
                outcome_sd: None,
                diff_mean: Some(-0.5),
                diff_sd: None,
                observation_count: 2,
                status: BinStatus::Populated,
            },
        ];

        let mut store = OutputStore::open_in_memory().expect("store");
        store.write_bin_statistics(&schema, &stats).expect("write");

        assert_eq!(store.read_bin_statistics().expect("read"), stats);
        assert_eq!(
            store.stored_schema("bin_statistics").expect("schema"),
            Some((schema.version, schema.fingerprint.clone()))
        );
    }

    #[test]
    fn rewriting_a_table_replaces_its_rows() {
        let cfg = PipelineConfig::default();
        let schema = build_timeline_schema(&cfg);
        let rows: Vec<TimelineRow> = (0..3)
            .map(|i| TimelineRow::placeholder(i * 1_000, 5, 2))
            .collect();

        let mut store = OutputStore::open_in_memory().expect("store");
        store.write_timeline(&schema, &rows).expect("first write");
        store.write_timeline(&schema, &rows[..1]).expect("second write");

        assert_eq!(store.row_count("timeline_rows").expect("count"), 1);
    }

    #[test]
    fn row_width_must_match_schema() {
        let cfg = PipelineConfig::default();
        let schema = build_timeline_schema(&cfg);
        let narrow = vec![TimelineRow::placeholder(0, 1, 2)];

        let mut store = OutputStore::open_in_memory().expect("store");
        let err = store.write_timeline(&schema, &narrow).expect_err("width mismatch");
        assert!(matches!(err, StoreError::RowWidth { .. }));
    }
}
