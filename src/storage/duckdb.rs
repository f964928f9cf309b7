use super::ids::WatermarkQuery;
use super::traits::{
    AggregatedRecord, BackReferenceMap, LogRecord, LogSink, LogSource, RetrieveQuery,
    StorageError, StoreFailure, StoreReport,
};
use crate::config::types::{DuckDbConfig, FieldMap};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use duckdb::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

/// Relational backend. One database file holds both the source table the raw
/// records are read from and the target table the aggregated templates are
/// written into; the back-reference update sets `aggr_msg_id` on the source
/// rows.
pub struct DuckDbStorage {
    conn: Arc<Mutex<Connection>>,
    fields: FieldMap,
    source_table: String,
    target_table: String,
}

/// Raw row as fetched; required fields stay optional until checked.
struct SourceRow {
    logid: Option<String>,
    message: Option<String>,
    timestamp_micros: Option<i64>,
    hostname: Option<String>,
    anomaly_score: Option<f64>,
}

impl DuckDbStorage {
    pub fn open(config: &DuckDbConfig, fields: &FieldMap) -> Result<Self, StorageError> {
        info!(path = %config.path.display(), "opening duckdb database");
        let conn = Connection::open(Path::new(&config.path))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            fields: fields.clone(),
            source_table: config.source_table.clone(),
            target_table: config.target_table.clone(),
        })
    }

    /// In-memory database (for testing).
    pub fn in_memory(fields: &FieldMap) -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            fields: fields.clone(),
            source_table: "logs".to_string(),
            target_table: "aggregated_logs".to_string(),
        })
    }

    pub async fn init_schema(&self) -> Result<(), StorageError> {
        let conn = self.conn.clone();
        let fields = self.fields.clone();
        let source_table = self.source_table.clone();
        let target_table = self.target_table.clone();

        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap();

            conn.execute(
                &format!(
                    "CREATE TABLE IF NOT EXISTS {} (
                        logid VARCHAR PRIMARY KEY,
                        {} VARCHAR,
                        {} TIMESTAMPTZ,
                        {} VARCHAR,
                        {} DOUBLE,
                        aggr_msg_id VARCHAR
                    )",
                    source_table,
                    fields.message,
                    fields.timestamp,
                    fields.hostname,
                    fields.anomaly_score,
                ),
                [],
            )?;

            conn.execute(
                &format!(
                    "CREATE INDEX IF NOT EXISTS idx_{}_ts ON {}({})",
                    source_table, source_table, fields.timestamp,
                ),
                [],
            )?;

            conn.execute(
                &format!(
                    "CREATE TABLE IF NOT EXISTS {} (
                        id VARCHAR PRIMARY KEY,
                        message VARCHAR NOT NULL,
                        total_logs BIGINT NOT NULL,
                        average_datetime TIMESTAMPTZ NOT NULL,
                        hostname VARCHAR NOT NULL,
                        average_anomaly_score DOUBLE NOT NULL,
                        was_added_at TIMESTAMPTZ NOT NULL
                    )",
                    target_table,
                ),
                [],
            )?;

            Ok::<(), StorageError>(())
        })
        .await
        .map_err(|e| StorageError::Join(e.to_string()))?
    }

    /// Seed source rows. Used by tests and by loaders that feed the source
    /// table from upstream detectors.
    pub async fn insert_source_records(&self, records: &[LogRecord]) -> Result<(), StorageError> {
        let conn = self.conn.clone();
        let fields = self.fields.clone();
        let source_table = self.source_table.clone();
        let records = records.to_vec();

        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap();
            let mut stmt = conn.prepare(&format!(
                "INSERT INTO {} (logid, {}, {}, {}, {})
                 VALUES (?, ?, to_timestamp(? / 1000000.0), ?, ?)",
                source_table, fields.message, fields.timestamp, fields.hostname, fields.anomaly_score,
            ))?;

            for record in records {
                stmt.execute(duckdb::params![
                    record.id,
                    record.message,
                    record.timestamp.timestamp_micros(),
                    record.hostname,
                    record.anomaly_score,
                ])?;
            }

            Ok::<(), StorageError>(())
        })
        .await
        .map_err(|e| StorageError::Join(e.to_string()))?
    }

    /// `aggr_msg_id` currently set on a source row, if any. Test support.
    pub async fn back_reference_of(&self, logid: &str) -> Result<Option<String>, StorageError> {
        let conn = self.conn.clone();
        let source_table = self.source_table.clone();
        let logid = logid.to_string();

        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap();
            let mut stmt = conn.prepare(&format!(
                "SELECT aggr_msg_id FROM {} WHERE logid = ?",
                source_table,
            ))?;
            let mut rows = stmt.query(duckdb::params![logid])?;
            match rows.next()? {
                Some(row) => Ok(row.get::<_, Option<String>>(0)?),
                None => Ok(None),
            }
        })
        .await
        .map_err(|e| StorageError::Join(e.to_string()))?
    }

    /// Number of rows in the target table. Test support.
    pub async fn aggregated_row_count(&self) -> Result<usize, StorageError> {
        let conn = self.conn.clone();
        let target_table = self.target_table.clone();

        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap();
            let mut stmt = conn.prepare(&format!("SELECT count(*) FROM {}", target_table))?;
            let count: i64 = stmt.query_row([], |row| row.get(0))?;
            Ok(count as usize)
        })
        .await
        .map_err(|e| StorageError::Join(e.to_string()))?
    }
}

fn into_record(row: SourceRow) -> Result<LogRecord, StorageError> {
    let logid = row.logid.ok_or_else(|| StorageError::MalformedRecord {
        id: "<unknown>".to_string(),
        field: "logid".to_string(),
    })?;

    let missing = |field: &str| StorageError::MalformedRecord {
        id: logid.clone(),
        field: field.to_string(),
    };

    let timestamp_micros = row.timestamp_micros.ok_or_else(|| missing("timestamp"))?;
    let timestamp = DateTime::from_timestamp_micros(timestamp_micros).ok_or_else(|| {
        StorageError::MalformedTimestamp {
            id: logid.clone(),
            value: timestamp_micros.to_string(),
            reason: "out of representable range".to_string(),
        }
    })?;

    Ok(LogRecord {
        message: row.message.ok_or_else(|| missing("message"))?,
        hostname: row.hostname.ok_or_else(|| missing("hostname"))?,
        anomaly_score: row.anomaly_score.ok_or_else(|| missing("anomaly_score"))?,
        timestamp,
        id: logid,
    })
}

#[async_trait]
impl LogSource for DuckDbStorage {
    async fn retrieve(&self, query: &RetrieveQuery) -> Result<Vec<LogRecord>, StorageError> {
        let conn = self.conn.clone();
        let fields = self.fields.clone();
        let source_table = self.source_table.clone();

        let now = Utc::now();
        let since = now
            - chrono::Duration::from_std(query.window)
                .unwrap_or_else(|_| chrono::Duration::days(36500));
        let hostname = query.hostname.clone();
        let max_entries = query.max_entries as i64;

        let rows: Vec<SourceRow> = tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap();

            let base = format!(
                "SELECT logid, {m}, epoch_us({t}), {h}, {s} FROM {table}
                 WHERE {t} >= to_timestamp(? / 1000000.0) AND {t} <= to_timestamp(? / 1000000.0)",
                m = fields.message,
                t = fields.timestamp,
                h = fields.hostname,
                s = fields.anomaly_score,
                table = source_table,
            );

            let fetch = |row: &duckdb::Row<'_>| -> Result<SourceRow, duckdb::Error> {
                Ok(SourceRow {
                    logid: row.get(0)?,
                    message: row.get(1)?,
                    timestamp_micros: row.get(2)?,
                    hostname: row.get(3)?,
                    anomaly_score: row.get(4)?,
                })
            };

            let rows = match &hostname {
                Some(host) => {
                    let sql = format!(
                        "{} AND {} = ? ORDER BY {} DESC LIMIT ?",
                        base, fields.hostname, fields.timestamp,
                    );
                    let mut stmt = conn.prepare(&sql)?;
                    let mapped = stmt.query_map(
                        duckdb::params![
                            since.timestamp_micros(),
                            now.timestamp_micros(),
                            host,
                            max_entries
                        ],
                        fetch,
                    )?;
                    mapped.collect::<Result<Vec<_>, _>>()?
                }
                None => {
                    let sql = format!("{} ORDER BY {} DESC LIMIT ?", base, fields.timestamp);
                    let mut stmt = conn.prepare(&sql)?;
                    let mapped = stmt.query_map(
                        duckdb::params![
                            since.timestamp_micros(),
                            now.timestamp_micros(),
                            max_entries
                        ],
                        fetch,
                    )?;
                    mapped.collect::<Result<Vec<_>, _>>()?
                }
            };

            Ok::<Vec<SourceRow>, StorageError>(rows)
        })
        .await
        .map_err(|e| StorageError::Join(e.to_string()))??;

        debug!(rows = rows.len(), "retrieved source rows");

        // A missing required field aborts the whole run rather than being
        // skipped; silently dropping rows would mask upstream corruption.
        rows.into_iter().map(into_record).collect()
    }
}

#[async_trait]
impl LogSink for DuckDbStorage {
    async fn store(
        &self,
        records: &[AggregatedRecord],
        back_refs: &BackReferenceMap,
    ) -> Result<StoreReport, StorageError> {
        let conn = self.conn.clone();
        let source_table = self.source_table.clone();
        let target_table = self.target_table.clone();
        let records = records.to_vec();
        let back_refs = back_refs.clone();

        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap();
            let mut report = StoreReport::default();

            for record in &records {
                let result = (|| -> Result<(), duckdb::Error> {
                    conn.execute(
                        &format!(
                            "INSERT INTO {} (id, message, total_logs, average_datetime,
                                             hostname, average_anomaly_score, was_added_at)
                             VALUES (?, ?, ?, to_timestamp(? / 1000000.0), ?, ?, to_timestamp(? / 1000000.0))",
                            target_table,
                        ),
                        duckdb::params![
                            record.id.to_string(),
                            record.message,
                            record.total_logs as i64,
                            record.average_datetime.timestamp_micros(),
                            record.hostname,
                            record.average_anomaly_score,
                            record.was_added_at.timestamp_micros(),
                        ],
                    )?;

                    let originals = back_refs
                        .get(&record.id)
                        .map(|ids| ids.as_slice())
                        .unwrap_or(&record.original_msgs_ids);
                    if !originals.is_empty() {
                        let placeholders = vec!["?"; originals.len()].join(", ");
                        let sql = format!(
                            "UPDATE {} SET aggr_msg_id = ? WHERE logid IN ({})",
                            source_table, placeholders,
                        );
                        let id_text = record.id.to_string();
                        let mut params: Vec<&dyn duckdb::ToSql> = vec![&id_text];
                        for original in originals {
                            params.push(original);
                        }
                        conn.execute(&sql, params.as_slice())?;
                    }

                    Ok(())
                })();

                match result {
                    Ok(()) => report.stored.push(record.id),
                    // Keep going; the caller gets the per-record summary.
                    Err(e) => report.failures.push(StoreFailure {
                        id: record.id,
                        error: e.to_string(),
                    }),
                }
            }

            Ok::<StoreReport, StorageError>(report)
        })
        .await
        .map_err(|e| StorageError::Join(e.to_string()))?
    }
}

#[async_trait]
impl WatermarkQuery for DuckDbStorage {
    async fn max_issued_id(&self) -> Result<i64, StorageError> {
        let conn = self.conn.clone();
        let target_table = self.target_table.clone();

        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap();
            let mut stmt = conn.prepare(&format!(
                "SELECT coalesce(max(TRY_CAST(id AS BIGINT)), 0) FROM {}",
                target_table,
            ))?;
            let watermark: i64 = stmt.query_row([], |row| row.get(0))?;
            Ok(watermark)
        })
        .await
        .map_err(|e| StorageError::Join(e.to_string()))?
    }
}
