use super::ids::WatermarkQuery;
use super::traits::{
    AggregatedRecord, BackReferenceMap, LogRecord, LogSink, LogSource, RetrieveQuery,
    StorageError, StoreFailure, StoreReport,
};
use crate::config::types::{FieldMap, JsonlConfig, TimestampConfig};
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeZone, Utc};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Fixed textual format aggregated timestamps are persisted in.
const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Document-file backend: one JSON object per line. The source file is
/// produced upstream; aggregated records are appended to the target file and
/// the back-reference update rewrites the source file with an `aggr_msg_id`
/// key on every summarized record.
pub struct JsonlStorage {
    source_path: PathBuf,
    target_path: PathBuf,
    fields: FieldMap,
    timestamp_format: String,
    utc_offset: FixedOffset,
}

impl JsonlStorage {
    pub fn new(
        config: &JsonlConfig,
        fields: &FieldMap,
        timestamps: &TimestampConfig,
    ) -> Result<Self, StorageError> {
        let utc_offset = timestamps
            .offset()
            .map_err(StorageError::Configuration)?;

        info!(
            source = %config.source_path.display(),
            target = %config.target_path.display(),
            "using jsonl storage"
        );

        Ok(Self {
            source_path: config.source_path.clone(),
            target_path: config.target_path.clone(),
            fields: fields.clone(),
            timestamp_format: timestamps.format.clone(),
            utc_offset,
        })
    }

    fn parse_line(&self, line: &str) -> Result<LogRecord, StorageError> {
        let value: Value = serde_json::from_str(line)?;

        let logid = match value.get("logid") {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            _ => {
                return Err(StorageError::MalformedRecord {
                    id: "<unknown>".to_string(),
                    field: "logid".to_string(),
                })
            }
        };

        let missing = |field: &str| StorageError::MalformedRecord {
            id: logid.clone(),
            field: field.to_string(),
        };

        let message = value
            .get(&self.fields.message)
            .and_then(Value::as_str)
            .ok_or_else(|| missing(&self.fields.message))?
            .to_string();

        let hostname = value
            .get(&self.fields.hostname)
            .and_then(Value::as_str)
            .ok_or_else(|| missing(&self.fields.hostname))?
            .to_string();

        let anomaly_score = value
            .get(&self.fields.anomaly_score)
            .and_then(Value::as_f64)
            .ok_or_else(|| missing(&self.fields.anomaly_score))?;

        let timestamp = match value.get(&self.fields.timestamp) {
            // Epoch milliseconds carry their own frame of reference.
            Some(Value::Number(n)) => {
                let millis = n.as_i64().ok_or_else(|| StorageError::MalformedTimestamp {
                    id: logid.clone(),
                    value: n.to_string(),
                    reason: "not an integer".to_string(),
                })?;
                DateTime::from_timestamp_millis(millis).ok_or_else(|| {
                    StorageError::MalformedTimestamp {
                        id: logid.clone(),
                        value: millis.to_string(),
                        reason: "out of representable range".to_string(),
                    }
                })?
            }
            // Naive text is interpreted in the configured utc_offset.
            Some(Value::String(text)) => self.parse_naive_timestamp(&logid, text)?,
            _ => return Err(missing(&self.fields.timestamp)),
        };

        Ok(LogRecord {
            id: logid,
            message,
            timestamp,
            hostname,
            anomaly_score,
        })
    }

    fn parse_naive_timestamp(&self, id: &str, text: &str) -> Result<DateTime<Utc>, StorageError> {
        let naive = NaiveDateTime::parse_from_str(text, &self.timestamp_format).map_err(|e| {
            StorageError::MalformedTimestamp {
                id: id.to_string(),
                value: text.to_string(),
                reason: e.to_string(),
            }
        })?;

        self.utc_offset
            .from_local_datetime(&naive)
            .single()
            .map(|t| t.with_timezone(&Utc))
            .ok_or_else(|| StorageError::MalformedTimestamp {
                id: id.to_string(),
                value: text.to_string(),
                reason: "ambiguous local time".to_string(),
            })
    }

    fn read_source_lines(&self) -> Result<Vec<String>, StorageError> {
        let file = fs::File::open(&self.source_path).map_err(|e| {
            StorageError::SourceUnavailable(format!(
                "cannot open '{}': {}",
                self.source_path.display(),
                e
            ))
        })?;

        let mut lines = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line?;
            if !line.trim().is_empty() {
                lines.push(line);
            }
        }
        Ok(lines)
    }

    /// Rewrite the source file with `aggr_msg_id` set on every record listed
    /// in `assignments` (logid -> issued id). Write-to-temp then rename, so a
    /// failed rewrite leaves the source intact.
    fn apply_back_references(
        &self,
        assignments: &HashMap<String, String>,
    ) -> Result<(), StorageError> {
        let lines = self.read_source_lines()?;
        let tmp_path = self.source_path.with_extension("tmp");

        let mut tmp = fs::File::create(&tmp_path)?;
        for line in &lines {
            let mut value: Value = serde_json::from_str(line)?;
            let logid = value
                .get("logid")
                .map(|id| match id {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .unwrap_or_default();

            if let Some(aggr_id) = assignments.get(&logid) {
                if let Some(object) = value.as_object_mut() {
                    object.insert("aggr_msg_id".to_string(), Value::String(aggr_id.clone()));
                }
            }
            writeln!(tmp, "{}", serde_json::to_string(&value)?)?;
        }
        tmp.flush()?;
        drop(tmp);

        fs::rename(&tmp_path, &self.source_path)?;
        Ok(())
    }
}

fn encode_record(record: &AggregatedRecord) -> Value {
    json!({
        "id": record.id,
        "message": record.message,
        "total_logs": record.total_logs,
        "average_datetime": record.average_datetime.format(DATETIME_FORMAT).to_string(),
        "hostname": record.hostname,
        "average_anomaly_score": record.average_anomaly_score,
        "was_added_at": record.was_added_at.format(DATETIME_FORMAT).to_string(),
        "original_msgs_ids": record.original_msgs_ids,
    })
}

#[async_trait]
impl LogSource for JsonlStorage {
    async fn retrieve(&self, query: &RetrieveQuery) -> Result<Vec<LogRecord>, StorageError> {
        let now = Utc::now();
        let since = now
            - chrono::Duration::from_std(query.window)
                .unwrap_or_else(|_| chrono::Duration::days(36500));

        let mut records = Vec::new();
        for line in self.read_source_lines()? {
            let record = self.parse_line(&line)?;

            if record.timestamp < since || record.timestamp > now {
                continue;
            }
            if let Some(host) = &query.hostname {
                if &record.hostname != host {
                    continue;
                }
            }
            records.push(record);
        }

        // Newest first, capped at max_entries.
        records.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        records.truncate(query.max_entries);

        debug!(records = records.len(), "retrieved jsonl records");
        Ok(records)
    }
}

#[async_trait]
impl LogSink for JsonlStorage {
    async fn store(
        &self,
        records: &[AggregatedRecord],
        back_refs: &BackReferenceMap,
    ) -> Result<StoreReport, StorageError> {
        let mut report = StoreReport::default();

        let mut target = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.target_path)?;

        for record in records {
            let written = serde_json::to_string(&encode_record(record))
                .map_err(StorageError::from)
                .and_then(|line| writeln!(target, "{}", line).map_err(StorageError::from));
            match written {
                Ok(()) => report.stored.push(record.id),
                Err(e) => report.failures.push(StoreFailure {
                    id: record.id,
                    error: e.to_string(),
                }),
            }
        }
        target.flush()?;

        // Back-reference update for everything that landed in the target.
        let mut assignments: HashMap<String, String> = HashMap::new();
        for record in records {
            if !report.stored.contains(&record.id) {
                continue;
            }
            let originals = back_refs
                .get(&record.id)
                .map(|ids| ids.as_slice())
                .unwrap_or(&record.original_msgs_ids);
            for logid in originals {
                assignments.insert(logid.clone(), record.id.to_string());
            }
        }

        if !assignments.is_empty() {
            if let Err(e) = self.apply_back_references(&assignments) {
                // The templates are persisted but the originals were not
                // relinked; report every stored record as failed.
                let error = format!("back-reference update failed: {}", e);
                for id in report.stored.drain(..) {
                    report.failures.push(StoreFailure {
                        id,
                        error: error.clone(),
                    });
                }
            }
        }

        Ok(report)
    }
}

#[async_trait]
impl WatermarkQuery for JsonlStorage {
    async fn max_issued_id(&self) -> Result<i64, StorageError> {
        if !Path::new(&self.target_path).exists() {
            return Ok(0);
        }

        let file = fs::File::open(&self.target_path)?;
        let mut watermark = 0i64;
        for line in BufReader::new(file).lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let value: Value = serde_json::from_str(&line)?;
            let id = match value.get("id") {
                Some(Value::Number(n)) => n.as_i64(),
                Some(Value::String(s)) => s.parse().ok(),
                _ => None,
            };
            if let Some(id) = id {
                watermark = watermark.max(id);
            }
        }
        Ok(watermark)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    fn storage(dir: &TempDir) -> JsonlStorage {
        let config = JsonlConfig {
            source_path: dir.path().join("source.jsonl"),
            target_path: dir.path().join("target.jsonl"),
        };
        JsonlStorage::new(
            &config,
            &FieldMap::default(),
            &TimestampConfig {
                format: "%Y-%m-%d %H:%M:%S".to_string(),
                utc_offset: "+03:00".to_string(),
            },
        )
        .unwrap()
    }

    #[test]
    fn naive_text_is_corrected_by_configured_offset() {
        let dir = TempDir::new().unwrap();
        let storage = storage(&dir);

        let record = storage
            .parse_line(
                r#"{"logid":"1","message":"m","timestamp":"2022-01-01 03:00:00","hostname":"h","anomaly_score":0.1}"#,
            )
            .unwrap();

        // 03:00 at +03:00 is midnight UTC.
        assert_eq!(
            record.timestamp,
            Utc.with_ymd_and_hms(2022, 1, 1, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn epoch_millis_need_no_correction() {
        let dir = TempDir::new().unwrap();
        let storage = storage(&dir);

        let record = storage
            .parse_line(
                r#"{"logid":"1","message":"m","timestamp":1640995200000,"hostname":"h","anomaly_score":0.1}"#,
            )
            .unwrap();
        assert_eq!(
            record.timestamp,
            Utc.with_ymd_and_hms(2022, 1, 1, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn missing_field_is_malformed_not_skipped() {
        let dir = TempDir::new().unwrap();
        let storage = storage(&dir);

        let err = storage
            .parse_line(r#"{"logid":"7","timestamp":1640995200000,"hostname":"h","anomaly_score":0.1}"#)
            .unwrap_err();
        assert!(matches!(
            err,
            StorageError::MalformedRecord { ref id, ref field } if id == "7" && field == "message"
        ));
    }

    #[tokio::test]
    async fn missing_source_file_is_source_unavailable() {
        let dir = TempDir::new().unwrap();
        let storage = storage(&dir);

        let query = RetrieveQuery {
            window: Duration::from_secs(3600),
            max_entries: 100,
            hostname: None,
        };
        let err = storage.retrieve(&query).await.unwrap_err();
        assert!(matches!(err, StorageError::SourceUnavailable(_)));
    }

    #[tokio::test]
    async fn watermark_of_missing_target_is_zero() {
        let dir = TempDir::new().unwrap();
        let storage = storage(&dir);
        assert_eq!(storage.max_issued_id().await.unwrap(), 0);
    }
}
