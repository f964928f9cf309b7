use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] duckdb::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("record '{id}' is missing required field '{field}'")]
    MalformedRecord { id: String, field: String },

    #[error("invalid timestamp '{value}' in record '{id}': {reason}")]
    MalformedTimestamp {
        id: String,
        value: String,
        reason: String,
    },

    #[error("task join error: {0}")]
    Join(String),
}

/// A raw log entry pulled from the source store. Immutable for the duration
/// of a run; any mutation (the back-reference update) happens at the sink.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogRecord {
    /// Opaque identifier scoped to the source store.
    pub id: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub hostname: String,
    pub anomaly_score: f64,
}

/// Identifier issued to an aggregated record. Which variant a run produces
/// is decided by the configured id scheme, not by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AggregatedId {
    Sequential(i64),
    Generated(Uuid),
}

impl fmt::Display for AggregatedId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AggregatedId::Sequential(n) => write!(f, "{}", n),
            AggregatedId::Generated(u) => write!(f, "{}", u),
        }
    }
}

/// One synthesized template with its aggregate statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatedRecord {
    pub id: AggregatedId,
    /// Template string, or the verbatim message for a noise singleton.
    pub message: String,
    pub total_logs: u64,
    pub average_datetime: DateTime<Utc>,
    pub hostname: String,
    pub average_anomaly_score: f64,
    pub was_added_at: DateTime<Utc>,
    /// Non-owning back-references to the source records this row summarizes.
    pub original_msgs_ids: Vec<String>,
}

/// Issued id -> source-record ids it summarizes. Drives the sink-side update
/// of source records; never persisted on its own.
pub type BackReferenceMap = HashMap<AggregatedId, Vec<String>>;

/// Bounds for one retrieval: how far back to look, how many entries at most,
/// and an optional hostname restriction.
#[derive(Debug, Clone)]
pub struct RetrieveQuery {
    pub window: Duration,
    pub max_entries: usize,
    pub hostname: Option<String>,
}

#[derive(Debug, Clone)]
pub struct StoreFailure {
    pub id: AggregatedId,
    pub error: String,
}

/// Per-record outcome of a sink write. The sink keeps going after individual
/// failures, so a partially failed batch still reports what landed.
#[derive(Debug, Default)]
pub struct StoreReport {
    pub stored: Vec<AggregatedId>,
    pub failures: Vec<StoreFailure>,
}

impl StoreReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

#[async_trait]
pub trait LogSource: Send + Sync {
    /// Retrieve at most `max_entries` records from the last `window`, newest
    /// first. An empty batch is a normal result, not an error.
    async fn retrieve(&self, query: &RetrieveQuery) -> Result<Vec<LogRecord>, StorageError>;
}

#[async_trait]
pub trait LogSink: Send + Sync {
    /// Persist aggregated records and apply the back-reference update to the
    /// source records. Best-effort across records; per-record failures are
    /// collected in the report rather than aborting the batch.
    async fn store(
        &self,
        records: &[AggregatedRecord],
        back_refs: &BackReferenceMap,
    ) -> Result<StoreReport, StorageError>;
}

#[async_trait]
pub trait IdIssuer: Send {
    /// The highest identifier previously issued in the target store. Fetched
    /// once per run, before any id is drawn.
    async fn watermark(&mut self) -> Result<i64, StorageError>;

    /// Produce the next identifier under the configured scheme.
    fn next(&mut self) -> AggregatedId;
}
