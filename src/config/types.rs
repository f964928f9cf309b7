use chrono::FixedOffset;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub storage: StorageConfig,
    pub retrieval: RetrievalConfig,
    pub clustering: ClusteringConfig,
    #[serde(default)]
    pub fields: FieldMap,
    #[serde(default)]
    pub timestamps: TimestampConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StorageConfig {
    pub backend: Backend,
    #[serde(default)]
    pub id_scheme: IdScheme,
    pub duckdb: Option<DuckDbConfig>,
    pub jsonl: Option<JsonlConfig>,
}

/// The closed set of supported backends. Anything else fails at config load,
/// before any connection is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    DuckDb,
    Jsonl,
}

impl Backend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Backend::DuckDb => "duckdb",
            Backend::Jsonl => "jsonl",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdScheme {
    Sequential,
    Generated,
}

impl Default for IdScheme {
    fn default() -> Self {
        IdScheme::Sequential
    }
}

impl IdScheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            IdScheme::Sequential => "sequential",
            IdScheme::Generated => "generated",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DuckDbConfig {
    pub path: PathBuf,
    #[serde(default = "default_source_table")]
    pub source_table: String,
    #[serde(default = "default_target_table")]
    pub target_table: String,
}

fn default_source_table() -> String {
    "logs".to_string()
}

fn default_target_table() -> String {
    "aggregated_logs".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JsonlConfig {
    pub source_path: PathBuf,
    pub target_path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetrievalConfig {
    /// How far back from now to look for source records.
    #[serde(with = "humantime_serde")]
    pub window: Duration,
    pub max_entries: usize,
    /// Restrict retrieval to one origin host. Omit to take every host.
    #[serde(default)]
    pub hostname: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClusteringConfig {
    /// DBSCAN neighborhood radius in embedding space.
    pub eps: f64,
    /// Minimum neighborhood size (the point itself included) to seed a
    /// cluster.
    pub min_samples: usize,
    #[serde(default = "default_vector_length")]
    pub vector_length: usize,
}

fn default_vector_length() -> usize {
    25
}

/// Column/key names under which the source store keeps each required field.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FieldMap {
    #[serde(default = "default_message_field")]
    pub message: String,
    #[serde(default = "default_timestamp_field")]
    pub timestamp: String,
    #[serde(default = "default_hostname_field")]
    pub hostname: String,
    #[serde(default = "default_anomaly_score_field")]
    pub anomaly_score: String,
}

fn default_message_field() -> String {
    "message".to_string()
}

fn default_timestamp_field() -> String {
    "timestamp".to_string()
}

fn default_hostname_field() -> String {
    "hostname".to_string()
}

fn default_anomaly_score_field() -> String {
    "anomaly_score".to_string()
}

impl Default for FieldMap {
    fn default() -> Self {
        Self {
            message: default_message_field(),
            timestamp: default_timestamp_field(),
            hostname: default_hostname_field(),
            anomaly_score: default_anomaly_score_field(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TimestampConfig {
    /// strftime format for the naive-text timestamp representation.
    #[serde(default = "default_timestamp_format")]
    pub format: String,
    /// UTC offset (`+HH:MM` / `-HH:MM`) applied when interpreting naive
    /// timestamp text. Offset-aware representations ignore it.
    #[serde(default = "default_utc_offset")]
    pub utc_offset: String,
}

fn default_timestamp_format() -> String {
    "%Y-%m-%d %H:%M:%S".to_string()
}

fn default_utc_offset() -> String {
    "+00:00".to_string()
}

impl Default for TimestampConfig {
    fn default() -> Self {
        Self {
            format: default_timestamp_format(),
            utc_offset: default_utc_offset(),
        }
    }
}

impl TimestampConfig {
    /// The configured offset as a chrono type. Validation at config load
    /// guarantees this succeeds for a loaded config.
    pub fn offset(&self) -> Result<FixedOffset, String> {
        parse_utc_offset(&self.utc_offset)
    }
}

pub(crate) fn parse_utc_offset(text: &str) -> Result<FixedOffset, String> {
    let bad = |reason: &str| format!("invalid utc_offset '{}': {}", text, reason);

    let (sign, rest) = match text.as_bytes().first() {
        Some(&b'+') => (1i32, &text[1..]),
        Some(&b'-') => (-1i32, &text[1..]),
        _ => return Err(bad("expected leading '+' or '-'")),
    };

    let (hours, minutes) = rest
        .split_once(':')
        .ok_or_else(|| bad("expected +HH:MM"))?;
    let hours: i32 = hours.parse().map_err(|_| bad("hours not a number"))?;
    let minutes: i32 = minutes.parse().map_err(|_| bad("minutes not a number"))?;

    if !(0..24).contains(&hours) || !(0..60).contains(&minutes) {
        return Err(bad("offset out of range"));
    }

    let seconds = sign * (hours * 3600 + minutes * 60);
    FixedOffset::east_opt(seconds).ok_or_else(|| bad("offset out of range"))
}
