pub fn generate_starter_config() -> String {
    r#"# =============================================================================
# LOGFOLD CONFIGURATION
# =============================================================================
# Logfold retrieves a window of log records, groups near-duplicates into
# templates, stores the templates, and back-links the original records.
#
# Config file locations (in order of precedence):
#   1. Path specified via --config argument
#   2. ~/.config/logfold/config.yml
#   3. /etc/logfold/config.yml

# =============================================================================
# STORAGE
# =============================================================================
# backend:   where records live. 'duckdb' (relational) or 'jsonl' (file of
#            JSON objects, one per line). Only the section matching the
#            selected backend is required.
# id_scheme: how aggregated-record ids are issued.
#              sequential - watermark + 1, watermark + 2, ... (gapless)
#              generated  - independent UUID per record

storage:
  backend: duckdb
  id_scheme: sequential

  duckdb:
    path: ~/.local/share/logfold/logs.duckdb
    # Table the raw records are read from
    source_table: logs
    # Table the aggregated templates are written to
    target_table: aggregated_logs

  # jsonl:
  #   source_path: /var/log/app/anomalies.jsonl
  #   target_path: /var/log/app/aggregated.jsonl

# =============================================================================
# RETRIEVAL
# =============================================================================

retrieval:
  # How far back from now to fetch records
  window: 24h
  max_entries: 10000
  # Restrict to one origin host; omit to take every host
  # hostname: 172.17.31.10

# =============================================================================
# CLUSTERING
# =============================================================================
# eps:         DBSCAN neighborhood radius in embedding space
# min_samples: minimum neighborhood size to seed a cluster; records that
#              reach no cluster are kept verbatim as single-member templates

clustering:
  eps: 0.35
  min_samples: 2
  vector_length: 25

# =============================================================================
# FIELD MAPPING
# =============================================================================
# Column/key names under which the source store keeps each required field.

fields:
  message: message
  timestamp: timestamp
  hostname: hostname
  anomaly_score: anomaly_score

# =============================================================================
# TIMESTAMPS
# =============================================================================
# format:     strftime format of naive timestamp text (jsonl backend)
# utc_offset: offset the naive text is written in, applied before averaging

timestamps:
  format: '%Y-%m-%d %H:%M:%S'
  utc_offset: '+00:00'
"#
    .to_string()
}
