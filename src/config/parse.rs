use super::types::*;
use crate::config::{expand_env_vars, expand_tilde};
use regex::Regex;
use std::fs::File;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse YAML: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("validation failed:\n{}", .0.join("\n"))]
    ValidationList(Vec<String>),

    #[error("validation failed: {0}")]
    Validation(String),
}

pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    use std::io::Read;

    let mut file = File::open(path).map_err(|e| {
        ConfigError::Io(std::io::Error::new(
            e.kind(),
            format!("failed to open config file '{}': {}", path.display(), e),
        ))
    })?;

    let mut yaml_string = String::new();
    file.read_to_string(&mut yaml_string).map_err(|e| {
        ConfigError::Io(std::io::Error::new(
            e.kind(),
            format!("failed to read config file '{}': {}", path.display(), e),
        ))
    })?;

    // Expand environment variables before parsing, and refuse to continue if
    // any referenced variable is unset.
    let yaml_string = expand_env_vars(&yaml_string);
    check_unexpanded_vars(&yaml_string)?;

    let mut config: Config = serde_yaml::from_str(&yaml_string).map_err(|e| {
        ConfigError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("in file '{}': {}", path.display(), e),
        ))
    })?;

    expand_paths(&mut config);
    validate_config(&config)?;

    Ok(config)
}

/// Checks for unexpanded environment variables and returns a helpful error
fn check_unexpanded_vars(yaml_string: &str) -> Result<(), ConfigError> {
    let re = Regex::new(r"\$env\{([A-Za-z_][A-Za-z0-9_]*)\}").unwrap();
    let mut unexpanded: Vec<String> = re
        .captures_iter(yaml_string)
        .map(|cap| cap.get(1).unwrap().as_str().to_string())
        .collect();

    if unexpanded.is_empty() {
        return Ok(());
    }

    unexpanded.sort();
    unexpanded.dedup();

    Err(ConfigError::Validation(format!(
        "environment variables are not set: {}\n\
         Set them (e.g. export {}=...) or replace the references in the config file.",
        unexpanded.join(", "),
        unexpanded[0]
    )))
}

fn expand_paths(config: &mut Config) {
    if let Some(duckdb) = config.storage.duckdb.as_mut() {
        duckdb.path = expand_tilde(&duckdb.path);
    }
    if let Some(jsonl) = config.storage.jsonl.as_mut() {
        jsonl.source_path = expand_tilde(&jsonl.source_path);
        jsonl.target_path = expand_tilde(&jsonl.target_path);
    }
}

/// Eager validation at load time. Every problem is collected so the user
/// sees the full list at once, and nothing touches storage before this
/// passes.
fn validate_config(config: &Config) -> Result<(), ConfigError> {
    let mut errors = Vec::new();

    match config.storage.backend {
        Backend::DuckDb => {
            if config.storage.duckdb.is_none() {
                errors.push(
                    "storage.backend is 'duckdb' but the storage.duckdb section is missing"
                        .to_string(),
                );
            }
        }
        Backend::Jsonl => {
            if config.storage.jsonl.is_none() {
                errors.push(
                    "storage.backend is 'jsonl' but the storage.jsonl section is missing"
                        .to_string(),
                );
            }
        }
    }

    if let Some(duckdb) = &config.storage.duckdb {
        for (name, value) in [
            ("storage.duckdb.source_table", &duckdb.source_table),
            ("storage.duckdb.target_table", &duckdb.target_table),
        ] {
            if value.is_empty() {
                errors.push(format!("{} must not be empty", name));
            }
        }
    }

    if config.retrieval.window.is_zero() {
        errors.push("retrieval.window must be greater than zero".to_string());
    }
    if config.retrieval.max_entries == 0 {
        errors.push("retrieval.max_entries must be at least 1".to_string());
    }

    if !(config.clustering.eps.is_finite() && config.clustering.eps > 0.0) {
        errors.push("clustering.eps must be a positive number".to_string());
    }
    if config.clustering.min_samples == 0 {
        errors.push("clustering.min_samples must be at least 1".to_string());
    }
    if config.clustering.vector_length == 0 {
        errors.push("clustering.vector_length must be at least 1".to_string());
    }

    for (name, value) in [
        ("fields.message", &config.fields.message),
        ("fields.timestamp", &config.fields.timestamp),
        ("fields.hostname", &config.fields.hostname),
        ("fields.anomaly_score", &config.fields.anomaly_score),
    ] {
        if value.is_empty() {
            errors.push(format!("{} must not be empty", name));
        }
    }

    if config.timestamps.format.is_empty() {
        errors.push("timestamps.format must not be empty".to_string());
    }
    if let Err(e) = config.timestamps.offset() {
        errors.push(format!("timestamps.utc_offset: {}", e));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::ValidationList(errors))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(yaml: &str) -> Result<(), ConfigError> {
        let mut config: Config = serde_yaml::from_str(yaml)?;
        expand_paths(&mut config);
        validate_config(&config)
    }

    const VALID: &str = r#"
storage:
  backend: duckdb
  id_scheme: sequential
  duckdb:
    path: /tmp/logs.duckdb
retrieval:
  window: 1h
  max_entries: 1000
clustering:
  eps: 0.35
  min_samples: 2
"#;

    #[test]
    fn minimal_duckdb_config_is_valid() {
        parse(VALID).unwrap();
    }

    #[test]
    fn backend_section_must_match_backend() {
        let yaml = r#"
storage:
  backend: jsonl
  duckdb:
    path: /tmp/logs.duckdb
retrieval:
  window: 1h
  max_entries: 1000
clustering:
  eps: 0.35
  min_samples: 2
"#;
        let err = parse(yaml).unwrap_err();
        assert!(err.to_string().contains("storage.jsonl section is missing"));
    }

    #[test]
    fn zero_eps_is_rejected() {
        let yaml = VALID.replace("eps: 0.35", "eps: 0.0");
        let err = parse(&yaml).unwrap_err();
        assert!(err.to_string().contains("clustering.eps"));
    }

    #[test]
    fn bad_utc_offset_is_rejected() {
        let yaml = format!("{}timestamps:\n  utc_offset: 'UTC+3'\n", VALID);
        let err = parse(&yaml).unwrap_err();
        assert!(err.to_string().contains("utc_offset"));
    }

    #[test]
    fn all_problems_are_reported_together() {
        let yaml = r#"
storage:
  backend: duckdb
retrieval:
  window: 1h
  max_entries: 0
clustering:
  eps: -1.0
  min_samples: 0
"#;
        match parse(yaml).unwrap_err() {
            ConfigError::ValidationList(errors) => assert!(errors.len() >= 4),
            other => panic!("expected ValidationList, got {}", other),
        }
    }
}
