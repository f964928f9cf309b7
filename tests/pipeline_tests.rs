use chrono::{DateTime, Duration, Utc};
use logfold::config::types::{
    Backend, ClusteringConfig, Config, IdScheme, JsonlConfig, RetrievalConfig, StorageConfig,
};
use logfold::pipeline::run_once;
use serde_json::{json, Value};
use std::fs;
use std::time::Duration as StdDuration;
use tempfile::TempDir;

fn test_config(dir: &TempDir) -> Config {
    Config {
        storage: StorageConfig {
            backend: Backend::Jsonl,
            id_scheme: IdScheme::Sequential,
            duckdb: None,
            jsonl: Some(JsonlConfig {
                source_path: dir.path().join("source.jsonl"),
                target_path: dir.path().join("target.jsonl"),
            }),
        },
        retrieval: RetrievalConfig {
            window: StdDuration::from_secs(3600),
            max_entries: 1000,
            hostname: None,
        },
        clustering: ClusteringConfig {
            eps: 0.35,
            min_samples: 2,
            vector_length: 25,
        },
        fields: Default::default(),
        timestamps: Default::default(),
    }
}

fn source_line(id: &str, message: &str, hostname: &str, timestamp: DateTime<Utc>, score: f64) -> String {
    json!({
        "logid": id,
        "message": message,
        "timestamp": timestamp.format("%Y-%m-%d %H:%M:%S").to_string(),
        "hostname": hostname,
        "anomaly_score": score,
    })
    .to_string()
}

fn read_lines(path: &std::path::Path) -> Vec<Value> {
    fs::read_to_string(path)
        .unwrap()
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| serde_json::from_str(l).unwrap())
        .collect()
}

#[tokio::test]
async fn full_run_folds_near_duplicates_and_back_links_sources() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    let base = Utc::now();

    // Three messages that differ only in a non-alphabetic token, plus two
    // unrelated strays.
    let lines = [
        source_line("r1", "connection from 10.0.0.1 refused", "web-1", base - Duration::minutes(1), 0.2),
        source_line("r2", "connection from 10.0.0.2 refused", "web-1", base - Duration::minutes(2), 0.4),
        source_line("r3", "connection from 10.0.0.3 refused", "web-2", base - Duration::minutes(3), 0.9),
        source_line("r4", "kernel panic imminent", "db-1", base - Duration::minutes(4), 0.7),
        source_line("r5", "backup completed successfully", "db-2", base - Duration::minutes(5), 0.1),
    ];
    fs::write(dir.path().join("source.jsonl"), lines.join("\n")).unwrap();

    let summary = run_once(&config).await.unwrap();
    assert_eq!(summary.retrieved, 5);
    assert_eq!(summary.aggregated, 3);
    assert_eq!(summary.stored, 3);
    assert_eq!(summary.failed, 0);

    let target = read_lines(&dir.path().join("target.jsonl"));
    assert_eq!(target.len(), 3);

    // Sequential ids over an empty target start at 1, noise first.
    let ids: Vec<i64> = target.iter().map(|v| v["id"].as_i64().unwrap()).collect();
    assert_eq!(ids, vec![1, 2, 3]);

    let cluster = target
        .iter()
        .find(|v| v["total_logs"].as_u64() == Some(3))
        .expect("one aggregated record should cover three members");
    assert_eq!(cluster["message"], "connection from *** refused");
    assert_eq!(cluster["hostname"], "web-1");

    let mean_score = cluster["average_anomaly_score"].as_f64().unwrap();
    assert!((mean_score - 0.5).abs() < 1e-9);

    let expected_mean = (base - Duration::minutes(2))
        .format("%Y-%m-%d %H:%M:%S")
        .to_string();
    assert_eq!(cluster["average_datetime"], expected_mean.as_str());

    let originals: Vec<&str> = cluster["original_msgs_ids"]
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v.as_str().unwrap())
        .collect();
    assert_eq!(originals, vec!["r1", "r2", "r3"]);

    // Verbatim noise singletons.
    let noise: Vec<&Value> = target
        .iter()
        .filter(|v| v["total_logs"].as_u64() == Some(1))
        .collect();
    assert_eq!(noise.len(), 2);
    assert_eq!(noise[0]["message"], "kernel panic imminent");
    assert_eq!(noise[1]["message"], "backup completed successfully");

    // Every source record now points at the record that summarizes it.
    let source = read_lines(&dir.path().join("source.jsonl"));
    let cluster_id = cluster["id"].as_i64().unwrap().to_string();
    for record in &source {
        let logid = record["logid"].as_str().unwrap();
        let aggr = record["aggr_msg_id"].as_str().unwrap();
        if logid.starts_with('r') && ["r1", "r2", "r3"].contains(&logid) {
            assert_eq!(aggr, cluster_id);
        } else {
            assert_ne!(aggr, cluster_id);
        }
    }
}

#[tokio::test]
async fn ids_continue_above_an_existing_watermark() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    let base = Utc::now();

    fs::write(
        dir.path().join("target.jsonl"),
        json!({"id": 17, "message": "earlier run", "total_logs": 1}).to_string() + "\n",
    )
    .unwrap();
    fs::write(
        dir.path().join("source.jsonl"),
        source_line("r1", "solo entry", "web-1", base - Duration::minutes(1), 0.3),
    )
    .unwrap();

    let summary = run_once(&config).await.unwrap();
    assert_eq!(summary.aggregated, 1);

    let target = read_lines(&dir.path().join("target.jsonl"));
    assert_eq!(target.len(), 2);
    assert_eq!(target[1]["id"].as_i64(), Some(18));
}

#[tokio::test]
async fn generated_scheme_issues_uuids() {
    let dir = TempDir::new().unwrap();
    let mut config = test_config(&dir);
    config.storage.id_scheme = IdScheme::Generated;
    let base = Utc::now();

    fs::write(
        dir.path().join("source.jsonl"),
        source_line("r1", "solo entry", "web-1", base - Duration::minutes(1), 0.3),
    )
    .unwrap();

    run_once(&config).await.unwrap();

    let target = read_lines(&dir.path().join("target.jsonl"));
    let id = target[0]["id"].as_str().expect("generated ids are strings");
    assert!(uuid::Uuid::parse_str(id).is_ok());
}

#[tokio::test]
async fn empty_batch_is_a_successful_no_op() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    fs::write(dir.path().join("source.jsonl"), "").unwrap();

    let summary = run_once(&config).await.unwrap();
    assert_eq!(summary.retrieved, 0);
    assert_eq!(summary.aggregated, 0);
    assert_eq!(summary.stored, 0);

    // The sink is never reached.
    assert!(!dir.path().join("target.jsonl").exists());
}

#[tokio::test]
async fn malformed_record_aborts_the_run() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    let base = Utc::now();

    let lines = [
        source_line("r1", "fine entry", "web-1", base - Duration::minutes(1), 0.3),
        // No hostname.
        json!({
            "logid": "r2",
            "message": "broken entry",
            "timestamp": (base - Duration::minutes(2)).format("%Y-%m-%d %H:%M:%S").to_string(),
            "anomaly_score": 0.3,
        })
        .to_string(),
    ];
    fs::write(dir.path().join("source.jsonl"), lines.join("\n")).unwrap();

    let err = run_once(&config).await.unwrap_err();
    assert!(err.to_string().contains("missing required field 'hostname'"));
    assert!(!dir.path().join("target.jsonl").exists());
}

#[tokio::test]
async fn hostname_filter_restricts_the_batch() {
    let dir = TempDir::new().unwrap();
    let mut config = test_config(&dir);
    config.retrieval.hostname = Some("web-1".to_string());
    let base = Utc::now();

    let lines = [
        source_line("r1", "kept entry", "web-1", base - Duration::minutes(1), 0.3),
        source_line("r2", "filtered entry", "web-2", base - Duration::minutes(2), 0.3),
    ];
    fs::write(dir.path().join("source.jsonl"), lines.join("\n")).unwrap();

    let summary = run_once(&config).await.unwrap();
    assert_eq!(summary.retrieved, 1);

    let source = read_lines(&dir.path().join("source.jsonl"));
    assert!(source[0].get("aggr_msg_id").is_some());
    assert!(source[1].get("aggr_msg_id").is_none());
}
