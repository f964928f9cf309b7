use crate::aggregate::{stats, template};
use crate::storage::traits::{
    AggregatedId, AggregatedRecord, BackReferenceMap, IdIssuer, LogRecord, StorageError,
};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("got {labels} cluster labels for {records} records")]
    LabelMismatch { records: usize, labels: usize },

    #[error("watermark fetch failed: {0}")]
    Watermark(#[from] StorageError),
}

/// Output of one aggregation pass: the synthesized records, ascending by
/// cluster label, and the back-reference map the sink uses to update the
/// source records.
#[derive(Debug, Default)]
pub struct Aggregation {
    pub records: Vec<AggregatedRecord>,
    pub back_refs: BackReferenceMap,
}

/// Collapse a labeled batch into aggregated records.
///
/// Labels partition the batch: every non-negative label becomes one record
/// with a synthesized template, and every noise member (label -1) becomes its
/// own single-member record with its message kept verbatim. The watermark is
/// requested from the issuer exactly once, before any id is drawn; under the
/// sequential scheme ids then run gapless from `watermark + 1` in label
/// iteration order (noise first, since -1 sorts below all cluster labels).
///
/// The engine never writes to storage; persistence and the source-side
/// back-reference update belong to the sink.
pub async fn aggregate(
    records: &[LogRecord],
    labels: &[i32],
    issuer: &mut dyn IdIssuer,
    now: DateTime<Utc>,
) -> Result<Aggregation, EngineError> {
    if records.len() != labels.len() {
        return Err(EngineError::LabelMismatch {
            records: records.len(),
            labels: labels.len(),
        });
    }

    if records.is_empty() {
        return Ok(Aggregation::default());
    }

    // Complete partition of batch indices, ascending by label. Members keep
    // batch order within each cluster.
    let mut partition: BTreeMap<i32, Vec<usize>> = BTreeMap::new();
    for (index, &label) in labels.iter().enumerate() {
        partition.entry(label).or_default().push(index);
    }

    let watermark = issuer.watermark().await?;
    debug!(
        watermark,
        clusters = partition.len(),
        records = records.len(),
        "aggregating batch"
    );

    let mut result = Aggregation::default();

    for (&label, members) in &partition {
        if label == -1 {
            // Noise members are never merged; each keeps its raw message.
            for &index in members {
                push_record(&mut result, issuer.next(), &records[index..=index], None, now);
            }
        } else {
            let member_records: Vec<LogRecord> =
                members.iter().map(|&i| records[i].clone()).collect();
            let messages: Vec<&str> = member_records.iter().map(|r| r.message.as_str()).collect();
            let template = template::synthesize_template(&messages);
            push_record(&mut result, issuer.next(), &member_records, Some(template), now);
        }
    }

    Ok(result)
}

fn push_record(
    result: &mut Aggregation,
    id: AggregatedId,
    members: &[LogRecord],
    template: Option<String>,
    now: DateTime<Utc>,
) {
    let times: Vec<DateTime<Utc>> = members.iter().map(|r| r.timestamp).collect();
    let scores: Vec<f64> = members.iter().map(|r| r.anomaly_score).collect();
    let original_msgs_ids: Vec<String> = members.iter().map(|r| r.id.clone()).collect();

    let message = match template {
        Some(t) => t,
        None => members[0].message.clone(),
    };

    let record = AggregatedRecord {
        id,
        message,
        total_logs: members.len() as u64,
        average_datetime: stats::mean_timestamp(&times).unwrap_or(now),
        hostname: stats::mode_hostname(members.iter().map(|r| r.hostname.as_str()))
            .unwrap_or_default()
            .to_string(),
        average_anomaly_score: stats::mean_score(&scores).unwrap_or(0.0),
        was_added_at: now,
        original_msgs_ids: original_msgs_ids.clone(),
    };

    result.back_refs.insert(id, original_msgs_ids);
    result.records.push(record);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::ids::GeneratedIdIssuer;
    use chrono::TimeZone;

    fn record(id: &str, message: &str) -> LogRecord {
        LogRecord {
            id: id.to_string(),
            message: message.to_string(),
            timestamp: Utc.with_ymd_and_hms(2023, 5, 1, 0, 0, 0).unwrap(),
            hostname: "host-a".to_string(),
            anomaly_score: 0.5,
        }
    }

    #[tokio::test]
    async fn empty_batch_is_a_no_op() {
        let mut issuer = GeneratedIdIssuer;
        let out = aggregate(&[], &[], &mut issuer, Utc::now()).await.unwrap();
        assert!(out.records.is_empty());
        assert!(out.back_refs.is_empty());
    }

    #[tokio::test]
    async fn label_count_mismatch_is_an_error() {
        let mut issuer = GeneratedIdIssuer;
        let batch = [record("1", "a"), record("2", "b")];
        let err = aggregate(&batch, &[0], &mut issuer, Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::LabelMismatch { records: 2, labels: 1 }
        ));
    }

    #[tokio::test]
    async fn noise_sorts_before_clusters() {
        let mut issuer = GeneratedIdIssuer;
        let batch = [record("1", "a b"), record("2", "a c"), record("3", "odd")];
        let out = aggregate(&batch, &[0, 0, -1], &mut issuer, Utc::now())
            .await
            .unwrap();
        assert_eq!(out.records.len(), 2);
        assert_eq!(out.records[0].message, "odd");
        assert_eq!(out.records[1].message, "a ***");
    }
}
