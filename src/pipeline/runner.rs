use crate::aggregate::{self, EngineError};
use crate::cleaner::MessageCleaner;
use crate::cluster::{Clusterer, DbscanClusterer};
use crate::config::types::Config;
use crate::embed::{Embedder, HashEmbedder};
use crate::storage::dispatch;
use crate::storage::traits::{RetrieveQuery, StorageError};
use chrono::Utc;
use thiserror::Error;
use tracing::{info, warn, Instrument};

#[derive(Debug, Error)]
pub enum RunError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("aggregation error: {0}")]
    Engine(#[from] EngineError),
}

/// What one run did. `failed` counts aggregated records the sink could not
/// persist or relink; the run itself still succeeds when it is non-zero.
#[derive(Debug, Default)]
pub struct RunSummary {
    pub retrieved: usize,
    pub aggregated: usize,
    pub stored: usize,
    pub failed: usize,
}

/// Execute one full aggregation run with the default embedder and clusterer:
/// retrieve, embed, cluster, aggregate, persist.
pub async fn run_once(config: &Config) -> Result<RunSummary, RunError> {
    let embedder = HashEmbedder::new(MessageCleaner::new(), config.clustering.vector_length);
    let clusterer = DbscanClusterer::new(config.clustering.eps, config.clustering.min_samples);
    run_with(config, &embedder, &clusterer).await
}

/// Like [`run_once`], with caller-provided embedding and clustering.
pub async fn run_with(
    config: &Config,
    embedder: &dyn Embedder,
    clusterer: &dyn Clusterer,
) -> Result<RunSummary, RunError> {
    let span = tracing::info_span!(
        "aggregation_run",
        backend = config.storage.backend.as_str(),
        id_scheme = config.storage.id_scheme.as_str(),
    );
    run_inner(config, embedder, clusterer).instrument(span).await
}

async fn run_inner(
    config: &Config,
    embedder: &dyn Embedder,
    clusterer: &dyn Clusterer,
) -> Result<RunSummary, RunError> {
    // Connections are scoped to `handles`; every return path below drops
    // them.
    let mut handles = dispatch::resolve(config).await?;

    let query = RetrieveQuery {
        window: config.retrieval.window,
        max_entries: config.retrieval.max_entries,
        hostname: config.retrieval.hostname.clone(),
    };
    let records = handles.source.retrieve(&query).await?;
    info!(records = records.len(), "retrieved batch");

    if records.is_empty() {
        info!("empty batch, nothing to aggregate");
        return Ok(RunSummary::default());
    }

    let messages: Vec<String> = records.iter().map(|r| r.message.clone()).collect();
    let vectors = embedder.embed(&messages);
    let labels = clusterer.cluster(&vectors);

    let aggregation =
        aggregate::aggregate(&records, &labels, handles.issuer.as_mut(), Utc::now()).await?;
    info!(
        aggregated = aggregation.records.len(),
        "synthesized aggregated records"
    );

    let report = handles
        .sink
        .store(&aggregation.records, &aggregation.back_refs)
        .await?;
    for failure in &report.failures {
        warn!(id = %failure.id, error = %failure.error, "failed to store aggregated record");
    }
    if report.is_complete() {
        info!(stored = report.stored.len(), "run complete");
    } else {
        warn!(
            stored = report.stored.len(),
            failed = report.failures.len(),
            "run complete with storage failures"
        );
    }

    Ok(RunSummary {
        retrieved: records.len(),
        aggregated: aggregation.records.len(),
        stored: report.stored.len(),
        failed: report.failures.len(),
    })
}
