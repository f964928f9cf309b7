use super::duckdb::DuckDbStorage;
use super::ids::{GeneratedIdIssuer, SequentialIdIssuer, WatermarkQuery};
use super::jsonl::JsonlStorage;
use super::traits::{IdIssuer, LogSink, LogSource, StorageError};
use crate::config::types::{Backend, Config, IdScheme};
use std::sync::Arc;
use tracing::info;

/// Concrete source/sink/issuer for one run. Connections live as long as this
/// value; dropping it releases them on every exit path, including the
/// empty-batch early return.
pub struct StorageHandles {
    pub source: Arc<dyn LogSource>,
    pub sink: Arc<dyn LogSink>,
    pub issuer: Box<dyn IdIssuer>,
}

/// Resolve the configured backend to concrete implementations, once per run.
///
/// The backend set is closed: adding one means implementing the three traits
/// and adding a match arm here. An unrecognized name never reaches this point;
/// it is already rejected when the config is parsed.
pub async fn resolve(config: &Config) -> Result<StorageHandles, StorageError> {
    info!(
        backend = config.storage.backend.as_str(),
        id_scheme = config.storage.id_scheme.as_str(),
        "resolving storage backend"
    );

    match config.storage.backend {
        Backend::DuckDb => {
            let duckdb_config = config.storage.duckdb.as_ref().ok_or_else(|| {
                StorageError::Configuration("storage.duckdb section is missing".to_string())
            })?;
            let storage = Arc::new(DuckDbStorage::open(duckdb_config, &config.fields)?);
            storage.init_schema().await?;

            Ok(StorageHandles {
                source: storage.clone(),
                sink: storage.clone(),
                issuer: make_issuer(config.storage.id_scheme, storage),
            })
        }
        Backend::Jsonl => {
            let jsonl_config = config.storage.jsonl.as_ref().ok_or_else(|| {
                StorageError::Configuration("storage.jsonl section is missing".to_string())
            })?;
            let storage = Arc::new(JsonlStorage::new(
                jsonl_config,
                &config.fields,
                &config.timestamps,
            )?);

            Ok(StorageHandles {
                source: storage.clone(),
                sink: storage.clone(),
                issuer: make_issuer(config.storage.id_scheme, storage),
            })
        }
    }
}

fn make_issuer(
    scheme: IdScheme,
    store: Arc<dyn WatermarkQuery>,
) -> Box<dyn IdIssuer> {
    match scheme {
        IdScheme::Sequential => Box::new(SequentialIdIssuer::new(store)),
        IdScheme::Generated => Box::new(GeneratedIdIssuer),
    }
}
