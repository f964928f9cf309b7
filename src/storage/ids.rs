use super::traits::{AggregatedId, IdIssuer, StorageError};
use async_trait::async_trait;
use std::sync::Arc;
use uuid::Uuid;

/// Read side of sequential issuance: the highest id already present in the
/// target store. Backends expose this so the issuer stays storage-agnostic.
#[async_trait]
pub trait WatermarkQuery: Send + Sync {
    async fn max_issued_id(&self) -> Result<i64, StorageError>;
}

/// Issues `watermark + 1, watermark + 2, …`. The watermark is read once per
/// run without any lock, so concurrent runs against the same target store can
/// collide; callers serialize runs per sink.
pub struct SequentialIdIssuer {
    store: Arc<dyn WatermarkQuery>,
    next: i64,
}

impl SequentialIdIssuer {
    pub fn new(store: Arc<dyn WatermarkQuery>) -> Self {
        Self { store, next: 1 }
    }
}

#[async_trait]
impl IdIssuer for SequentialIdIssuer {
    async fn watermark(&mut self) -> Result<i64, StorageError> {
        let watermark = self.store.max_issued_id().await?;
        self.next = watermark + 1;
        Ok(watermark)
    }

    fn next(&mut self) -> AggregatedId {
        let id = AggregatedId::Sequential(self.next);
        self.next += 1;
        id
    }
}

/// Issues an independent UUID per record; the watermark is irrelevant to this
/// scheme and reported as 0.
pub struct GeneratedIdIssuer;

#[async_trait]
impl IdIssuer for GeneratedIdIssuer {
    async fn watermark(&mut self) -> Result<i64, StorageError> {
        Ok(0)
    }

    fn next(&mut self) -> AggregatedId {
        AggregatedId::Generated(Uuid::new_v4())
    }
}
