use async_trait::async_trait;
use futures::Stream;
use receiptflow_core::{RecordPatch, TrackingRecord};
use std::pin::Pin;
use thiserror::Error;

/// Tracking store errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Tracking record not found: {0}")]
    NotFound(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Tracking store is closed")]
    Closed,
}

#[cfg(feature = "postgres")]
impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        StoreError::Database(err.to_string())
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Snapshots of one record, in store write order.
pub type RecordStream = Pin<Box<dyn Stream<Item = TrackingRecord> + Send>>;

/// Document store holding tracking records, keyed by `docId`.
#[async_trait]
pub trait TrackingStore: Send + Sync {
    /// Create the record or merge `patch` into it.
    async fn set_merge(&self, doc_id: &str, patch: RecordPatch) -> StoreResult<TrackingRecord>;

    /// Merge `patch` into an existing record; fails with `NotFound` when absent.
    async fn update(&self, doc_id: &str, patch: RecordPatch) -> StoreResult<TrackingRecord>;

    async fn get(&self, doc_id: &str) -> StoreResult<Option<TrackingRecord>>;

    /// Stream the current snapshot (if the record exists) followed by one
    /// snapshot per write. Dropping the stream unsubscribes.
    async fn subscribe(&self, doc_id: &str) -> StoreResult<RecordStream>;
}
