use receiptflow_db::StoreError;
use receiptflow_storage::StorageError;
use std::time::Duration;

/// Failure of one trigger run after the event was accepted
#[derive(Debug, thiserror::Error)]
pub enum ProcessingError {
    #[error("Failed to update tracking record: {0}")]
    Tracking(#[from] StoreError),

    #[error("Upload of {doc_id} was not recorded within {waited:?}")]
    UploadNotRecorded { doc_id: String, waited: Duration },

    #[error("Failed to download receipt image: {0}")]
    Download(#[from] StorageError),

    #[error("Text recognition failed: {0:#}")]
    Recognition(anyhow::Error),
}
