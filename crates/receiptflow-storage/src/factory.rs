#[cfg(feature = "storage-local")]
use crate::LocalStorage;
use crate::{ObjectFinalizedEvent, ObjectStorage, StorageBackend, StorageResult};
#[cfg(not(feature = "storage-local"))]
use crate::StorageError;
use receiptflow_core::AppConfig;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Create a storage backend based on configuration
///
/// When `finalize_tx` is given, every completed write is reported on it.
pub async fn create_storage(
    config: &AppConfig,
    finalize_tx: Option<mpsc::UnboundedSender<ObjectFinalizedEvent>>,
) -> StorageResult<Arc<dyn ObjectStorage>> {
    match config.storage_backend {
        #[cfg(feature = "storage-local")]
        StorageBackend::Local => {
            let mut storage = LocalStorage::new(
                config.local_storage_path.clone(),
                config.backend.storage_bucket.clone(),
                config.local_storage_base_url.clone(),
            )
            .await?;
            if let Some(tx) = finalize_tx {
                storage = storage.with_finalize_notifier(tx);
            }
            Ok(Arc::new(storage))
        }

        #[cfg(not(feature = "storage-local"))]
        StorageBackend::Local => {
            let _ = finalize_tx;
            Err(StorageError::ConfigError(
                "Local storage backend not available (storage-local feature not enabled)"
                    .to_string(),
            ))
        }
    }
}
