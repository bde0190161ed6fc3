//! Upload orchestration
//!
//! One upload attempt runs: validate → register → transfer (with progress) →
//! finalize. The tracking record is written once before the transfer. After it
//! either the `uploaded` write lands or a best-effort `error` write follows.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use receiptflow_core::constants::{METADATA_DOC_ID, METADATA_OWNER_ID};
use receiptflow_core::validation::content_type_for;
use receiptflow_core::{
    FileValidator, ReceiptStatus, RecordPatch, UploadDescriptor, UploadError, UploadProgress,
};
use receiptflow_db::TrackingStore;
use receiptflow_storage::{object_key, ObjectStorage, PutObjectRequest, StorageError, StorageResult};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::progress::ProgressFilter;

/// Client-side upload pipeline
pub struct UploadOrchestrator {
    storage: Arc<dyn ObjectStorage>,
    store: Arc<dyn TrackingStore>,
    validator: FileValidator,
    transfer_timeout: Option<Duration>,
}

impl UploadOrchestrator {
    pub fn new(storage: Arc<dyn ObjectStorage>, store: Arc<dyn TrackingStore>) -> Self {
        Self {
            storage,
            store,
            validator: FileValidator::default(),
            transfer_timeout: None,
        }
    }

    pub fn with_validator(mut self, validator: FileValidator) -> Self {
        self.validator = validator;
        self
    }

    /// Fail transfers that take longer than `timeout`.
    pub fn with_transfer_timeout(mut self, timeout: Duration) -> Self {
        self.transfer_timeout = Some(timeout);
        self
    }

    /// Upload `local_file` under `descriptor` and return its download URL.
    pub async fn upload(
        &self,
        local_file: &Path,
        descriptor: &UploadDescriptor,
        progress: Option<mpsc::UnboundedSender<UploadProgress>>,
    ) -> Result<String, UploadError> {
        self.upload_with_cancel(local_file, descriptor, progress, CancellationToken::new())
            .await
    }

    /// Like [`upload`](Self::upload), aborting the transfer when `cancel` fires.
    #[tracing::instrument(
        skip(self, local_file, descriptor, progress, cancel),
        fields(doc_id = %descriptor.doc_id, owner_id = %descriptor.owner_id)
    )]
    pub async fn upload_with_cancel(
        &self,
        local_file: &Path,
        descriptor: &UploadDescriptor,
        progress: Option<mpsc::UnboundedSender<UploadProgress>>,
        cancel: CancellationToken,
    ) -> Result<String, UploadError> {
        // 1. Validate before any write or transfer
        self.validator
            .validate(&descriptor.file_name, descriptor.file_size)?;
        let actual_size = tokio::fs::metadata(local_file)
            .await
            .map_err(|e| {
                UploadError::storage(
                    None,
                    format!("Failed to read {}: {}", local_file.display(), e),
                )
            })?
            .len();
        self.validator.validate_file_size(actual_size)?;
        let key = object_key(
            &descriptor.owner_id,
            descriptor.timestamp_millis(),
            &descriptor.file_name,
        )?;

        // 2. Register the tracking record
        let registered = self
            .store
            .set_merge(&descriptor.doc_id, RecordPatch::uploading(descriptor))
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Failed to register upload");
                UploadError::storage(None, format!("Failed to register upload: {}", e))
            })?;
        // A reused descriptor cannot move an earlier attempt's record back.
        if registered.status != ReceiptStatus::Uploading {
            tracing::warn!(status = %registered.status, "Tracking record already past uploading");
            return Err(UploadError::storage(
                Some("storage/invalid-argument"),
                format!(
                    "Tracking record {} is already {}",
                    descriptor.doc_id, registered.status
                ),
            ));
        }

        // 3-4. Transfer with progress
        let mut metadata = HashMap::new();
        metadata.insert(METADATA_DOC_ID.to_string(), descriptor.doc_id.clone());
        metadata.insert(METADATA_OWNER_ID.to_string(), descriptor.owner_id.clone());
        let request = PutObjectRequest {
            key,
            source: local_file.to_path_buf(),
            content_type: content_type_for(&descriptor.file_name).to_string(),
            metadata,
        };

        let start = std::time::Instant::now();
        let url = match self.transfer(request, progress, &cancel).await {
            Ok(url) => url,
            Err(err) => return Err(self.fail(&descriptor.doc_id, err).await),
        };

        // 5. Finalize
        if let Err(e) = self
            .store
            .update(&descriptor.doc_id, RecordPatch::uploaded(url.clone()))
            .await
        {
            tracing::error!(error = %e, "Transfer completed but the upload could not be recorded");
            let err = UploadError::storage(None, format!("Failed to record upload: {}", e));
            self.record_failure(&descriptor.doc_id, &err).await;
            return Err(err);
        }

        tracing::info!(
            file_size = descriptor.file_size,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Receipt uploaded"
        );

        Ok(url)
    }

    async fn transfer(
        &self,
        request: PutObjectRequest,
        progress: Option<mpsc::UnboundedSender<UploadProgress>>,
        cancel: &CancellationToken,
    ) -> StorageResult<String> {
        let (raw_tx, mut raw_rx) = mpsc::unbounded_channel();

        let put = self.storage.put_object(request, Some(raw_tx));
        // Ends once the backend drops its sender, i.e. when the put is done.
        let forward = async move {
            let mut filter = ProgressFilter::new();
            while let Some(raw) = raw_rx.recv().await {
                if let (Some(tx), Some(p)) = (&progress, filter.admit(raw)) {
                    let _ = tx.send(p);
                }
            }
        };
        let transfer = async {
            let (object, ()) = tokio::join!(put, forward);
            object
        };
        let transfer = async {
            match self.transfer_timeout {
                Some(limit) => tokio::time::timeout(limit, transfer)
                    .await
                    .unwrap_or(Err(StorageError::TimedOut(limit))),
                None => transfer.await,
            }
        };

        let object = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(StorageError::Cancelled),
            object = transfer => object,
        }?;

        self.storage.public_url(&object.key).await
    }

    /// Record the failure on the tracking record and convert it for the caller.
    async fn fail(&self, doc_id: &str, err: StorageError) -> UploadError {
        let err = UploadError::from(err);
        tracing::warn!(code = %err.code(), error = %err, "Upload failed");
        self.record_failure(doc_id, &err).await;
        err
    }

    async fn record_failure(&self, doc_id: &str, err: &UploadError) {
        if let Err(e) = self
            .store
            .update(doc_id, RecordPatch::error(err.message()))
            .await
        {
            tracing::error!(error = %e, "Failed to record upload failure");
        }
    }
}
