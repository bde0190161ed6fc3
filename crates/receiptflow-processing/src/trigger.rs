//! Remote processing trigger
//!
//! [`ReceiptProcessor::handle`] runs once per object-finalize event. Events for
//! other buckets, non-image objects, objects outside `receipts/` and objects
//! without `docId`/`ownerId` metadata are skipped without touching the store.
//!
//! Storage announces an object as soon as its bytes land, which is before the
//! uploader records `uploaded`. The trigger owns `uploaded → processing`, so an
//! accepted event first waits (bounded by the upload wait) for the record to
//! leave `uploading`.

use futures::StreamExt;
use receiptflow_core::constants::{METADATA_DOC_ID, METADATA_OWNER_ID};
use receiptflow_core::{ReceiptStatus, RecordPatch, TrackingRecord};
use receiptflow_db::{StoreError, TrackingStore};
use receiptflow_storage::{is_receipt_key, ObjectFinalizedEvent, ObjectStorage};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::sync::Arc;
use std::time::Duration;

use crate::error::ProcessingError;
use crate::recognizer::TextRecognizer;

/// Why an event was ignored
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    OtherBucket,
    NotAnImage,
    OutsideReceipts,
    MissingMetadata,
    /// The tracking record is already `done` or `error`.
    AlreadyFinished,
}

impl Display for SkipReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        let reason = match self {
            SkipReason::OtherBucket => "object belongs to another bucket",
            SkipReason::NotAnImage => "content type is not an image",
            SkipReason::OutsideReceipts => "object is outside the receipts prefix",
            SkipReason::MissingMetadata => "docId or ownerId metadata is missing",
            SkipReason::AlreadyFinished => "tracking record is already terminal",
        };
        f.write_str(reason)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TriggerOutcome {
    Skipped(SkipReason),
    /// Recognition finished; carries the record after the `done` write.
    Completed(TrackingRecord),
}

/// How long an accepted event waits for the uploader's `uploaded` write.
pub const DEFAULT_UPLOAD_WAIT: Duration = Duration::from_secs(30);

/// Processes finalized receipt images from one bucket
#[derive(Clone)]
pub struct ReceiptProcessor {
    storage: Arc<dyn ObjectStorage>,
    store: Arc<dyn TrackingStore>,
    recognizer: Arc<dyn TextRecognizer>,
    upload_wait: Duration,
}

impl ReceiptProcessor {
    /// The processor is bound to `storage.bucket()`.
    pub fn new(
        storage: Arc<dyn ObjectStorage>,
        store: Arc<dyn TrackingStore>,
        recognizer: Arc<dyn TextRecognizer>,
    ) -> Self {
        Self {
            storage,
            store,
            recognizer,
            upload_wait: DEFAULT_UPLOAD_WAIT,
        }
    }

    pub fn with_upload_wait(mut self, upload_wait: Duration) -> Self {
        self.upload_wait = upload_wait;
        self
    }

    pub fn bucket(&self) -> &str {
        self.storage.bucket()
    }

    /// Run the trigger for one event.
    ///
    /// On a failure after the event was accepted the record is moved to
    /// `error` and the failure is returned for the dispatcher to log.
    pub async fn handle(
        &self,
        event: &ObjectFinalizedEvent,
    ) -> Result<TriggerOutcome, ProcessingError> {
        self.attempt(event, true).await
    }

    /// One delivery of `event`. With `record_failure` unset a failure is
    /// returned without the `error` write, leaving the record open for a
    /// redelivery.
    #[tracing::instrument(skip(self, event), fields(bucket = %event.bucket, object = %event.name))]
    pub(crate) async fn attempt(
        &self,
        event: &ObjectFinalizedEvent,
        record_failure: bool,
    ) -> Result<TriggerOutcome, ProcessingError> {
        let (doc_id, owner_id) = match self.accept(event) {
            Ok(ids) => ids,
            Err(reason) => {
                tracing::debug!(reason = %reason, "Skipping finalized object");
                return Ok(TriggerOutcome::Skipped(reason));
            }
        };

        match self.process(doc_id, owner_id, event).await {
            Ok(None) => {
                tracing::debug!(
                    doc_id = %doc_id,
                    reason = %SkipReason::AlreadyFinished,
                    "Skipping finalized object"
                );
                Ok(TriggerOutcome::Skipped(SkipReason::AlreadyFinished))
            }
            Ok(Some(record)) => {
                tracing::info!(
                    doc_id = %doc_id,
                    text_length = record.extracted_text.as_deref().map_or(0, str::len),
                    "Receipt processed"
                );
                Ok(TriggerOutcome::Completed(record))
            }
            Err(e) => {
                tracing::warn!(doc_id = %doc_id, error = %e, "Receipt processing failed");
                if !record_failure {
                    return Err(e);
                }
                if let Err(write_err) = self
                    .store
                    .set_merge(doc_id, RecordPatch::error(e.to_string()))
                    .await
                {
                    tracing::error!(
                        doc_id = %doc_id,
                        error = %write_err,
                        "Failed to record processing failure"
                    );
                }
                Err(e)
            }
        }
    }

    fn accept<'a>(&self, event: &'a ObjectFinalizedEvent) -> Result<(&'a str, &'a str), SkipReason> {
        if event.bucket != self.bucket() {
            return Err(SkipReason::OtherBucket);
        }
        let is_image = event
            .content_type
            .as_deref()
            .is_some_and(|ct| ct.starts_with("image/"));
        if !is_image {
            return Err(SkipReason::NotAnImage);
        }
        if !is_receipt_key(&event.name) {
            return Err(SkipReason::OutsideReceipts);
        }
        match (
            event.metadata_value(METADATA_DOC_ID),
            event.metadata_value(METADATA_OWNER_ID),
        ) {
            (Some(doc_id), Some(owner_id)) => Ok((doc_id, owner_id)),
            _ => Err(SkipReason::MissingMetadata),
        }
    }

    /// Returns `None` when the record finished before this delivery started.
    async fn process(
        &self,
        doc_id: &str,
        owner_id: &str,
        event: &ObjectFinalizedEvent,
    ) -> Result<Option<TrackingRecord>, ProcessingError> {
        if !self.wait_for_upload(doc_id).await? {
            return Ok(None);
        }

        self.store
            .set_merge(doc_id, RecordPatch::processing(owner_id, self.recognizer.name()))
            .await?;

        let image = self.storage.download(&event.name).await?;
        tracing::debug!(doc_id = %doc_id, image_size = image.len(), "Downloaded receipt image");

        let text = self
            .recognizer
            .recognize(&image)
            .await
            .map_err(ProcessingError::Recognition)?;

        Ok(Some(self.store.set_merge(doc_id, RecordPatch::done(text)).await?))
    }

    /// Wait until the record is `uploaded` (or `processing`, on redelivery).
    ///
    /// Returns `false` for a terminal record.
    async fn wait_for_upload(&self, doc_id: &str) -> Result<bool, ProcessingError> {
        let mut changes = self.store.subscribe(doc_id).await?;
        let ready = async {
            while let Some(record) = changes.next().await {
                match record.status {
                    ReceiptStatus::Uploading => {
                        tracing::debug!(doc_id = %doc_id, "Waiting for the upload to be recorded");
                    }
                    ReceiptStatus::Uploaded | ReceiptStatus::Processing => return Ok(true),
                    ReceiptStatus::Done | ReceiptStatus::Error => return Ok(false),
                }
            }
            Err(ProcessingError::Tracking(StoreError::Closed))
        };

        match tokio::time::timeout(self.upload_wait, ready).await {
            Ok(result) => result,
            Err(_) => Err(ProcessingError::UploadNotRecorded {
                doc_id: doc_id.to_string(),
                waited: self.upload_wait,
            }),
        }
    }
}
