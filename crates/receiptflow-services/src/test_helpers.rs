//! Mock backends for testing
//!
//! These mocks allow testing the orchestrator without a filesystem backend and
//! with failures injected at chosen points.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use receiptflow_core::{ReceiptStatus, RecordPatch, StorageBackend, TrackingRecord, UploadProgress};
use receiptflow_db::{InMemoryTrackingStore, RecordStream, StoreError, StoreResult, TrackingStore};
use receiptflow_storage::{
    ObjectStorage, ProgressSender, PutObjectRequest, StorageError, StorageResult, StoredObject,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

#[derive(Debug, Clone)]
pub enum TransferOutcome {
    Succeed,
    /// The object is written but its URL cannot be resolved.
    SucceedWithoutUrl,
    Fail {
        code: Option<String>,
        message: String,
    },
    /// Never completes.
    Hang,
}

/// Storage whose transfers follow a script
pub struct ScriptedStorage {
    outcome: TransferOutcome,
    progress_script: Mutex<Vec<(u64, u64)>>,
    puts: Mutex<Vec<PutObjectRequest>>,
    objects: Mutex<HashMap<String, Bytes>>,
}

impl ScriptedStorage {
    pub fn new(outcome: TransferOutcome) -> Self {
        Self {
            outcome,
            progress_script: Mutex::new(Vec::new()),
            puts: Mutex::new(Vec::new()),
            objects: Mutex::new(HashMap::new()),
        }
    }

    /// Raw `(bytes, total)` reports sent before the outcome, in order.
    pub fn set_progress_script(&self, script: Vec<(u64, u64)>) {
        *self.progress_script.lock().unwrap() = script;
    }

    pub fn put_count(&self) -> usize {
        self.puts.lock().unwrap().len()
    }

    pub fn last_put(&self) -> Option<PutObjectRequest> {
        self.puts.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl ObjectStorage for ScriptedStorage {
    fn bucket(&self) -> &str {
        "receipts-test"
    }

    fn backend_type(&self) -> StorageBackend {
        StorageBackend::Local
    }

    async fn put_object(
        &self,
        request: PutObjectRequest,
        progress: Option<ProgressSender>,
    ) -> StorageResult<StoredObject> {
        self.puts.lock().unwrap().push(request.clone());

        let script = self.progress_script.lock().unwrap().clone();
        if let Some(tx) = &progress {
            for (bytes, total) in script {
                let _ = tx.send(UploadProgress {
                    bytes_transferred: bytes,
                    total_bytes: total,
                    percentage: 0,
                });
            }
        }

        match &self.outcome {
            TransferOutcome::Succeed => {
                let data = tokio::fs::read(&request.source).await?;
                self.objects
                    .lock()
                    .unwrap()
                    .insert(request.key.clone(), Bytes::from(data.clone()));
                Ok(StoredObject {
                    bucket: self.bucket().to_string(),
                    key: request.key,
                    size: data.len() as u64,
                    content_type: request.content_type,
                    metadata: request.metadata,
                    time_created: Utc::now(),
                })
            }
            TransferOutcome::SucceedWithoutUrl => Ok(StoredObject {
                bucket: self.bucket().to_string(),
                key: request.key,
                size: 0,
                content_type: request.content_type,
                metadata: request.metadata,
                time_created: Utc::now(),
            }),
            TransferOutcome::Fail { code, message } => {
                Err(StorageError::transfer(code.as_deref(), message.clone()))
            }
            TransferOutcome::Hang => std::future::pending().await,
        }
    }

    async fn public_url(&self, key: &str) -> StorageResult<String> {
        if self.objects.lock().unwrap().contains_key(key) {
            Ok(format!("https://storage.test/receipts-test/{}", key))
        } else {
            Err(StorageError::NotFound(key.to_string()))
        }
    }

    async fn download(&self, key: &str) -> StorageResult<Bytes> {
        self.objects
            .lock()
            .unwrap()
            .get(key)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        Ok(self.objects.lock().unwrap().contains_key(key))
    }
}

/// In-memory store whose merges or updates can be made to fail
pub struct FailingStore {
    inner: InMemoryTrackingStore,
    fail_set_merge: bool,
    fail_uploaded: bool,
    updates: AtomicUsize,
}

impl FailingStore {
    pub fn failing_set_merge() -> Self {
        Self {
            inner: InMemoryTrackingStore::new(),
            fail_set_merge: true,
            fail_uploaded: false,
            updates: AtomicUsize::new(0),
        }
    }

    /// Store that rejects every `uploaded` write and accepts the rest.
    pub fn failing_uploaded_write() -> Self {
        Self {
            inner: InMemoryTrackingStore::new(),
            fail_set_merge: false,
            fail_uploaded: true,
            updates: AtomicUsize::new(0),
        }
    }

    pub fn inner(&self) -> &InMemoryTrackingStore {
        &self.inner
    }

    pub fn update_count(&self) -> usize {
        self.updates.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TrackingStore for FailingStore {
    async fn set_merge(&self, doc_id: &str, patch: RecordPatch) -> StoreResult<TrackingRecord> {
        if self.fail_set_merge {
            return Err(StoreError::Database("connection refused".to_string()));
        }
        self.inner.set_merge(doc_id, patch).await
    }

    async fn update(&self, doc_id: &str, patch: RecordPatch) -> StoreResult<TrackingRecord> {
        self.updates.fetch_add(1, Ordering::SeqCst);
        if self.fail_uploaded && patch.status == Some(ReceiptStatus::Uploaded) {
            return Err(StoreError::Database("connection reset".to_string()));
        }
        self.inner.update(doc_id, patch).await
    }

    async fn get(&self, doc_id: &str) -> StoreResult<Option<TrackingRecord>> {
        self.inner.get(doc_id).await
    }

    async fn subscribe(&self, doc_id: &str) -> StoreResult<RecordStream> {
        self.inner.subscribe(doc_id).await
    }
}
