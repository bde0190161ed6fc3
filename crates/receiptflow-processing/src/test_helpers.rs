//! Test doubles for the processing trigger

use async_trait::async_trait;
use chrono::Utc;
use receiptflow_core::{RecordPatch, UploadDescriptor};
use receiptflow_db::{InMemoryTrackingStore, TrackingStore};
use receiptflow_storage::{LocalStorage, ObjectFinalizedEvent, ObjectStorage, PutObjectRequest};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

use crate::recognizer::TextRecognizer;
use crate::trigger::ReceiptProcessor;

/// Recognizer that replays scripted results, repeating the last one
pub struct StubRecognizer {
    script: Vec<Result<String, String>>,
    calls: AtomicUsize,
}

impl StubRecognizer {
    pub fn new(script: Vec<Result<String, String>>) -> Arc<Self> {
        assert!(!script.is_empty(), "script needs at least one result");
        Arc::new(Self {
            script,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn text(text: &str) -> Arc<Self> {
        Self::new(vec![Ok(text.to_string())])
    }

    pub fn failing(message: &str) -> Arc<Self> {
        Self::new(vec![Err(message.to_string())])
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TextRecognizer for StubRecognizer {
    fn name(&self) -> &str {
        "stub"
    }

    async fn recognize(&self, _image: &[u8]) -> anyhow::Result<String> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        let result = &self.script[call.min(self.script.len() - 1)];
        result.clone().map_err(anyhow::Error::msg)
    }
}

/// Local storage in a temp dir plus an in-memory tracking store
pub struct Fixture {
    pub dir: TempDir,
    pub storage: Arc<LocalStorage>,
    pub store: Arc<InMemoryTrackingStore>,
}

impl Fixture {
    pub async fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(
            dir.path().join("store"),
            "receipts-test",
            "http://localhost:8080/storage".to_string(),
        )
        .await
        .unwrap();
        Self {
            storage: Arc::new(storage),
            store: Arc::new(InMemoryTrackingStore::new()),
            dir,
        }
    }

    pub fn processor(&self, recognizer: Arc<dyn TextRecognizer>) -> ReceiptProcessor {
        ReceiptProcessor::new(self.storage.clone(), self.store.clone(), recognizer)
    }

    /// Store a receipt image for `doc-1` owned by `user123` and record it as
    /// `uploaded`, the way the uploader does after the transfer.
    pub async fn put_receipt(&self, key: &str) -> ObjectFinalizedEvent {
        let event = self.put_object(key).await;
        self.register("doc-1").await;
        self.store
            .update("doc-1", RecordPatch::uploaded(format!("http://localhost:8080/storage/{}", key)))
            .await
            .unwrap();
        event
    }

    /// Write the uploader's `uploading` registration for `doc_id`.
    pub async fn register(&self, doc_id: &str) {
        let descriptor = UploadDescriptor {
            doc_id: doc_id.to_string(),
            owner_id: "user123".to_string(),
            file_name: "receipt.jpg".to_string(),
            file_size: 7,
            created_at: Utc::now(),
        };
        self.store
            .set_merge(doc_id, RecordPatch::uploading(&descriptor))
            .await
            .unwrap();
    }

    /// Store a receipt image for `doc-1` without touching the tracking store.
    pub async fn put_object(&self, key: &str) -> ObjectFinalizedEvent {
        let source = self.dir.path().join("receipt.jpg");
        tokio::fs::write(&source, b"\xff\xd8\xffjpeg").await.unwrap();
        let mut metadata = HashMap::new();
        metadata.insert("docId".to_string(), "doc-1".to_string());
        metadata.insert("ownerId".to_string(), "user123".to_string());
        let object = self
            .storage
            .put_object(
                PutObjectRequest {
                    key: key.to_string(),
                    source,
                    content_type: "image/jpeg".to_string(),
                    metadata,
                },
                None,
            )
            .await
            .unwrap();
        ObjectFinalizedEvent::from(&object)
    }
}
