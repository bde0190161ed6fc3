use async_trait::async_trait;
use chrono::Utc;
use receiptflow_core::{RecordPatch, TrackingRecord};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

use crate::store::{RecordStream, StoreError, StoreResult, TrackingStore};

type Docs = Arc<Mutex<HashMap<String, Entry>>>;

#[derive(Default)]
struct Entry {
    record: Option<TrackingRecord>,
    subscribers: Vec<mpsc::UnboundedSender<TrackingRecord>>,
}

/// Receiving end of one subscription. Dropping it unregisters the sender and
/// removes an entry left with neither a record nor subscribers.
struct Subscriber {
    rx: mpsc::UnboundedReceiver<TrackingRecord>,
    docs: Docs,
    doc_id: String,
}

impl Drop for Subscriber {
    fn drop(&mut self) {
        self.rx.close();
        let Ok(mut docs) = self.docs.lock() else {
            return;
        };
        if let Some(entry) = docs.get_mut(&self.doc_id) {
            entry.subscribers.retain(|tx| !tx.is_closed());
            if entry.record.is_none() && entry.subscribers.is_empty() {
                docs.remove(&self.doc_id);
            }
        }
    }
}

/// Process-local tracking store
///
/// Every merge and its broadcast happen under one lock, so subscribers observe
/// snapshots in exactly the order writes were applied.
#[derive(Default)]
pub struct InMemoryTrackingStore {
    docs: Docs,
}

impl InMemoryTrackingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live subscriptions on `doc_id`
    pub fn subscriber_count(&self, doc_id: &str) -> usize {
        self.docs
            .lock()
            .map(|mut docs| {
                docs.get_mut(doc_id)
                    .map(|entry| {
                        entry.subscribers.retain(|tx| !tx.is_closed());
                        entry.subscribers.len()
                    })
                    .unwrap_or(0)
            })
            .unwrap_or(0)
    }

    fn write(&self, doc_id: &str, patch: RecordPatch, create: bool) -> StoreResult<TrackingRecord> {
        let mut docs = self
            .docs
            .lock()
            .map_err(|_| StoreError::Database("tracking store lock poisoned".to_string()))?;

        if !create && docs.get(doc_id).map_or(true, |e| e.record.is_none()) {
            return Err(StoreError::NotFound(doc_id.to_string()));
        }

        let entry = docs.entry(doc_id.to_string()).or_default();
        let now = Utc::now();
        let record = match entry.record.as_mut() {
            Some(record) => {
                if let Some(requested) = record.apply(patch, now) {
                    tracing::debug!(
                        doc_id = %doc_id,
                        requested = %requested,
                        current = %record.status,
                        "Ignored status write"
                    );
                }
                record.clone()
            }
            None => {
                let record = TrackingRecord::from_patch(doc_id, patch, now);
                entry.record = Some(record.clone());
                record
            }
        };

        entry
            .subscribers
            .retain(|tx| tx.send(record.clone()).is_ok());

        Ok(record)
    }
}

#[async_trait]
impl TrackingStore for InMemoryTrackingStore {
    async fn set_merge(&self, doc_id: &str, patch: RecordPatch) -> StoreResult<TrackingRecord> {
        self.write(doc_id, patch, true)
    }

    async fn update(&self, doc_id: &str, patch: RecordPatch) -> StoreResult<TrackingRecord> {
        self.write(doc_id, patch, false)
    }

    async fn get(&self, doc_id: &str) -> StoreResult<Option<TrackingRecord>> {
        let docs = self
            .docs
            .lock()
            .map_err(|_| StoreError::Database("tracking store lock poisoned".to_string()))?;
        Ok(docs.get(doc_id).and_then(|entry| entry.record.clone()))
    }

    async fn subscribe(&self, doc_id: &str) -> StoreResult<RecordStream> {
        let (tx, rx) = mpsc::unbounded_channel();
        {
            let mut docs = self
                .docs
                .lock()
                .map_err(|_| StoreError::Database("tracking store lock poisoned".to_string()))?;
            let entry = docs.entry(doc_id.to_string()).or_default();
            // The snapshot is queued under the lock so no write can slip in ahead of it.
            if let Some(record) = &entry.record {
                let _ = tx.send(record.clone());
            }
            entry.subscribers.push(tx);
        }

        let subscriber = Subscriber {
            rx,
            docs: Arc::clone(&self.docs),
            doc_id: doc_id.to_string(),
        };
        let stream = futures::stream::unfold(subscriber, |mut subscriber| async move {
            subscriber.rx.recv().await.map(|record| (record, subscriber))
        });
        Ok(Box::pin(stream))
    }
}
