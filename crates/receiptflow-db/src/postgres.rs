//! PostgreSQL tracking store
//!
//! Records live in the `receipts` table. Every write runs in one transaction
//! that takes a per-document advisory lock, applies the merge and emits a
//! `pg_notify` on [`RECEIPT_CHANGES_CHANNEL`], so notifications are delivered in
//! commit order.
//!
//! A store holds a single LISTEN connection, opened by the first subscription
//! and shared by all of them. Notifications are routed to subscriptions by
//! `docId`, so the number of live watches does not eat into the pool.

use async_trait::async_trait;
use chrono::{DateTime, SubsecRound, Utc};
use receiptflow_core::{ReceiptStatus, RecordPatch, TrackingRecord};
use serde_json::Value;
use sqlx::postgres::{PgListener, PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, OnceCell};

use crate::store::{RecordStream, StoreError, StoreResult, TrackingStore};

/// Channel name for PostgreSQL LISTEN/NOTIFY when a tracking record changes.
pub const RECEIPT_CHANGES_CHANNEL: &str = "receipt_changes";

/// NOTIFY payloads are limited to 8000 bytes; larger snapshots are announced
/// by id only and re-read by the listener.
const MAX_NOTIFY_PAYLOAD: usize = 7500;

/// Pause before the shared listener retries after a connection error.
const LISTENER_RETRY_DELAY: Duration = Duration::from_secs(1);

const SELECT_RECORD: &str = r#"
    SELECT doc_id, owner_id, file_name, file_size, status, download_url,
           extracted_text, error_message, ocr_provider, created_at, updated_at
    FROM receipts
    WHERE doc_id = $1
"#;

#[derive(Clone)]
pub struct PgTrackingStore {
    pool: PgPool,
    changes: Arc<ChangeHub>,
}

impl PgTrackingStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            changes: Arc::new(ChangeHub::default()),
        }
    }

    pub async fn connect(database_url: &str) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;
        Ok(Self::new(pool))
    }

    /// Create the `receipts` table if it does not exist yet.
    pub async fn ensure_schema(&self) -> StoreResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS receipts (
                doc_id TEXT PRIMARY KEY,
                owner_id TEXT,
                file_name TEXT,
                file_size BIGINT,
                status TEXT NOT NULL,
                download_url TEXT,
                extracted_text TEXT,
                error_message TEXT,
                ocr_provider TEXT,
                created_at TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn write(&self, doc_id: &str, patch: RecordPatch, create: bool) -> StoreResult<TrackingRecord> {
        let mut tx = self.pool.begin().await?;

        // Serializes writers of one document, including concurrent creates.
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(doc_id)
            .execute(&mut *tx)
            .await?;

        let row = sqlx::query(SELECT_RECORD)
            .bind(doc_id)
            .fetch_optional(&mut *tx)
            .await?;

        // Postgres keeps microseconds; notifications must carry the stored value.
        let now = Utc::now().trunc_subsecs(6);
        let record = match row {
            Some(row) => {
                let mut record = record_from_row(&row)?;
                // updated_at never moves backwards, even across writer clocks.
                let now = now.max(record.updated_at);
                if let Some(requested) = record.apply(patch, now) {
                    tracing::debug!(
                        doc_id = %doc_id,
                        requested = %requested,
                        current = %record.status,
                        "Ignored status write"
                    );
                }
                record
            }
            None if create => TrackingRecord::from_patch(doc_id, patch, now),
            None => return Err(StoreError::NotFound(doc_id.to_string())),
        };

        sqlx::query(
            r#"
            INSERT INTO receipts (
                doc_id, owner_id, file_name, file_size, status, download_url,
                extracted_text, error_message, ocr_provider, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (doc_id) DO UPDATE SET
                owner_id = EXCLUDED.owner_id,
                file_name = EXCLUDED.file_name,
                file_size = EXCLUDED.file_size,
                status = EXCLUDED.status,
                download_url = EXCLUDED.download_url,
                extracted_text = EXCLUDED.extracted_text,
                error_message = EXCLUDED.error_message,
                ocr_provider = EXCLUDED.ocr_provider,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(&record.doc_id)
        .bind(&record.owner_id)
        .bind(&record.file_name)
        .bind(record.file_size.map(|s| s as i64))
        .bind(record.status.as_str())
        .bind(&record.download_url)
        .bind(&record.extracted_text)
        .bind(&record.error_message)
        .bind(&record.ocr_provider)
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&mut *tx)
        .await?;

        sqlx::query("SELECT pg_notify($1, $2)")
            .bind(RECEIPT_CHANGES_CHANNEL)
            .bind(notify_payload(&record)?)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(record)
    }
}

#[async_trait]
impl TrackingStore for PgTrackingStore {
    async fn set_merge(&self, doc_id: &str, patch: RecordPatch) -> StoreResult<TrackingRecord> {
        self.write(doc_id, patch, true).await
    }

    async fn update(&self, doc_id: &str, patch: RecordPatch) -> StoreResult<TrackingRecord> {
        self.write(doc_id, patch, false).await
    }

    async fn get(&self, doc_id: &str) -> StoreResult<Option<TrackingRecord>> {
        let row = sqlx::query(SELECT_RECORD)
            .bind(doc_id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(record_from_row).transpose()
    }

    async fn subscribe(&self, doc_id: &str) -> StoreResult<RecordStream> {
        // Listen and route before reading the snapshot so no commit falls in between.
        self.changes.ensure_listening(&self.pool).await?;
        let mut changes = self.changes.route(doc_id)?;

        let initial = self.get(doc_id).await?;
        let (tx, rx) = mpsc::unbounded_channel();
        let mut last_seen: Option<DateTime<Utc>> = None;
        if let Some(record) = initial {
            last_seen = Some(record.updated_at);
            let _ = tx.send(record);
        }

        let store = self.clone();
        let doc_id = doc_id.to_string();
        tokio::spawn(async move {
            loop {
                let change = tokio::select! {
                    _ = tx.closed() => break,
                    change = changes.recv() => change,
                };

                let record = match change {
                    Some(Change::Snapshot(record)) => record,
                    Some(Change::Truncated(_)) => match store.get(&doc_id).await {
                        Ok(Some(record)) => record,
                        Ok(None) => continue,
                        Err(e) => {
                            tracing::warn!(doc_id = %doc_id, error = %e, "Failed to re-read receipt");
                            continue;
                        }
                    },
                    None => break,
                };

                // Commits already covered by the initial snapshot must not be replayed.
                if last_seen.is_some_and(|seen| record.updated_at < seen) {
                    continue;
                }
                last_seen = Some(record.updated_at);

                if tx.send(record).is_err() {
                    break;
                }
            }
            drop(changes);
            store.changes.prune(&doc_id);
            tracing::debug!(doc_id = %doc_id, "Receipt subscription closed");
        });

        let stream = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|record| (record, rx))
        });
        Ok(Box::pin(stream))
    }
}

fn record_from_row(row: &PgRow) -> StoreResult<TrackingRecord> {
    let raw_status: String = row.try_get("status")?;
    let error_message: Option<String> = row.try_get("error_message")?;
    let (status, error_message) = normalize_status(&raw_status, error_message);

    Ok(TrackingRecord {
        doc_id: row.try_get("doc_id")?,
        owner_id: row.try_get("owner_id")?,
        file_name: row.try_get("file_name")?,
        file_size: row
            .try_get::<Option<i64>, _>("file_size")?
            .map(|s| s.max(0) as u64),
        status,
        download_url: row.try_get("download_url")?,
        extracted_text: row.try_get("extracted_text")?,
        error_message,
        ocr_provider: row.try_get("ocr_provider")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

/// Map a stored status onto the closed status set.
///
/// An unrecognized value reads as `error`, naming the value when the record
/// carries no message of its own.
fn normalize_status(raw: &str, error_message: Option<String>) -> (ReceiptStatus, Option<String>) {
    match ReceiptStatus::normalize(raw) {
        (status, None) => (status, error_message),
        (status, Some(unknown)) => {
            tracing::warn!(status = %unknown, "Unrecognized receipt status read as error");
            let message =
                error_message.or_else(|| Some(format!("Unrecognized status: {}", unknown)));
            (status, message)
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Change {
    Snapshot(TrackingRecord),
    Truncated(String),
}

impl Change {
    fn doc_id(&self) -> &str {
        match self {
            Change::Snapshot(record) => &record.doc_id,
            Change::Truncated(doc_id) => doc_id,
        }
    }
}

/// Fan-out of the store's single LISTEN connection
#[derive(Default)]
struct ChangeHub {
    routes: Mutex<HashMap<String, Vec<mpsc::UnboundedSender<Change>>>>,
    listening: OnceCell<()>,
}

impl ChangeHub {
    /// Start the shared listener unless it is already running.
    async fn ensure_listening(self: &Arc<Self>, pool: &PgPool) -> StoreResult<()> {
        self.listening
            .get_or_try_init(|| async {
                let mut listener = PgListener::connect_with(pool).await?;
                listener.listen(RECEIPT_CHANGES_CHANNEL).await?;
                tokio::spawn(dispatch_changes(listener, Arc::downgrade(self)));
                tracing::debug!(channel = RECEIPT_CHANGES_CHANNEL, "Receipt change listener started");
                Ok::<(), StoreError>(())
            })
            .await?;
        Ok(())
    }

    fn route(&self, doc_id: &str) -> StoreResult<mpsc::UnboundedReceiver<Change>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.routes
            .lock()
            .map_err(|_| StoreError::Database("change routes lock poisoned".to_string()))?
            .entry(doc_id.to_string())
            .or_default()
            .push(tx);
        Ok(rx)
    }

    fn publish(&self, change: Change) {
        let Ok(mut routes) = self.routes.lock() else {
            return;
        };
        let doc_id = change.doc_id().to_string();
        if let Some(senders) = routes.get_mut(&doc_id) {
            senders.retain(|tx| tx.send(change.clone()).is_ok());
            if senders.is_empty() {
                routes.remove(&doc_id);
            }
        }
    }

    /// Drop closed routes of `doc_id`.
    fn prune(&self, doc_id: &str) {
        let Ok(mut routes) = self.routes.lock() else {
            return;
        };
        if let Some(senders) = routes.get_mut(doc_id) {
            senders.retain(|tx| !tx.is_closed());
            if senders.is_empty() {
                routes.remove(doc_id);
            }
        }
    }
}

async fn dispatch_changes(mut listener: PgListener, hub: Weak<ChangeHub>) {
    loop {
        match listener.recv().await {
            Ok(notification) => {
                let Some(hub) = hub.upgrade() else {
                    break;
                };
                if let Some(change) = parse_notification(notification.payload()) {
                    hub.publish(change);
                }
            }
            Err(e) => {
                if hub.strong_count() == 0 {
                    break;
                }
                tracing::warn!(error = %e, "Receipt change listener failed, retrying");
                tokio::time::sleep(LISTENER_RETRY_DELAY).await;
            }
        }
    }
    tracing::debug!("Receipt change listener stopped");
}

fn notify_payload(record: &TrackingRecord) -> StoreResult<String> {
    let payload = serde_json::to_string(record)?;
    if payload.len() <= MAX_NOTIFY_PAYLOAD {
        return Ok(payload);
    }
    Ok(serde_json::json!({ "docId": record.doc_id, "truncated": true }).to_string())
}

fn parse_notification(payload: &str) -> Option<Change> {
    let value: Value = serde_json::from_str(payload).ok()?;
    if value.get("truncated").and_then(Value::as_bool) == Some(true) {
        let doc_id = value.get("docId")?.as_str()?;
        return Some(Change::Truncated(doc_id.to_string()));
    }
    serde_json::from_value(value).ok().map(Change::Snapshot)
}
