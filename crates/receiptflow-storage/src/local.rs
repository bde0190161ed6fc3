use crate::events::ObjectFinalizedEvent;
use crate::keys::has_plain_segments;
use crate::traits::{
    ObjectStorage, ProgressSender, PutObjectRequest, StorageError, StorageResult, StoredObject,
};
use crate::StorageBackend;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use receiptflow_core::UploadProgress;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc;

const CHUNK_SIZE: usize = 64 * 1024;
const PART_SUFFIX: &str = ".part";
const METADATA_SUFFIX: &str = ".meta.json";

/// Sidecar document holding the object's content type and custom metadata.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ObjectMetadata {
    content_type: String,
    size: u64,
    metadata: HashMap<String, String>,
    time_created: DateTime<Utc>,
}

/// In-flight `.part` file, removed unless the write was committed.
struct PartFile {
    path: PathBuf,
    committed: bool,
}

impl Drop for PartFile {
    fn drop(&mut self) {
        if !self.committed {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

/// Local filesystem storage implementation
///
/// Objects live under `{base_path}/{bucket}/{key}`. Bytes are written to a
/// `.part` file that is renamed into place once complete, so readers never see
/// a partial object.
#[derive(Clone)]
pub struct LocalStorage {
    root: PathBuf,
    bucket: String,
    base_url: String,
    finalize_tx: Option<mpsc::UnboundedSender<ObjectFinalizedEvent>>,
}

impl LocalStorage {
    /// Create a new LocalStorage instance
    ///
    /// # Arguments
    /// * `base_path` - Root directory for all buckets (e.g., "./data/storage")
    /// * `bucket` - Bucket this instance writes to
    /// * `base_url` - Base URL for serving files (e.g., "http://localhost:8080/storage")
    pub async fn new(
        base_path: impl Into<PathBuf>,
        bucket: impl Into<String>,
        base_url: String,
    ) -> StorageResult<Self> {
        let bucket = bucket.into();
        if bucket.is_empty() || bucket.contains('/') || bucket.contains("..") {
            return Err(StorageError::ConfigError(format!(
                "Invalid bucket name: {:?}",
                bucket
            )));
        }

        let root = base_path.into().join(&bucket);
        fs::create_dir_all(&root).await.map_err(|e| {
            StorageError::ConfigError(format!(
                "Failed to create storage directory {}: {}",
                root.display(),
                e
            ))
        })?;

        Ok(LocalStorage {
            root,
            bucket,
            base_url,
            finalize_tx: None,
        })
    }

    /// Emit an [`ObjectFinalizedEvent`] on `tx` after every completed write.
    pub fn with_finalize_notifier(mut self, tx: mpsc::UnboundedSender<ObjectFinalizedEvent>) -> Self {
        self.finalize_tx = Some(tx);
        self
    }

    /// Directory holding this bucket's objects
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Convert an object key to a filesystem path with security validation
    ///
    /// Rejects keys that could escape the bucket directory or collide with the
    /// backend's own bookkeeping files.
    fn key_to_path(&self, key: &str) -> StorageResult<PathBuf> {
        if !has_plain_segments(key) || key.contains('\\') {
            return Err(StorageError::InvalidKey(
                "Storage key contains invalid characters".to_string(),
            ));
        }
        if key.ends_with(PART_SUFFIX) || key.ends_with(METADATA_SUFFIX) || key.ends_with('/') {
            return Err(StorageError::InvalidKey(format!(
                "Storage key uses a reserved form: {}",
                key
            )));
        }

        Ok(self.root.join(key))
    }

    /// Generate public URL for an object, percent-encoding each key segment
    fn generate_url(&self, key: &str) -> String {
        let encoded = key
            .split('/')
            .map(|segment| urlencoding::encode(segment).into_owned())
            .collect::<Vec<_>>()
            .join("/");
        format!(
            "{}/{}/{}",
            self.base_url.trim_end_matches('/'),
            self.bucket,
            encoded
        )
    }

    /// Ensure parent directory exists
    async fn ensure_parent_dir(&self, path: &Path) -> StorageResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        Ok(())
    }

    async fn object_exists(path: &Path) -> bool {
        fs::try_exists(path).await.unwrap_or(false)
    }
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

fn report_progress(progress: &Option<ProgressSender>, bytes: u64, total: u64) {
    if let Some(tx) = progress {
        // A caller that stopped listening does not stop the transfer.
        let _ = tx.send(UploadProgress::new(bytes, total));
    }
}

#[async_trait]
impl ObjectStorage for LocalStorage {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    fn backend_type(&self) -> StorageBackend {
        StorageBackend::Local
    }

    async fn put_object(
        &self,
        request: PutObjectRequest,
        progress: Option<ProgressSender>,
    ) -> StorageResult<StoredObject> {
        let path = self.key_to_path(&request.key)?;
        let start = std::time::Instant::now();

        let mut source = fs::File::open(&request.source).await.map_err(|e| {
            StorageError::transfer(
                None,
                format!("Failed to open {}: {}", request.source.display(), e),
            )
        })?;
        let total = source.metadata().await?.len();

        self.ensure_parent_dir(&path).await?;

        let part_path = with_suffix(&path, PART_SUFFIX);
        let mut part = PartFile {
            path: part_path.clone(),
            committed: false,
        };
        let mut file = fs::File::create(&part_path).await.map_err(|e| {
            StorageError::transfer(
                None,
                format!("Failed to create file {}: {}", part_path.display(), e),
            )
        })?;

        report_progress(&progress, 0, total);

        let mut buf = vec![0u8; CHUNK_SIZE];
        let mut written: u64 = 0;
        loop {
            let n = source.read(&mut buf).await.map_err(|e| {
                StorageError::transfer(
                    None,
                    format!("Failed to read {}: {}", request.source.display(), e),
                )
            })?;
            if n == 0 {
                break;
            }
            file.write_all(&buf[..n]).await.map_err(|e| {
                StorageError::transfer(
                    None,
                    format!("Failed to write file {}: {}", part_path.display(), e),
                )
            })?;
            written += n as u64;
            report_progress(&progress, written, total.max(written));
        }

        file.sync_all().await.map_err(|e| {
            StorageError::transfer(
                None,
                format!("Failed to sync file {}: {}", part_path.display(), e),
            )
        })?;
        drop(file);

        let object = StoredObject {
            bucket: self.bucket.clone(),
            key: request.key,
            size: written,
            content_type: request.content_type,
            metadata: request.metadata,
            time_created: Utc::now(),
        };

        let sidecar = ObjectMetadata {
            content_type: object.content_type.clone(),
            size: object.size,
            metadata: object.metadata.clone(),
            time_created: object.time_created,
        };
        let sidecar_bytes = serde_json::to_vec_pretty(&sidecar).map_err(std::io::Error::other)?;
        fs::write(with_suffix(&path, METADATA_SUFFIX), sidecar_bytes).await?;

        fs::rename(&part_path, &path).await?;
        part.committed = true;

        tracing::info!(
            path = %path.display(),
            bucket = %object.bucket,
            key = %object.key,
            size_bytes = object.size,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Local storage upload successful"
        );

        if let Some(tx) = &self.finalize_tx {
            if tx.send(ObjectFinalizedEvent::from(&object)).is_err() {
                tracing::debug!(key = %object.key, "No finalize listener, event dropped");
            }
        }

        Ok(object)
    }

    async fn public_url(&self, key: &str) -> StorageResult<String> {
        let path = self.key_to_path(key)?;
        if !Self::object_exists(&path).await {
            return Err(StorageError::NotFound(key.to_string()));
        }
        Ok(self.generate_url(key))
    }

    async fn download(&self, key: &str) -> StorageResult<Bytes> {
        let path = self.key_to_path(key)?;
        let start = std::time::Instant::now();

        if !Self::object_exists(&path).await {
            return Err(StorageError::NotFound(key.to_string()));
        }

        let data = fs::read(&path).await?;

        tracing::info!(
            path = %path.display(),
            key = %key,
            size_bytes = data.len(),
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Local storage download successful"
        );

        Ok(Bytes::from(data))
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        let path = self.key_to_path(key)?;
        Ok(Self::object_exists(&path).await)
    }
}

#[cfg(all(test, feature = "storage-local"))]
mod tests {
    use super::*;
    use tempfile::tempdir;

    async fn storage_in(dir: &Path) -> LocalStorage {
        LocalStorage::new(dir, "receipts-test", "http://localhost:8080/storage".to_string())
            .await
            .unwrap()
    }

    fn request(key: &str, source: PathBuf) -> PutObjectRequest {
        let mut metadata = HashMap::new();
        metadata.insert("docId".to_string(), "doc-1".to_string());
        metadata.insert("ownerId".to_string(), "user123".to_string());
        PutObjectRequest {
            key: key.to_string(),
            source,
            content_type: "image/jpeg".to_string(),
            metadata,
        }
    }

    #[tokio::test]
    async fn test_put_object_and_download() {
        let dir = tempdir().unwrap();
        let storage = storage_in(&dir.path().join("store")).await;
        let source = dir.path().join("receipt.jpg");
        std::fs::write(&source, vec![7u8; 1024]).unwrap();

        let object = storage
            .put_object(request("receipts/user123_1_receipt.jpg", source), None)
            .await
            .unwrap();

        assert_eq!(object.size, 1024);
        assert_eq!(object.bucket, "receipts-test");
        assert!(storage.exists("receipts/user123_1_receipt.jpg").await.unwrap());

        let data = storage.download("receipts/user123_1_receipt.jpg").await.unwrap();
        assert_eq!(data.len(), 1024);
        assert!(data.iter().all(|b| *b == 7));

        // No bookkeeping leftovers next to the object besides its sidecar.
        let entries: Vec<_> = std::fs::read_dir(storage.root().join("receipts"))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(entries.len(), 2);
        assert!(entries.iter().any(|n| n.ends_with(".meta.json")));
        assert!(!entries.iter().any(|n| n.ends_with(".part")));
    }

    #[tokio::test]
    async fn test_progress_reaches_total() {
        let dir = tempdir().unwrap();
        let storage = storage_in(&dir.path().join("store")).await;
        let source = dir.path().join("big.png");
        std::fs::write(&source, vec![1u8; CHUNK_SIZE * 3 + 10]).unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        storage
            .put_object(request("receipts/u_1_big.png", source), Some(tx))
            .await
            .unwrap();

        let mut events = Vec::new();
        while let Ok(p) = rx.try_recv() {
            events.push(p);
        }
        assert_eq!(events.first().unwrap().bytes_transferred, 0);
        assert!(events
            .windows(2)
            .all(|w| w[0].bytes_transferred <= w[1].bytes_transferred));
        let last = events.last().unwrap();
        assert!(last.is_complete());
        assert_eq!(last.percentage, 100);
    }

    #[tokio::test]
    async fn test_finalize_event_carries_metadata() {
        let dir = tempdir().unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let storage = storage_in(&dir.path().join("store"))
            .await
            .with_finalize_notifier(tx);
        let source = dir.path().join("receipt.jpg");
        std::fs::write(&source, b"jpeg bytes").unwrap();

        storage
            .put_object(request("receipts/user123_1_receipt.jpg", source), None)
            .await
            .unwrap();

        let event = rx.try_recv().unwrap();
        assert_eq!(event.bucket, "receipts-test");
        assert_eq!(event.name, "receipts/user123_1_receipt.jpg");
        assert_eq!(event.content_type.as_deref(), Some("image/jpeg"));
        assert_eq!(event.size, 10);
        assert_eq!(event.metadata_value("docId"), Some("doc-1"));
        assert_eq!(event.metadata_value("ownerId"), Some("user123"));
    }

    #[tokio::test]
    async fn test_missing_source_leaves_nothing_behind() {
        let dir = tempdir().unwrap();
        let storage = storage_in(&dir.path().join("store")).await;

        let result = storage
            .put_object(
                request("receipts/u_1_gone.jpg", dir.path().join("gone.jpg")),
                None,
            )
            .await;

        assert!(matches!(result, Err(StorageError::Transfer { .. })));
        assert!(!storage.exists("receipts/u_1_gone.jpg").await.unwrap());
    }

    #[tokio::test]
    async fn test_public_url() {
        let dir = tempdir().unwrap();
        let storage = storage_in(&dir.path().join("store")).await;

        let missing = storage.public_url("receipts/u_1_none.jpg").await;
        assert!(matches!(missing, Err(StorageError::NotFound(_))));

        let source = dir.path().join("my receipt.jpg");
        std::fs::write(&source, b"x").unwrap();
        storage
            .put_object(request("receipts/u_1_my receipt.jpg", source), None)
            .await
            .unwrap();

        let url = storage.public_url("receipts/u_1_my receipt.jpg").await.unwrap();
        assert_eq!(
            url,
            "http://localhost:8080/storage/receipts-test/receipts/u_1_my%20receipt.jpg"
        );
    }

    #[tokio::test]
    async fn test_path_traversal_rejected() {
        let dir = tempdir().unwrap();
        let storage = storage_in(dir.path()).await;

        let result = storage.download("../../../etc/passwd").await;
        assert!(matches!(result, Err(StorageError::InvalidKey(_))));

        let result = storage.exists("/etc/passwd").await;
        assert!(matches!(result, Err(StorageError::InvalidKey(_))));

        let result = storage.download("receipts/a.jpg.meta.json").await;
        assert!(matches!(result, Err(StorageError::InvalidKey(_))));
    }

    #[tokio::test]
    async fn test_dots_inside_file_name_are_stored() {
        let dir = tempdir().unwrap();
        let storage = storage_in(&dir.path().join("store")).await;
        let source = dir.path().join("receipt..jpg");
        std::fs::write(&source, b"x").unwrap();

        storage
            .put_object(request("receipts/u_1_receipt..jpg", source), None)
            .await
            .unwrap();
        assert!(storage.exists("receipts/u_1_receipt..jpg").await.unwrap());
    }

    #[tokio::test]
    async fn test_invalid_bucket_rejected() {
        let dir = tempdir().unwrap();
        let result = LocalStorage::new(dir.path(), "../escape", "http://x".to_string()).await;
        assert!(matches!(result, Err(StorageError::ConfigError(_))));
    }
}
