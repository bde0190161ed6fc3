//! Storage abstraction trait
//!
//! This module defines the ObjectStorage trait that all storage backends must implement.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use receiptflow_core::{UploadError, UploadProgress};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::StorageBackend;

/// Storage operation errors
#[derive(Debug, Error)]
pub enum StorageError {
    /// Failure reported by the transport, with its machine code when it has one.
    #[error("{message}")]
    Transfer {
        code: Option<String>,
        message: String,
    },

    #[error("Upload canceled")]
    Cancelled,

    #[error("Upload timed out after {0:?}")]
    TimedOut(Duration),

    #[error("Storage quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Invalid storage key: {0}")]
    InvalidKey(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl StorageError {
    pub fn transfer(code: Option<&str>, message: impl Into<String>) -> Self {
        StorageError::Transfer {
            code: code.map(String::from),
            message: message.into(),
        }
    }

    /// Machine-readable code in the `storage/*` namespace, if one applies.
    pub fn code(&self) -> Option<&str> {
        match self {
            StorageError::Transfer { code, .. } => code.as_deref(),
            StorageError::Cancelled => Some("storage/canceled"),
            StorageError::TimedOut(_) => Some("storage/retry-limit-exceeded"),
            StorageError::QuotaExceeded(_) => Some("storage/quota-exceeded"),
            StorageError::NotFound(_) => Some("storage/object-not-found"),
            StorageError::InvalidKey(_) => Some("storage/invalid-argument"),
            StorageError::IoError(_) | StorageError::ConfigError(_) => None,
        }
    }
}

impl From<StorageError> for UploadError {
    fn from(err: StorageError) -> Self {
        UploadError::storage(err.code(), err.to_string())
    }
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Sender half of a progress channel. Sends never block the transfer.
pub type ProgressSender = mpsc::UnboundedSender<UploadProgress>;

/// One object write.
#[derive(Debug, Clone)]
pub struct PutObjectRequest {
    pub key: String,
    /// Local file whose bytes are transferred.
    pub source: PathBuf,
    pub content_type: String,
    /// Custom metadata attached to the object and echoed in its finalize event.
    pub metadata: HashMap<String, String>,
}

/// Description of a stored object.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredObject {
    pub bucket: String,
    pub key: String,
    pub size: u64,
    pub content_type: String,
    pub metadata: HashMap<String, String>,
    pub time_created: DateTime<Utc>,
}

/// Storage abstraction trait
///
/// A backend is bound to one bucket. The upload orchestrator writes through
/// `put_object` and `public_url`; the processing trigger reads through
/// `download`.
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Bucket this backend writes to
    fn bucket(&self) -> &str;

    /// Get the storage backend type
    fn backend_type(&self) -> StorageBackend;

    /// Transfer a local file to `request.key`.
    ///
    /// When `progress` is given, transfer progress is sent on it as bytes are
    /// written. A closed receiver is ignored. The object becomes visible
    /// only once the whole file has been written.
    async fn put_object(
        &self,
        request: PutObjectRequest,
        progress: Option<ProgressSender>,
    ) -> StorageResult<StoredObject>;

    /// Resolve the public download URL of an existing object
    async fn public_url(&self, key: &str) -> StorageResult<String>;

    /// Download an object by its key
    async fn download(&self, key: &str) -> StorageResult<Bytes>;

    /// Check if an object exists
    async fn exists(&self, key: &str) -> StorageResult<bool>;
}
