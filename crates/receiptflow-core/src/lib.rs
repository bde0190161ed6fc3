//! Receiptflow Core Library
//!
//! This crate provides the domain models, error types, configuration and file
//! validation shared by every receiptflow component: the upload orchestrator,
//! the status watcher, the processing trigger and the identity provider.

pub mod backends;
pub mod config;
pub mod constants;
pub mod error;
pub mod models;
pub mod validation;

// Re-export commonly used types
pub use backends::{StorageBackend, StoreBackend};
pub use config::{AppConfig, BackendConfig};
pub use error::{AuthError, ErrorMetadata, LogLevel, UploadError};
pub use models::{
    Identity, ReceiptStatus, RecordPatch, TrackingRecord, UploadDescriptor, UploadProgress,
};
pub use validation::{FileValidator, ValidationError};
