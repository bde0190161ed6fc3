//! Receiptflow Storage Library
//!
//! This crate provides the object storage abstraction the upload orchestrator
//! writes receipt images through, and a local filesystem backend.
//!
//! # Object key format
//!
//! Every receipt image is stored under `receipts/{ownerId}_{timestampMillis}_{fileName}`.
//! Keys must not contain `..` or a leading `/`. Key generation is centralized in
//! the `keys` module so writers and the processing trigger agree on the layout.
//!
//! # Finalize events
//!
//! A backend reports every completed write as an [`ObjectFinalizedEvent`]. The
//! processing trigger consumes these events.

pub mod events;
pub mod factory;
pub mod keys;
#[cfg(feature = "storage-local")]
pub mod local;
pub mod traits;

// Re-export commonly used types
pub use events::ObjectFinalizedEvent;
pub use factory::create_storage;
pub use keys::{is_receipt_key, object_key};
#[cfg(feature = "storage-local")]
pub use local::LocalStorage;
pub use receiptflow_core::StorageBackend;
pub use traits::{
    ObjectStorage, ProgressSender, PutObjectRequest, StorageError, StorageResult, StoredObject,
};
