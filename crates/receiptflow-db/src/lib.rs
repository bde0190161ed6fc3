//! Tracking record stores
//!
//! A tracking store keeps one [`TrackingRecord`](receiptflow_core::TrackingRecord)
//! per upload attempt, keyed by `docId`, and notifies subscribers of every write
//! in write order. Merges are applied atomically with the rules of
//! [`TrackingRecord::apply`](receiptflow_core::TrackingRecord::apply).

pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;
pub mod store;

pub use memory::InMemoryTrackingStore;
#[cfg(feature = "postgres")]
pub use postgres::{PgTrackingStore, RECEIPT_CHANGES_CHANNEL};
pub use store::{RecordStream, StoreError, StoreResult, TrackingStore};
