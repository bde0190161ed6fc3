//! Receiptflow Processing Library
//!
//! The remote processing trigger runs once per finalized object. For every
//! receipt image it records `processing`, downloads the object, runs text
//! recognition and records either `done` with the extracted text or `error`.
//! Processing failures never reach the uploader; they only show up in the
//! tracking record.
//!
//! Events are delivered at least once. Running the trigger twice for the same
//! object converges on the same terminal record because every write is a merge
//! and terminal statuses are sticky.

pub mod dispatcher;
pub mod error;
#[cfg(feature = "google-vision")]
pub mod google_vision;
pub mod recognizer;
pub mod trigger;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use dispatcher::{compute_retry_backoff_seconds, DispatcherConfig, TriggerDispatcher};
pub use error::ProcessingError;
#[cfg(feature = "google-vision")]
pub use google_vision::{GoogleVisionConfig, GoogleVisionRecognizer};
pub use recognizer::{NullRecognizer, TextRecognizer};
pub use trigger::{ReceiptProcessor, SkipReason, TriggerOutcome};
