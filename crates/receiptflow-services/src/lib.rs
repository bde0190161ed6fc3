//! Receipt upload services
//!
//! Client-side half of the upload-and-track pipeline:
//!
//! - [`metadata::generate`] derives the identity of an upload attempt
//! - [`UploadOrchestrator`] validates, registers, transfers and finalizes it
//! - [`StatusWatcher`] follows the tracking record until the caller stops

pub mod metadata;
pub mod orchestrator;
pub mod progress;
pub mod watcher;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use metadata::generate;
pub use orchestrator::UploadOrchestrator;
pub use progress::ProgressFilter;
pub use watcher::{StatusSubscription, StatusWatcher, WatchHandle};
