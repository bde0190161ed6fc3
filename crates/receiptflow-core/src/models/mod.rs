pub mod identity;
pub mod receipt;
pub mod upload;

pub use identity::Identity;
pub use receipt::{ReceiptStatus, RecordPatch, TrackingRecord};
pub use upload::{UploadDescriptor, UploadProgress};
