//! Shared constants for the upload-and-track pipeline

/// Object key prefix under which receipt images are stored.
pub const RECEIPTS_PREFIX: &str = "receipts/";

/// Custom object metadata key linking an object to its tracking record.
pub const METADATA_DOC_ID: &str = "docId";

/// Custom object metadata key carrying the uploading user.
pub const METADATA_OWNER_ID: &str = "ownerId";

/// Largest accepted receipt image (10 MiB).
pub const MAX_FILE_SIZE_BYTES: u64 = 10 * 1024 * 1024;

/// Accepted image extensions, lowercase.
pub const ALLOWED_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png"];

/// Code reported when a transfer failure carries no machine-readable code.
pub const STORAGE_UNKNOWN_CODE: &str = "storage/unknown";
