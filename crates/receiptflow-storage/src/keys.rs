//! Shared key generation for storage backends.
//!
//! Key format: `receipts/{ownerId}_{timestampMillis}_{fileName}`.

use receiptflow_core::constants::RECEIPTS_PREFIX;

use crate::traits::{StorageError, StorageResult};

/// Generate the object key of a receipt image.
///
/// Owner ids and file names are embedded verbatim, so neither may contain a
/// path separator or be a relative path component. Dots inside a name, as in
/// `receipt..jpg`, are fine.
pub fn object_key(owner_id: &str, timestamp_millis: i64, file_name: &str) -> StorageResult<String> {
    for (label, part) in [("owner id", owner_id), ("file name", file_name)] {
        if part.is_empty() {
            return Err(StorageError::InvalidKey(format!("{} is empty", label)));
        }
        if part.contains('/') || part.contains('\\') || is_relative_component(part) {
            return Err(StorageError::InvalidKey(format!(
                "{} contains path characters: {}",
                label, part
            )));
        }
    }

    Ok(format!(
        "{}{}_{}_{}",
        RECEIPTS_PREFIX, owner_id, timestamp_millis, file_name
    ))
}

fn is_relative_component(segment: &str) -> bool {
    segment == "." || segment == ".."
}

/// Whether every `/`-separated segment of `key` is a plain name.
pub(crate) fn has_plain_segments(key: &str) -> bool {
    key.split('/')
        .all(|segment| !segment.is_empty() && !is_relative_component(segment))
}

/// Whether an object name lives under the receipts prefix.
pub fn is_receipt_key(name: &str) -> bool {
    name.starts_with(RECEIPTS_PREFIX) && name.len() > RECEIPTS_PREFIX.len()
}
