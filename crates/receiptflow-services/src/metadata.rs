use chrono::Utc;
use receiptflow_core::UploadDescriptor;
use uuid::Uuid;

/// Derive the descriptor of a new upload attempt.
///
/// Every call yields a fresh random `docId`; the inputs are copied verbatim and
/// not validated here.
pub fn generate(owner_id: &str, file_name: &str, file_size: u64) -> UploadDescriptor {
    UploadDescriptor {
        doc_id: Uuid::new_v4().to_string(),
        owner_id: owner_id.to_string(),
        file_name: file_name.to_string(),
        file_size,
        created_at: Utc::now(),
    }
}
