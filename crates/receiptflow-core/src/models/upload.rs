use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Descriptor of one upload attempt, produced before any network activity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadDescriptor {
    pub doc_id: String,
    pub owner_id: String,
    pub file_name: String,
    pub file_size: u64,
    pub created_at: DateTime<Utc>,
}

impl UploadDescriptor {
    /// Creation instant in Unix milliseconds, used in the object key.
    pub fn timestamp_millis(&self) -> i64 {
        self.created_at.timestamp_millis()
    }
}

/// Transient transfer progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadProgress {
    pub bytes_transferred: u64,
    pub total_bytes: u64,
    pub percentage: u8,
}

impl UploadProgress {
    /// Build a progress value, clamping `bytes_transferred` to `total_bytes`.
    ///
    /// An empty transfer is complete by definition and reports 100%.
    pub fn new(bytes_transferred: u64, total_bytes: u64) -> Self {
        let bytes_transferred = bytes_transferred.min(total_bytes);
        let percentage = if total_bytes == 0 {
            100
        } else {
            ((bytes_transferred as f64 / total_bytes as f64) * 100.0).round() as u8
        };
        Self {
            bytes_transferred,
            total_bytes,
            percentage,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.bytes_transferred == self.total_bytes
    }
}
