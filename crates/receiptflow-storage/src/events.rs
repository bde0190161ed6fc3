use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::traits::StoredObject;

/// Notification that an object finished writing to a bucket.
///
/// Delivered at least once per write; consumers must tolerate duplicates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectFinalizedEvent {
    pub bucket: String,
    pub name: String,
    pub content_type: Option<String>,
    pub size: u64,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    pub time_created: DateTime<Utc>,
}

impl From<&StoredObject> for ObjectFinalizedEvent {
    fn from(object: &StoredObject) -> Self {
        Self {
            bucket: object.bucket.clone(),
            name: object.key.clone(),
            content_type: Some(object.content_type.clone()),
            size: object.size,
            metadata: object.metadata.clone(),
            time_created: object.time_created,
        }
    }
}

impl ObjectFinalizedEvent {
    pub fn metadata_value(&self, key: &str) -> Option<&str> {
        self.metadata
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }
}
