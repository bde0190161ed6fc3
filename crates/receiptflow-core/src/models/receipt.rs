use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;

use super::upload::UploadDescriptor;

/// Processing status of a tracking record.
///
/// The happy path is `uploading → uploaded → processing → done`; `error` is
/// reachable from every non-terminal state. `done` and `error` are terminal.
///
/// Deserialization never fails on an unknown status string: it is normalized
/// into [`ReceiptStatus::Error`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase", from = "String")]
pub enum ReceiptStatus {
    Uploading,
    Uploaded,
    Processing,
    Done,
    Error,
}

impl ReceiptStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReceiptStatus::Uploading => "uploading",
            ReceiptStatus::Uploaded => "uploaded",
            ReceiptStatus::Processing => "processing",
            ReceiptStatus::Done => "done",
            ReceiptStatus::Error => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ReceiptStatus::Done | ReceiptStatus::Error)
    }

    /// Position on the happy path; `None` for `error`.
    fn happy_rank(&self) -> Option<u8> {
        match self {
            ReceiptStatus::Uploading => Some(0),
            ReceiptStatus::Uploaded => Some(1),
            ReceiptStatus::Processing => Some(2),
            ReceiptStatus::Done => Some(3),
            ReceiptStatus::Error => None,
        }
    }

    /// Whether `next` is a direct edge of the state machine.
    pub fn can_transition_to(&self, next: ReceiptStatus) -> bool {
        matches!(
            (self, next),
            (ReceiptStatus::Uploading, ReceiptStatus::Uploaded)
                | (ReceiptStatus::Uploading, ReceiptStatus::Error)
                | (ReceiptStatus::Uploaded, ReceiptStatus::Processing)
                | (ReceiptStatus::Uploaded, ReceiptStatus::Error)
                | (ReceiptStatus::Processing, ReceiptStatus::Done)
                | (ReceiptStatus::Processing, ReceiptStatus::Error)
        )
    }

    /// Status that results from writing `requested` over `self`.
    ///
    /// Terminal states never change and `error` always wins over a non-terminal
    /// state. Otherwise only a repeat of the current status or the next step on
    /// the happy path is applied: a stale request or one that would skip a
    /// state leaves the status untouched.
    pub fn resolve(self, requested: ReceiptStatus) -> ReceiptStatus {
        if self.is_terminal() {
            return self;
        }
        match (self.happy_rank(), requested.happy_rank()) {
            (_, None) => requested,
            (Some(current), Some(next)) if next == current || next == current + 1 => requested,
            _ => self,
        }
    }

    /// Parse a stored status, normalizing anything unrecognized into `error`.
    ///
    /// Returns the status and, when normalization happened, the raw value.
    pub fn normalize(raw: &str) -> (ReceiptStatus, Option<String>) {
        match raw.parse() {
            Ok(status) => (status, None),
            Err(_) => (ReceiptStatus::Error, Some(raw.to_string())),
        }
    }
}

impl Display for ReceiptStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReceiptStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "uploading" => Ok(ReceiptStatus::Uploading),
            "uploaded" => Ok(ReceiptStatus::Uploaded),
            "processing" => Ok(ReceiptStatus::Processing),
            "done" => Ok(ReceiptStatus::Done),
            "error" => Ok(ReceiptStatus::Error),
            _ => Err(anyhow::anyhow!("Invalid receipt status: {}", s)),
        }
    }
}

impl From<String> for ReceiptStatus {
    fn from(raw: String) -> Self {
        ReceiptStatus::normalize(&raw).0
    }
}

/// Persisted document tracking one upload and processing attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackingRecord {
    pub doc_id: String,
    pub owner_id: Option<String>,
    pub file_name: Option<String>,
    pub file_size: Option<u64>,
    pub status: ReceiptStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extracted_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ocr_provider: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TrackingRecord {
    /// Create a record from the first merge written for `doc_id`.
    ///
    /// The record starts in the patch's status, or in `uploading` when the
    /// patch carries none.
    pub fn from_patch(doc_id: impl Into<String>, patch: RecordPatch, now: DateTime<Utc>) -> Self {
        let mut record = TrackingRecord {
            doc_id: doc_id.into(),
            owner_id: None,
            file_name: None,
            file_size: None,
            status: patch.status.unwrap_or(ReceiptStatus::Uploading),
            download_url: None,
            extracted_text: None,
            error_message: None,
            ocr_provider: None,
            created_at: patch.created_at.unwrap_or(now),
            updated_at: now,
        };
        record.apply(patch, now);
        record
    }

    /// Merge `patch` into the record.
    ///
    /// Identity fields are write-once. Status follows [`ReceiptStatus::resolve`];
    /// `extracted_text` only lands on a `done` record and `error_message` only on
    /// an `error` record. Returns the requested status when it was not applied.
    pub fn apply(&mut self, patch: RecordPatch, now: DateTime<Utc>) -> Option<ReceiptStatus> {
        set_once(&mut self.owner_id, patch.owner_id);
        set_once(&mut self.file_name, patch.file_name);
        set_once(&mut self.file_size, patch.file_size);

        let mut ignored = None;
        if let Some(requested) = patch.status {
            let resolved = self.status.resolve(requested);
            if resolved != requested {
                ignored = Some(requested);
            }
            self.status = resolved;
        }

        if patch.download_url.is_some() {
            self.download_url = patch.download_url;
        }
        if patch.ocr_provider.is_some() {
            self.ocr_provider = patch.ocr_provider;
        }
        if self.status == ReceiptStatus::Done && patch.extracted_text.is_some() {
            self.extracted_text = patch.extracted_text;
        }
        if self.status == ReceiptStatus::Error && patch.error_message.is_some() {
            self.error_message = patch.error_message;
        }

        self.updated_at = now;
        ignored
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

fn set_once<T>(slot: &mut Option<T>, value: Option<T>) {
    if slot.is_none() {
        *slot = value;
    }
}

/// A merge-write: only the fields that are `Some` are written.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ReceiptStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extracted_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ocr_provider: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl RecordPatch {
    pub fn status(status: ReceiptStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    /// Registration written by the uploader before the transfer starts.
    pub fn uploading(descriptor: &UploadDescriptor) -> Self {
        Self {
            owner_id: Some(descriptor.owner_id.clone()),
            file_name: Some(descriptor.file_name.clone()),
            file_size: Some(descriptor.file_size),
            created_at: Some(descriptor.created_at),
            ..Self::status(ReceiptStatus::Uploading)
        }
    }

    pub fn uploaded(download_url: impl Into<String>) -> Self {
        Self {
            download_url: Some(download_url.into()),
            ..Self::status(ReceiptStatus::Uploaded)
        }
    }

    pub fn processing(owner_id: impl Into<String>, ocr_provider: impl Into<String>) -> Self {
        Self {
            owner_id: Some(owner_id.into()),
            ocr_provider: Some(ocr_provider.into()),
            ..Self::status(ReceiptStatus::Processing)
        }
    }

    pub fn done(extracted_text: impl Into<String>) -> Self {
        Self {
            extracted_text: Some(extracted_text.into()),
            ..Self::status(ReceiptStatus::Done)
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            error_message: Some(message.into()),
            ..Self::status(ReceiptStatus::Error)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(status: ReceiptStatus) -> TrackingRecord {
        let now = Utc::now();
        let mut record = TrackingRecord::from_patch("doc-1", RecordPatch::default(), now);
        record.status = status;
        record
    }

    #[test]
    fn happy_path_advances() {
        let now = Utc::now();
        let mut rec = record(ReceiptStatus::Uploading);
        assert_eq!(rec.apply(RecordPatch::uploaded("http://x/r.jpg"), now), None);
        assert_eq!(rec.apply(RecordPatch::processing("u1", "google_vision"), now), None);
        assert_eq!(rec.apply(RecordPatch::done("Total: $1"), now), None);
        assert_eq!(rec.status, ReceiptStatus::Done);
        assert_eq!(rec.extracted_text.as_deref(), Some("Total: $1"));
        assert_eq!(rec.download_url.as_deref(), Some("http://x/r.jpg"));
    }

    #[test]
    fn stale_status_does_not_regress() {
        let now = Utc::now();
        let mut rec = record(ReceiptStatus::Processing);
        let ignored = rec.apply(RecordPatch::uploaded("http://x/r.jpg"), now);
        assert_eq!(ignored, Some(ReceiptStatus::Uploaded));
        assert_eq!(rec.status, ReceiptStatus::Processing);
        // The URL is still recorded: the object did reach storage.
        assert_eq!(rec.download_url.as_deref(), Some("http://x/r.jpg"));
    }

    #[test]
    fn skipping_a_state_is_ignored() {
        let now = Utc::now();
        let mut rec = record(ReceiptStatus::Uploading);
        assert_eq!(
            rec.apply(RecordPatch::status(ReceiptStatus::Processing), now),
            Some(ReceiptStatus::Processing)
        );
        assert_eq!(rec.status, ReceiptStatus::Uploading);
        assert_eq!(
            rec.apply(RecordPatch::done("Total: $1"), now),
            Some(ReceiptStatus::Done)
        );
        assert_eq!(rec.status, ReceiptStatus::Uploading);
        assert!(rec.extracted_text.is_none());

        let mut rec = record(ReceiptStatus::Uploaded);
        assert_eq!(rec.apply(RecordPatch::done("Total: $1"), now), Some(ReceiptStatus::Done));
        assert_eq!(rec.status, ReceiptStatus::Uploaded);
    }

    #[test]
    fn first_write_sets_initial_status() {
        let rec = TrackingRecord::from_patch("doc-1", RecordPatch::error("boom"), Utc::now());
        assert_eq!(rec.status, ReceiptStatus::Error);
        assert_eq!(rec.error_message.as_deref(), Some("boom"));
    }

    #[test]
    fn terminal_states_are_sticky() {
        let now = Utc::now();
        let mut done = record(ReceiptStatus::Done);
        done.extracted_text = Some("text".to_string());
        assert_eq!(
            done.apply(RecordPatch::error("late failure"), now),
            Some(ReceiptStatus::Error)
        );
        assert_eq!(done.status, ReceiptStatus::Done);
        assert!(done.error_message.is_none());

        let mut failed = record(ReceiptStatus::Error);
        failed.apply(RecordPatch::done("too late"), now);
        assert_eq!(failed.status, ReceiptStatus::Error);
        assert!(failed.extracted_text.is_none());
    }

    #[test]
    fn duplicate_done_is_accepted() {
        let now = Utc::now();
        let mut rec = record(ReceiptStatus::Processing);
        rec.apply(RecordPatch::done("Total: $12.34"), now);
        let before = rec.clone();
        assert_eq!(rec.apply(RecordPatch::done("Total: $12.34"), now), None);
        assert_eq!(rec, before);
    }

    #[test]
    fn error_reachable_from_non_terminal_states() {
        for status in [
            ReceiptStatus::Uploading,
            ReceiptStatus::Uploaded,
            ReceiptStatus::Processing,
        ] {
            let mut rec = record(status);
            rec.apply(RecordPatch::error("boom"), Utc::now());
            assert_eq!(rec.status, ReceiptStatus::Error);
            assert_eq!(rec.error_message.as_deref(), Some("boom"));
        }
    }

    #[test]
    fn identity_fields_are_write_once() {
        let now = Utc::now();
        let descriptor = UploadDescriptor {
            doc_id: "doc-1".to_string(),
            owner_id: "user123".to_string(),
            file_name: "receipt.jpg".to_string(),
            file_size: 1024,
            created_at: now,
        };
        let mut rec = TrackingRecord::from_patch("doc-1", RecordPatch::uploading(&descriptor), now);
        rec.apply(RecordPatch::processing("someone-else", "google_vision"), now);
        assert_eq!(rec.owner_id.as_deref(), Some("user123"));
        assert_eq!(rec.file_name.as_deref(), Some("receipt.jpg"));
        assert_eq!(rec.file_size, Some(1024));
        assert_eq!(rec.created_at, now);
    }

    #[test]
    fn unknown_status_normalizes_to_error() {
        let (status, raw) = ReceiptStatus::normalize("archived");
        assert_eq!(status, ReceiptStatus::Error);
        assert_eq!(raw.as_deref(), Some("archived"));

        let parsed: ReceiptStatus = serde_json::from_str("\"queued\"").unwrap();
        assert_eq!(parsed, ReceiptStatus::Error);
        let parsed: ReceiptStatus = serde_json::from_str("\"processing\"").unwrap();
        assert_eq!(parsed, ReceiptStatus::Processing);
        assert_eq!(serde_json::to_string(&ReceiptStatus::Done).unwrap(), "\"done\"");
    }

    #[test]
    fn state_machine_edges() {
        use ReceiptStatus::*;
        assert!(Uploading.can_transition_to(Uploaded));
        assert!(Uploaded.can_transition_to(Processing));
        assert!(Processing.can_transition_to(Done));
        assert!(Processing.can_transition_to(Error));
        assert!(!Uploading.can_transition_to(Done));
        assert!(!Done.can_transition_to(Error));
        assert!(!Error.can_transition_to(Uploading));
    }

    #[test]
    fn record_serializes_camel_case() {
        let rec = record(ReceiptStatus::Uploading);
        let value = serde_json::to_value(&rec).unwrap();
        assert_eq!(value["docId"], "doc-1");
        assert_eq!(value["status"], "uploading");
        assert!(value.get("downloadUrl").is_none());
    }
}
