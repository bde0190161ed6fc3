//! Error types module
//!
//! Client-facing errors of the upload-and-track pipeline. Validation and
//! transfer failures are returned synchronously to the caller; processing
//! failures never are, they only show up as an `error` tracking record.
//!
//! Backend-specific errors (object storage, tracking store, recognizers) live in
//! their own crates and are converted into these types at the service boundary.

use crate::constants::STORAGE_UNKNOWN_CODE;
use crate::validation::ValidationError;

/// Log level for error reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Debug level - for expected errors like validation failures
    Debug,
    /// Warning level - for recoverable issues
    Warn,
    /// Error level - for unexpected failures
    Error,
}

/// Self-description of an error for logging and presentation
pub trait ErrorMetadata {
    /// Machine-readable error code (e.g., "storage/unknown")
    fn error_code(&self) -> &str;

    /// Whether the caller can recover, e.g. by picking another file or retrying
    fn is_recoverable(&self) -> bool;

    /// Log level for this error
    fn log_level(&self) -> LogLevel;
}

/// Failure reported by the identity provider, surfaced verbatim.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message} ({code})")]
pub struct AuthError {
    pub code: String,
    pub message: String,
}

impl AuthError {
    pub const INVALID_EMAIL: &'static str = "auth/invalid-email";
    pub const WEAK_PASSWORD: &'static str = "auth/weak-password";
    pub const EMAIL_ALREADY_IN_USE: &'static str = "auth/email-already-in-use";
    pub const USER_NOT_FOUND: &'static str = "auth/user-not-found";
    pub const WRONG_PASSWORD: &'static str = "auth/wrong-password";
    pub const INTERNAL: &'static str = "auth/internal-error";

    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(Self::INTERNAL, message)
    }
}

impl ErrorMetadata for AuthError {
    fn error_code(&self) -> &str {
        &self.code
    }

    fn is_recoverable(&self) -> bool {
        self.code != Self::INTERNAL
    }

    fn log_level(&self) -> LogLevel {
        if self.code == Self::INTERNAL {
            LogLevel::Error
        } else {
            LogLevel::Debug
        }
    }
}

/// Failure of one upload attempt.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UploadError {
    /// Rejected before any tracking write or transfer.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Transfer (or tracking) failure; the record has been moved to `error`
    /// when that write was possible.
    #[error("{message}")]
    Storage { code: String, message: String },
}

impl UploadError {
    /// Build a storage failure, defaulting the code to `storage/unknown`.
    pub fn storage(code: Option<&str>, message: impl Into<String>) -> Self {
        UploadError::Storage {
            code: code.unwrap_or(STORAGE_UNKNOWN_CODE).to_string(),
            message: message.into(),
        }
    }

    pub fn code(&self) -> &str {
        match self {
            UploadError::Validation(ValidationError::FileTooLarge { .. }) => "validation/file-too-large",
            UploadError::Validation(ValidationError::UnsupportedType { .. }) => {
                "validation/unsupported-type"
            }
            UploadError::Storage { code, .. } => code,
        }
    }

    pub fn message(&self) -> String {
        match self {
            UploadError::Validation(e) => e.to_string(),
            UploadError::Storage { message, .. } => message.clone(),
        }
    }
}

impl ErrorMetadata for UploadError {
    fn error_code(&self) -> &str {
        self.code()
    }

    fn is_recoverable(&self) -> bool {
        true
    }

    fn log_level(&self) -> LogLevel {
        match self {
            UploadError::Validation(_) => LogLevel::Debug,
            UploadError::Storage { .. } => LogLevel::Warn,
        }
    }
}
