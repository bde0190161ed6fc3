//! Shared helpers for the `receiptflow` binary.

pub mod app;

use receiptflow_core::{ErrorMetadata, LogLevel, UploadProgress};
use serde::Serialize;
use std::fmt::Display;

/// Initialize tracing for CLI binaries.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
}

/// Log a client-facing error at the level it asks for.
pub fn log_error<E: ErrorMetadata + Display>(error: &E) {
    let code = error.error_code();
    match error.log_level() {
        LogLevel::Debug => {
            tracing::debug!(error = %error, code = code, "Error occurred");
        }
        LogLevel::Warn => {
            tracing::warn!(error = %error, code = code, "Error occurred");
        }
        LogLevel::Error => {
            tracing::error!(error = %error, code = code, "Error occurred");
        }
    }
}

/// JSON shape of a failed command.
#[derive(Debug, Serialize, PartialEq)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
    pub recoverable: bool,
}

impl ErrorBody {
    pub fn from_error<E: ErrorMetadata + Display>(error: &E) -> Self {
        Self {
            code: error.error_code().to_string(),
            message: error.to_string(),
            recoverable: error.is_recoverable(),
        }
    }
}

pub fn print_json(value: &impl Serialize) -> anyhow::Result<()> {
    let out = serde_json::to_string_pretty(value)?;
    println!("{}", out);
    Ok(())
}

/// One-line rendering of an upload progress event.
pub fn format_progress(file_name: &str, progress: &UploadProgress) -> String {
    format!(
        "Uploading {}: {}/{} bytes ({}%)",
        file_name, progress.bytes_transferred, progress.total_bytes, progress.percentage
    )
}
