//! Text recognition abstraction
//!
//! The trigger only depends on [`TextRecognizer`]; implementations talk to an
//! OCR provider. The recognizer name is recorded on the tracking record as
//! `ocrProvider`.

use anyhow::Result;
use async_trait::async_trait;

#[async_trait]
pub trait TextRecognizer: Send + Sync {
    /// Provider name recorded on the tracking record
    fn name(&self) -> &str;

    /// Extract the text of one image. An image without text yields `""`.
    async fn recognize(&self, image: &[u8]) -> Result<String>;
}

/// Recognizer that finds no text
///
/// Used when no OCR provider is configured, e.g. for local development.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullRecognizer;

#[async_trait]
impl TextRecognizer for NullRecognizer {
    fn name(&self) -> &str {
        "none"
    }

    async fn recognize(&self, image: &[u8]) -> Result<String> {
        tracing::debug!(image_size = image.len(), "No OCR provider configured");
        Ok(String::new())
    }
}
