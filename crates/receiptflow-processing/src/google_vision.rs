//! Google Cloud Vision text recognizer

use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::Engine;
use serde::Deserialize;
use serde_json::json;
use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::time::Duration;

use crate::recognizer::TextRecognizer;

pub const DEFAULT_ENDPOINT: &str = "https://vision.googleapis.com";

/// Google Cloud Vision recognizer configuration
#[derive(Clone)]
pub struct GoogleVisionConfig {
    /// Google Cloud API key
    pub api_key: String,
    /// Base URL of the Vision API, without the `/v1` path
    pub endpoint: String,
    /// Request timeout
    pub timeout: Duration,
}

impl GoogleVisionConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            timeout: Duration::from_secs(60),
        }
    }
}

impl Debug for GoogleVisionConfig {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("GoogleVisionConfig")
            .field("api_key", &"<redacted>")
            .field("endpoint", &self.endpoint)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Text recognizer backed by the Vision API `TEXT_DETECTION` feature
pub struct GoogleVisionRecognizer {
    http_client: reqwest::Client,
    config: GoogleVisionConfig,
}

impl Debug for GoogleVisionRecognizer {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("GoogleVisionRecognizer")
            .field("endpoint", &self.config.endpoint)
            .finish()
    }
}

impl GoogleVisionRecognizer {
    pub fn new(config: GoogleVisionConfig) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .context("Failed to create HTTP client for Google Vision API")?;

        Ok(Self {
            http_client,
            config,
        })
    }

    async fn annotate_image(&self, image: &[u8]) -> Result<AnnotateImageResponse> {
        let url = format!(
            "{}/v1/images:annotate",
            self.config.endpoint.trim_end_matches('/')
        );

        let image_base64 = base64::engine::general_purpose::STANDARD.encode(image);
        let request_body = json!({
            "requests": [{
                "image": {
                    "content": image_base64
                },
                "features": [{ "type": "TEXT_DETECTION" }]
            }]
        });

        let response = self
            .http_client
            .post(&url)
            .query(&[("key", self.config.api_key.as_str())])
            .json(&request_body)
            .send()
            .await
            .context("Failed to send request to Google Vision API")?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(anyhow::anyhow!(
                "Google Vision API request failed: {} - {}",
                status,
                error_text
            ));
        }

        let vision_response: VisionResponse = response
            .json()
            .await
            .context("Failed to parse Google Vision API response")?;

        let first = vision_response
            .responses
            .into_iter()
            .next()
            .unwrap_or_default();
        if let Some(error) = &first.error {
            return Err(anyhow::anyhow!(
                "Google Vision API error: {} - {}",
                error.code.unwrap_or_default(),
                error.message.as_deref().unwrap_or("unknown error")
            ));
        }

        Ok(first)
    }
}

#[async_trait]
impl TextRecognizer for GoogleVisionRecognizer {
    fn name(&self) -> &str {
        "google_vision"
    }

    async fn recognize(&self, image: &[u8]) -> Result<String> {
        tracing::info!(
            image_size = image.len(),
            "Sending receipt image to Google Cloud Vision API"
        );

        let response = self.annotate_image(image).await?;
        Ok(response.into_text())
    }
}

#[derive(Debug, Deserialize)]
struct VisionResponse {
    #[serde(default)]
    responses: Vec<AnnotateImageResponse>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnnotateImageResponse {
    #[serde(default)]
    full_text_annotation: Option<FullTextAnnotation>,
    #[serde(default)]
    text_annotations: Vec<EntityAnnotation>,
    #[serde(default)]
    error: Option<VisionError>,
}

impl AnnotateImageResponse {
    /// Full text when present, else the first text annotation, else empty.
    fn into_text(self) -> String {
        if let Some(text) = self.full_text_annotation.and_then(|a| a.text) {
            return text;
        }
        self.text_annotations
            .into_iter()
            .next()
            .and_then(|a| a.description)
            .unwrap_or_default()
    }
}

#[derive(Debug, Deserialize)]
struct FullTextAnnotation {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EntityAnnotation {
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct VisionError {
    code: Option<i32>,
    message: Option<String>,
}
