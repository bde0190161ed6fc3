//! Backend wiring from [`AppConfig`]

use anyhow::Context;
use receiptflow_auth::{IdentityProvider, LocalIdentityProvider};
use receiptflow_core::{AppConfig, StoreBackend};
use receiptflow_db::{InMemoryTrackingStore, PgTrackingStore, TrackingStore};
use receiptflow_processing::{
    GoogleVisionConfig, GoogleVisionRecognizer, NullRecognizer, TextRecognizer,
};
use std::sync::Arc;
use std::time::Duration;

/// Account file used when `IDENTITY_STORE_PATH` is not set.
pub const DEFAULT_IDENTITY_STORE_PATH: &str = "./data/identity/accounts.json";

pub async fn tracking_store(config: &AppConfig) -> anyhow::Result<Arc<dyn TrackingStore>> {
    match config.store_backend {
        StoreBackend::Memory => {
            tracing::debug!("Using in-memory tracking store");
            Ok(Arc::new(InMemoryTrackingStore::new()))
        }
        StoreBackend::Postgres => {
            let url = config
                .database_url
                .as_deref()
                .context("DATABASE_URL is required for the postgres store")?;
            let store = PgTrackingStore::connect(url)
                .await
                .context("Failed to connect to PostgreSQL")?;
            store
                .ensure_schema()
                .await
                .context("Failed to create the receipts table")?;
            tracing::info!("Connected to PostgreSQL tracking store");
            Ok(Arc::new(store))
        }
    }
}

pub async fn identity_provider(config: &AppConfig) -> anyhow::Result<Arc<dyn IdentityProvider>> {
    let path = config
        .identity_store_path
        .as_deref()
        .unwrap_or(DEFAULT_IDENTITY_STORE_PATH);
    let provider = LocalIdentityProvider::open(path)
        .await
        .with_context(|| format!("Failed to open identity store at {}", path))?;
    Ok(Arc::new(provider))
}

/// Google Vision when an API key is configured, otherwise a recognizer that
/// finds no text.
pub fn recognizer(config: &AppConfig) -> anyhow::Result<Arc<dyn TextRecognizer>> {
    match &config.google_vision_api_key {
        Some(api_key) => {
            let vision = GoogleVisionConfig {
                api_key: api_key.clone(),
                endpoint: config.google_vision_endpoint.clone(),
                timeout: Duration::from_secs(config.ocr_timeout_secs),
            };
            Ok(Arc::new(GoogleVisionRecognizer::new(vision)?))
        }
        None => {
            tracing::warn!("GOOGLE_VISION_API_KEY not set, receipts will be processed without OCR");
            Ok(Arc::new(NullRecognizer))
        }
    }
}
