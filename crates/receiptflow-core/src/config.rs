//! Configuration module
//!
//! Configuration is sourced from the process environment (optionally seeded from
//! a `.env` file). Nothing backend-specific is hardcoded: project identity, API
//! keys and endpoint locations all come from named variables.

use std::env;

use crate::backends::{StorageBackend, StoreBackend};

const DEFAULT_LOCAL_STORAGE_PATH: &str = "./data/storage";
const DEFAULT_LOCAL_STORAGE_BASE_URL: &str = "http://localhost:8080/storage";
const DEFAULT_GOOGLE_VISION_ENDPOINT: &str = "https://vision.googleapis.com";
const OCR_TIMEOUT_SECS: u64 = 60;
const TRIGGER_MAX_ATTEMPTS: u32 = 1;
const TRIGGER_UPLOAD_WAIT_SECS: u64 = 30;

/// Backend project identity
#[derive(Clone, Debug, Default)]
pub struct BackendConfig {
    pub api_key: Option<String>,
    pub auth_domain: Option<String>,
    pub project_id: Option<String>,
    pub storage_bucket: String,
    pub messaging_sender_id: Option<String>,
    pub app_id: Option<String>,
}

/// Application configuration for the upload pipeline and the processing trigger
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub backend: BackendConfig,
    pub environment: String,
    // Object storage
    pub storage_backend: StorageBackend,
    pub local_storage_path: String,
    pub local_storage_base_url: String,
    // Tracking store
    pub store_backend: StoreBackend,
    pub database_url: Option<String>,
    // Identity
    pub identity_store_path: Option<String>,
    // Text recognition
    pub google_vision_api_key: Option<String>,
    pub google_vision_endpoint: String,
    pub ocr_timeout_secs: u64,
    // Pipeline behaviour
    pub upload_timeout_secs: Option<u64>,
    pub trigger_max_attempts: u32,
    /// How long the trigger waits for the uploader to record `uploaded`
    pub trigger_upload_wait_secs: u64,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, anyhow::Error> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, anyhow::Error>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let backend = BackendConfig {
            api_key: var("RECEIPTFLOW_API_KEY"),
            auth_domain: var("RECEIPTFLOW_AUTH_DOMAIN"),
            project_id: var("RECEIPTFLOW_PROJECT_ID"),
            storage_bucket: var("RECEIPTFLOW_STORAGE_BUCKET")
                .ok_or_else(|| anyhow::anyhow!("RECEIPTFLOW_STORAGE_BUCKET must be set"))?,
            messaging_sender_id: var("RECEIPTFLOW_MESSAGING_SENDER_ID"),
            app_id: var("RECEIPTFLOW_APP_ID"),
        };

        let storage_backend = match var("STORAGE_BACKEND") {
            Some(value) => value.parse()?,
            None => StorageBackend::default(),
        };

        let store_backend = match var("STORE_BACKEND") {
            Some(value) => value.parse()?,
            None => StoreBackend::default(),
        };

        let config = AppConfig {
            backend,
            environment: var("ENVIRONMENT")
                .or_else(|| var("APP_ENV"))
                .unwrap_or_else(|| "development".to_string()),
            storage_backend,
            local_storage_path: var("LOCAL_STORAGE_PATH")
                .unwrap_or_else(|| DEFAULT_LOCAL_STORAGE_PATH.to_string()),
            local_storage_base_url: var("LOCAL_STORAGE_BASE_URL")
                .unwrap_or_else(|| DEFAULT_LOCAL_STORAGE_BASE_URL.to_string()),
            store_backend,
            database_url: var("DATABASE_URL"),
            identity_store_path: var("IDENTITY_STORE_PATH"),
            google_vision_api_key: var("GOOGLE_VISION_API_KEY"),
            google_vision_endpoint: var("GOOGLE_VISION_ENDPOINT")
                .unwrap_or_else(|| DEFAULT_GOOGLE_VISION_ENDPOINT.to_string()),
            ocr_timeout_secs: var("OCR_TIMEOUT_SECS")
                .and_then(|s| s.parse().ok())
                .unwrap_or(OCR_TIMEOUT_SECS),
            upload_timeout_secs: var("UPLOAD_TIMEOUT_SECS")
                .and_then(|s| s.parse().ok())
                .filter(|&secs| secs > 0),
            trigger_max_attempts: var("TRIGGER_MAX_ATTEMPTS")
                .and_then(|s| s.parse().ok())
                .filter(|&n| n > 0)
                .unwrap_or(TRIGGER_MAX_ATTEMPTS),
            trigger_upload_wait_secs: var("TRIGGER_UPLOAD_WAIT_SECS")
                .and_then(|s| s.parse().ok())
                .filter(|&secs| secs > 0)
                .unwrap_or(TRIGGER_UPLOAD_WAIT_SECS),
        };

        config.validate()?;
        Ok(config)
    }

    /// Check if the application is running in production mode
    pub fn is_production(&self) -> bool {
        let env = self.environment.to_lowercase();
        env == "production" || env == "prod"
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if self.backend.storage_bucket.contains('/') {
            return Err(anyhow::anyhow!(
                "RECEIPTFLOW_STORAGE_BUCKET must be a bucket name, not a path"
            ));
        }

        if self.storage_backend == StorageBackend::Local {
            if self.local_storage_path.trim().is_empty() {
                return Err(anyhow::anyhow!(
                    "LOCAL_STORAGE_PATH must be set when using local storage"
                ));
            }
            if !self.local_storage_base_url.starts_with("http://")
                && !self.local_storage_base_url.starts_with("https://")
            {
                return Err(anyhow::anyhow!(
                    "LOCAL_STORAGE_BASE_URL must be an http(s) URL"
                ));
            }
        }

        if self.store_backend == StoreBackend::Postgres {
            match self.database_url.as_deref() {
                Some(url) if url.starts_with("postgres://") || url.starts_with("postgresql://") => {}
                Some(_) => {
                    return Err(anyhow::anyhow!(
                        "DATABASE_URL must be a valid PostgreSQL connection string"
                    ))
                }
                None => {
                    return Err(anyhow::anyhow!(
                        "DATABASE_URL must be set when using the postgres store backend"
                    ))
                }
            }
        }

        if self.is_production() && self.google_vision_api_key.is_none() {
            return Err(anyhow::anyhow!(
                "GOOGLE_VISION_API_KEY must be set in production"
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(vars: &[(&str, &str)]) -> Result<AppConfig, anyhow::Error> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[("RECEIPTFLOW_STORAGE_BUCKET", "receipts-dev")]).unwrap();
        assert_eq!(config.backend.storage_bucket, "receipts-dev");
        assert_eq!(config.environment, "development");
        assert_eq!(config.store_backend, StoreBackend::Memory);
        assert_eq!(config.ocr_timeout_secs, 60);
        assert_eq!(config.trigger_max_attempts, 1);
        assert_eq!(config.trigger_upload_wait_secs, 30);
        assert!(config.upload_timeout_secs.is_none());
        assert!(!config.is_production());
    }

    #[test]
    fn test_backend_identity_keys() {
        let config = config_from(&[
            ("RECEIPTFLOW_STORAGE_BUCKET", "receipt-app.appspot.com"),
            ("RECEIPTFLOW_API_KEY", "key-123"),
            ("RECEIPTFLOW_PROJECT_ID", "receipt-app"),
            ("RECEIPTFLOW_MESSAGING_SENDER_ID", "42"),
            ("RECEIPTFLOW_APP_ID", "1:42:web:abc"),
            ("RECEIPTFLOW_AUTH_DOMAIN", "receipt-app.firebaseapp.com"),
        ])
        .unwrap();
        assert_eq!(config.backend.api_key.as_deref(), Some("key-123"));
        assert_eq!(config.backend.project_id.as_deref(), Some("receipt-app"));
        assert_eq!(config.backend.messaging_sender_id.as_deref(), Some("42"));
        assert_eq!(config.backend.app_id.as_deref(), Some("1:42:web:abc"));
        assert_eq!(
            config.backend.auth_domain.as_deref(),
            Some("receipt-app.firebaseapp.com")
        );
    }

    #[test]
    fn test_bucket_is_required() {
        assert!(config_from(&[]).is_err());
        assert!(config_from(&[("RECEIPTFLOW_STORAGE_BUCKET", "  ")]).is_err());
    }

    #[test]
    fn test_postgres_requires_database_url() {
        let err = config_from(&[
            ("RECEIPTFLOW_STORAGE_BUCKET", "b"),
            ("STORE_BACKEND", "postgres"),
        ])
        .unwrap_err();
        assert!(err.to_string().contains("DATABASE_URL"));

        assert!(config_from(&[
            ("RECEIPTFLOW_STORAGE_BUCKET", "b"),
            ("STORE_BACKEND", "postgres"),
            ("DATABASE_URL", "mysql://localhost/db"),
        ])
        .is_err());

        let config = config_from(&[
            ("RECEIPTFLOW_STORAGE_BUCKET", "b"),
            ("STORE_BACKEND", "postgres"),
            ("DATABASE_URL", "postgresql://localhost/receipts"),
        ])
        .unwrap();
        assert_eq!(config.store_backend, StoreBackend::Postgres);
    }

    #[test]
    fn test_invalid_numbers_fall_back_to_defaults() {
        let config = config_from(&[
            ("RECEIPTFLOW_STORAGE_BUCKET", "b"),
            ("OCR_TIMEOUT_SECS", "soon"),
            ("TRIGGER_MAX_ATTEMPTS", "0"),
            ("UPLOAD_TIMEOUT_SECS", "30"),
        ])
        .unwrap();
        assert_eq!(config.ocr_timeout_secs, 60);
        assert_eq!(config.trigger_max_attempts, 1);
        assert_eq!(config.upload_timeout_secs, Some(30));
    }

    #[test]
    fn test_local_storage_base_url_must_be_http() {
        assert!(config_from(&[
            ("RECEIPTFLOW_STORAGE_BUCKET", "b"),
            ("LOCAL_STORAGE_BASE_URL", "ftp://files"),
        ])
        .is_err());
        assert!(config_from(&[
            ("RECEIPTFLOW_STORAGE_BUCKET", "b"),
            ("STORAGE_BACKEND", "s3"),
        ])
        .is_err());
    }

    #[test]
    fn test_production_requires_vision_key() {
        assert!(config_from(&[
            ("RECEIPTFLOW_STORAGE_BUCKET", "b"),
            ("ENVIRONMENT", "production"),
        ])
        .is_err());
        assert!(config_from(&[
            ("RECEIPTFLOW_STORAGE_BUCKET", "b"),
            ("APP_ENV", "prod"),
            ("GOOGLE_VISION_API_KEY", "k"),
        ])
        .unwrap()
        .is_production());
    }
}
