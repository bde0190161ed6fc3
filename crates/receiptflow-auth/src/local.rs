use async_trait::async_trait;
use chrono::{DateTime, Utc};
use receiptflow_core::{AuthError, Identity};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::sync::{watch, Mutex};
use uuid::Uuid;
use validator::{Validate, ValidateEmail};

use crate::password::{hash_password, verify_password};
use crate::provider::{IdentityProvider, IdentityStream};

const MIN_PASSWORD_LENGTH: u64 = 6;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Account {
    uid: String,
    email: String,
    password_hash: String,
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    email_verified: bool,
    created_at: DateTime<Utc>,
}

impl Account {
    fn identity(&self) -> Identity {
        Identity {
            uid: self.uid.clone(),
            email: Some(self.email.clone()),
            display_name: self.display_name.clone(),
            email_verified: self.email_verified,
        }
    }
}

#[derive(Debug, Validate)]
struct SignUpRequest {
    #[validate(email)]
    email: String,
    #[validate(length(min = 6))]
    password: String,
}

/// Identity provider backed by a local account table
///
/// Accounts are keyed by lowercased email. When opened with a path, the table
/// is loaded from and saved to a JSON file after every sign-up.
pub struct LocalIdentityProvider {
    accounts: Mutex<HashMap<String, Account>>,
    path: Option<PathBuf>,
    current: watch::Sender<Option<Identity>>,
}

impl LocalIdentityProvider {
    /// Provider whose accounts only live as long as the process.
    pub fn in_memory() -> Self {
        Self::with_accounts(HashMap::new(), None)
    }

    /// Open the account file at `path`, starting empty when it does not exist.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, AuthError> {
        let path = path.into();
        let accounts = match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let list: Vec<Account> = serde_json::from_slice(&bytes).map_err(|e| {
                    AuthError::internal(format!(
                        "Failed to parse account file {}: {}",
                        path.display(),
                        e
                    ))
                })?;
                list.into_iter()
                    .map(|account| (account.email.clone(), account))
                    .collect()
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => {
                return Err(AuthError::internal(format!(
                    "Failed to read account file {}: {}",
                    path.display(),
                    e
                )))
            }
        };

        tracing::debug!(path = %path.display(), accounts = accounts.len(), "Loaded identity accounts");
        Ok(Self::with_accounts(accounts, Some(path)))
    }

    fn with_accounts(accounts: HashMap<String, Account>, path: Option<PathBuf>) -> Self {
        let (current, _) = watch::channel(None);
        Self {
            accounts: Mutex::new(accounts),
            path,
            current,
        }
    }

    async fn persist(&self, accounts: &HashMap<String, Account>) -> Result<(), AuthError> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let mut list: Vec<&Account> = accounts.values().collect();
        list.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        let bytes = serde_json::to_vec_pretty(&list)
            .map_err(|e| AuthError::internal(format!("Failed to encode accounts: {}", e)))?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                AuthError::internal(format!("Failed to create {}: {}", parent.display(), e))
            })?;
        }
        let mut tmp = path.clone().into_os_string();
        tmp.push(".tmp");
        tokio::fs::write(&tmp, bytes)
            .await
            .map_err(|e| AuthError::internal(format!("Failed to write account file: {}", e)))?;
        tokio::fs::rename(&tmp, path)
            .await
            .map_err(|e| AuthError::internal(format!("Failed to write account file: {}", e)))?;

        Ok(())
    }

    fn set_current(&self, identity: Option<Identity>) {
        self.current.send_replace(identity);
    }
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn invalid_email() -> AuthError {
    AuthError::new(AuthError::INVALID_EMAIL, "The email address is badly formatted.")
}

#[async_trait]
impl IdentityProvider for LocalIdentityProvider {
    async fn sign_up(&self, email: &str, password: &str) -> Result<Identity, AuthError> {
        let request = SignUpRequest {
            email: normalize_email(email),
            password: password.to_string(),
        };
        if let Err(errors) = request.validate() {
            let fields = errors.field_errors();
            if fields.contains_key("email") {
                return Err(invalid_email());
            }
            return Err(AuthError::new(
                AuthError::WEAK_PASSWORD,
                format!(
                    "Password should be at least {} characters.",
                    MIN_PASSWORD_LENGTH
                ),
            ));
        }

        let mut accounts = self.accounts.lock().await;
        if accounts.contains_key(&request.email) {
            return Err(AuthError::new(
                AuthError::EMAIL_ALREADY_IN_USE,
                "The email address is already in use by another account.",
            ));
        }

        let password = request.password;
        let password_hash = tokio::task::spawn_blocking(move || hash_password(&password))
            .await
            .map_err(|e| AuthError::internal(format!("Password hashing task failed: {}", e)))??;

        let account = Account {
            uid: Uuid::new_v4().simple().to_string(),
            email: request.email.clone(),
            password_hash,
            display_name: None,
            email_verified: false,
            created_at: Utc::now(),
        };
        let identity = account.identity();
        accounts.insert(request.email.clone(), account);

        if let Err(e) = self.persist(&accounts).await {
            accounts.remove(&request.email);
            return Err(e);
        }
        drop(accounts);

        tracing::info!(uid = %identity.uid, "Account created");
        self.set_current(Some(identity.clone()));
        Ok(identity)
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<Identity, AuthError> {
        let email = normalize_email(email);
        if !email.validate_email() {
            return Err(invalid_email());
        }

        let account = self.accounts.lock().await.get(&email).cloned().ok_or_else(|| {
            AuthError::new(
                AuthError::USER_NOT_FOUND,
                "There is no user record corresponding to this identifier.",
            )
        })?;

        let password = password.to_string();
        let hash = account.password_hash.clone();
        let valid = tokio::task::spawn_blocking(move || verify_password(&password, &hash))
            .await
            .map_err(|e| AuthError::internal(format!("Password check task failed: {}", e)))??;
        if !valid {
            tracing::debug!(uid = %account.uid, "Sign-in rejected");
            return Err(AuthError::new(
                AuthError::WRONG_PASSWORD,
                "The password is invalid or the user does not have a password.",
            ));
        }

        let identity = account.identity();
        tracing::info!(uid = %identity.uid, "Signed in");
        self.set_current(Some(identity.clone()));
        Ok(identity)
    }

    async fn sign_out(&self) -> Result<(), AuthError> {
        self.set_current(None);
        Ok(())
    }

    fn current_user(&self) -> Option<Identity> {
        self.current.borrow().clone()
    }

    fn identity_changes(&self) -> IdentityStream {
        let rx = self.current.subscribe();
        let stream = futures::stream::unfold((rx, true), |(mut rx, first)| async move {
            if !first && rx.changed().await.is_err() {
                return None;
            }
            let identity = rx.borrow_and_update().clone();
            Some((identity, (rx, false)))
        });
        Box::pin(stream)
    }
}
