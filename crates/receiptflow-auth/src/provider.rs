use async_trait::async_trait;
use futures::Stream;
use receiptflow_core::{AuthError, Identity};
use std::pin::Pin;

/// Identity changes, starting with the identity current at subscription time.
/// `None` means signed out.
pub type IdentityStream = Pin<Box<dyn Stream<Item = Option<Identity>> + Send>>;

/// Authentication capability consumed by the upload pipeline
///
/// Failures carry the provider's code and message verbatim.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Create an account and sign it in.
    async fn sign_up(&self, email: &str, password: &str) -> Result<Identity, AuthError>;

    async fn sign_in(&self, email: &str, password: &str) -> Result<Identity, AuthError>;

    async fn sign_out(&self) -> Result<(), AuthError>;

    fn current_user(&self) -> Option<Identity>;

    fn identity_changes(&self) -> IdentityStream;
}
