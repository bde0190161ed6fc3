//! Identity for receiptflow
//!
//! The upload pipeline only needs "given credentials, obtain a user identity or
//! fail". [`IdentityProvider`] is that capability; [`LocalIdentityProvider`]
//! implements it with argon2 password hashes and an optional JSON account file.

pub mod local;
pub mod password;
pub mod provider;

pub use local::LocalIdentityProvider;
pub use provider::{IdentityProvider, IdentityStream};
