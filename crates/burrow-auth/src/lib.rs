//! Relay authentication
//!
//! Argon2 hashing of API and session keys, the credential store boundary,
//! and the authenticator the control-channel upgrade goes through.

pub mod authenticator;
pub mod password;
pub mod store;

pub use authenticator::{RelayAuthenticator, RelaySecret};
pub use password::{hash_secret, verify_secret, verify_secret_async, PasswordError};
pub use store::{matches_any, MemoryStore, SessionStore, UserRecord, UserStore};

// Re-export for store implementors
pub use async_trait::async_trait;

use thiserror::Error;

/// Authentication errors
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Credential store error: {0}")]
    Store(String),

    #[error(transparent)]
    Password(#[from] PasswordError),
}
