//! Relay credential verification

use crate::store::{matches_any, SessionStore, UserStore};
use crate::AuthError;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// The secret presented with a relay upgrade
#[derive(Clone, PartialEq, Eq)]
pub enum RelaySecret {
    /// Long-lived API key, checked against the user's key hashes
    ApiKey(String),
    /// Pre-issued session key, checked by the session store
    SessionKey(String),
}

impl fmt::Debug for RelaySecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelaySecret::ApiKey(_) => f.write_str("ApiKey(<redacted>)"),
            RelaySecret::SessionKey(_) => f.write_str("SessionKey(<redacted>)"),
        }
    }
}

/// Verifies relay credentials against the user and session stores
#[derive(Clone)]
pub struct RelayAuthenticator {
    users: Arc<dyn UserStore>,
    sessions: Arc<dyn SessionStore>,
}

impl RelayAuthenticator {
    pub fn new(users: Arc<dyn UserStore>, sessions: Arc<dyn SessionStore>) -> Self {
        Self { users, sessions }
    }

    /// Check `secret` for `username`.
    ///
    /// Every failure, including an unknown user, is reported as
    /// [`AuthError::InvalidCredentials`] so callers cannot tell them apart.
    pub async fn authenticate(&self, username: &str, secret: &RelaySecret) -> Result<(), AuthError> {
        let accepted = match secret {
            RelaySecret::ApiKey(key) => match self.users.find_user_by_username(username).await? {
                Some(user) => matches_any(key, &user.key_hashes).await,
                None => {
                    debug!("Relay authentication for unknown user {}", username);
                    false
                }
            },
            RelaySecret::SessionKey(key) => self.sessions.authenticate(username, key).await?,
        };

        if accepted {
            Ok(())
        } else {
            Err(AuthError::InvalidCredentials)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::password::hash_secret;
    use crate::store::{MemoryStore, UserRecord};
    use async_trait::async_trait;

    fn authenticator() -> RelayAuthenticator {
        let store = Arc::new(MemoryStore::new(vec![UserRecord {
            username: "alice".to_string(),
            key_hashes: vec![hash_secret("old-key").unwrap(), hash_secret("new-key").unwrap()],
            session_key_hashes: vec![hash_secret("session").unwrap()],
        }]));
        RelayAuthenticator::new(store.clone(), store)
    }

    #[tokio::test]
    async fn test_api_key_accepted() {
        let auth = authenticator();
        assert!(auth
            .authenticate("alice", &RelaySecret::ApiKey("new-key".into()))
            .await
            .is_ok());
        assert!(auth
            .authenticate("Alice", &RelaySecret::ApiKey("old-key".into()))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_wrong_key_rejected() {
        let auth = authenticator();
        let result = auth
            .authenticate("alice", &RelaySecret::ApiKey("session".into()))
            .await;
        assert!(matches!(result, Err(AuthError::InvalidCredentials)));
    }

    #[tokio::test]
    async fn test_unknown_user_rejected() {
        let auth = authenticator();
        let result = auth
            .authenticate("bob", &RelaySecret::ApiKey("new-key".into()))
            .await;
        assert!(matches!(result, Err(AuthError::InvalidCredentials)));
    }

    #[tokio::test]
    async fn test_session_key() {
        let auth = authenticator();
        assert!(auth
            .authenticate("alice", &RelaySecret::SessionKey("session".into()))
            .await
            .is_ok());
        assert!(auth
            .authenticate("alice", &RelaySecret::SessionKey("new-key".into()))
            .await
            .is_err());
    }

    struct BrokenStore;

    #[async_trait]
    impl UserStore for BrokenStore {
        async fn find_user_by_username(&self, _: &str) -> Result<Option<UserRecord>, AuthError> {
            Err(AuthError::Store("database unavailable".into()))
        }
    }

    #[async_trait]
    impl SessionStore for BrokenStore {
        async fn authenticate(&self, _: &str, _: &str) -> Result<bool, AuthError> {
            Err(AuthError::Store("database unavailable".into()))
        }
    }

    #[tokio::test]
    async fn test_store_errors_propagate() {
        let auth = RelayAuthenticator::new(Arc::new(BrokenStore), Arc::new(BrokenStore));
        let result = auth
            .authenticate("alice", &RelaySecret::ApiKey("k".into()))
            .await;
        assert!(matches!(result, Err(AuthError::Store(_))));
    }

    #[test]
    fn test_secret_debug_redacted() {
        let debug = format!("{:?}", RelaySecret::ApiKey("super-secret".into()));
        assert!(!debug.contains("super-secret"));
    }
}
