//! Credential stores
//!
//! The persistent user database lives outside this service; these traits are
//! the boundary it is consumed through. [`MemoryStore`] backs both traits
//! from configuration.

use crate::password::verify_secret_async;
use crate::AuthError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

/// A user as seen by relay authentication
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub username: String,
    /// Argon2 PHC hashes of the user's API keys
    #[serde(default)]
    pub key_hashes: Vec<String>,
    /// Argon2 PHC hashes of pre-issued session keys
    #[serde(default)]
    pub session_key_hashes: Vec<String>,
}

/// Lookup of users by name
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_user_by_username(&self, username: &str) -> Result<Option<UserRecord>, AuthError>;
}

/// Verification of pre-issued session keys
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn authenticate(&self, username: &str, key: &str) -> Result<bool, AuthError>;
}

/// True if `candidate` matches any of `hashes`.
///
/// Malformed stored hashes are skipped with a warning.
pub async fn matches_any(candidate: &str, hashes: &[String]) -> bool {
    for hash in hashes {
        match verify_secret_async(candidate.to_string(), hash.clone()).await {
            Ok(true) => return true,
            Ok(false) => {}
            Err(e) => warn!("Skipping unusable stored hash: {}", e),
        }
    }
    false
}

/// In-memory user and session store
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    users: Arc<HashMap<String, UserRecord>>,
}

impl MemoryStore {
    /// Usernames are matched case-insensitively.
    pub fn new(users: impl IntoIterator<Item = UserRecord>) -> Self {
        let users = users
            .into_iter()
            .map(|user| (user.username.to_ascii_lowercase(), user))
            .collect();
        Self {
            users: Arc::new(users),
        }
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn find_user_by_username(&self, username: &str) -> Result<Option<UserRecord>, AuthError> {
        Ok(self.users.get(&username.to_ascii_lowercase()).cloned())
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn authenticate(&self, username: &str, key: &str) -> Result<bool, AuthError> {
        let Some(user) = self.find_user_by_username(username).await? else {
            return Ok(false);
        };
        Ok(matches_any(key, &user.session_key_hashes).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::password::hash_secret;

    fn user(name: &str, keys: &[&str], sessions: &[&str]) -> UserRecord {
        UserRecord {
            username: name.to_string(),
            key_hashes: keys.iter().map(|k| hash_secret(k).unwrap()).collect(),
            session_key_hashes: sessions.iter().map(|k| hash_secret(k).unwrap()).collect(),
        }
    }

    #[tokio::test]
    async fn test_find_user_case_insensitive() {
        let store = MemoryStore::new(vec![user("Alice", &["k1"], &[])]);

        let found = store.find_user_by_username("alice").await.unwrap();
        assert_eq!(found.map(|u| u.username), Some("Alice".to_string()));
        assert!(store.find_user_by_username("bob").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_matches_any_key() {
        let record = user("alice", &["first", "second"], &[]);

        assert!(matches_any("second", &record.key_hashes).await);
        assert!(!matches_any("third", &record.key_hashes).await);
        assert!(!matches_any("first", &[]).await);
    }

    #[tokio::test]
    async fn test_malformed_hash_skipped() {
        let hashes = vec!["garbage".to_string(), hash_secret("key").unwrap()];
        assert!(matches_any("key", &hashes).await);
    }

    #[tokio::test]
    async fn test_session_authenticate() {
        let store = MemoryStore::new(vec![user("alice", &["api"], &["session-a", "session-b"])]);

        assert!(store.authenticate("alice", "session-b").await.unwrap());
        assert!(!store.authenticate("alice", "api").await.unwrap());
        assert!(!store.authenticate("mallory", "session-a").await.unwrap());
    }

    #[test]
    fn test_user_record_from_yaml() {
        let yaml = "username: alice\nkey_hashes:\n  - \"$argon2id$v=19$m=19456,t=2,p=1$abc$def\"\n";
        let record: UserRecord = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(record.username, "alice");
        assert_eq!(record.key_hashes.len(), 1);
        assert!(record.session_key_hashes.is_empty());
    }
}
