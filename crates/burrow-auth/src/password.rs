//! Secret hashing and verification using Argon2id

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use thiserror::Error;

/// Error types for secret hashing operations
#[derive(Error, Debug)]
pub enum PasswordError {
    /// Failed to hash secret
    #[error("Failed to hash secret: {0}")]
    HashingFailed(String),

    /// Failed to verify secret
    #[error("Failed to verify secret: {0}")]
    VerificationFailed(String),

    /// Invalid hash format
    #[error("Invalid hash format: {0}")]
    InvalidHashFormat(String),
}

/// Hash an API key or session key with Argon2id default parameters
///
/// # Returns
/// * `Ok(String)` - PHC-formatted hash string (suitable for storage)
/// * `Err(PasswordError)` - If hashing fails
///
/// # Example
/// ```
/// use burrow_auth::password::hash_secret;
///
/// let hash = hash_secret("k-123456").unwrap();
/// assert!(hash.starts_with("$argon2id$"));
/// ```
pub fn hash_secret(secret: &str) -> Result<String, PasswordError> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();

    let hash = argon2
        .hash_password(secret.as_bytes(), &salt)
        .map_err(|e| PasswordError::HashingFailed(e.to_string()))?;

    Ok(hash.to_string())
}

/// Verify a candidate secret against a stored hash
///
/// # Returns
/// * `Ok(true)` - Secret matches hash
/// * `Ok(false)` - Secret does not match hash
/// * `Err(PasswordError)` - If the hash is malformed or verification fails
pub fn verify_secret(candidate: &str, hash: &str) -> Result<bool, PasswordError> {
    let parsed_hash =
        PasswordHash::new(hash).map_err(|e| PasswordError::InvalidHashFormat(e.to_string()))?;

    match Argon2::default().verify_password(candidate.as_bytes(), &parsed_hash) {
        Ok(()) => Ok(true),
        Err(argon2::password_hash::Error::Password) => Ok(false),
        Err(e) => Err(PasswordError::VerificationFailed(e.to_string())),
    }
}

/// [`verify_secret`] on the blocking thread pool
pub async fn verify_secret_async(candidate: String, hash: String) -> Result<bool, PasswordError> {
    tokio::task::spawn_blocking(move || verify_secret(&candidate, &hash))
        .await
        .map_err(|e| PasswordError::VerificationFailed(e.to_string()))?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_produces_phc_string() {
        let hash = hash_secret("relay-key").expect("Failed to hash secret");

        assert!(hash.starts_with("$argon2id$"));
        assert!(hash.contains("v=19"));
        assert!(hash.contains("m="));
        assert!(hash.contains("t="));
        assert!(hash.contains("p="));
    }

    #[test]
    fn test_verify_correct_and_incorrect() {
        let hash = hash_secret("correct-key").expect("Failed to hash secret");

        assert!(verify_secret("correct-key", &hash).unwrap());
        assert!(!verify_secret("wrong-key", &hash).unwrap());
        assert!(!verify_secret("CORRECT-KEY", &hash).unwrap());
    }

    #[test]
    fn test_verify_invalid_hash() {
        let result = verify_secret("anything", "not-a-phc-string");
        assert!(matches!(result, Err(PasswordError::InvalidHashFormat(_))));
    }

    #[test]
    fn test_salts_differ() {
        let hash1 = hash_secret("same").unwrap();
        let hash2 = hash_secret("same").unwrap();

        assert_ne!(hash1, hash2, "Hashes should differ due to random salts");
        assert!(verify_secret("same", &hash1).unwrap());
        assert!(verify_secret("same", &hash2).unwrap());
    }

    #[tokio::test]
    async fn test_verify_async() {
        let hash = hash_secret("async-key").unwrap();

        assert!(verify_secret_async("async-key".into(), hash.clone())
            .await
            .unwrap());
        assert!(!verify_secret_async("other".into(), hash).await.unwrap());
    }
}
