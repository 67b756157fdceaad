//! Certificate lifecycle for the hostnames this service terminates TLS for
//!
//! A [`CertificateManager`] answers "give me a server config for this
//! hostname" during the handshake. It serves cached bundles, falls back to
//! persisted ones, and asks a [`CertificateAuthority`] to issue when neither
//! is usable. ACME HTTP-01 challenges are parked in a [`ChallengeStore`] for
//! the plaintext listener to answer.

pub mod acme;
pub mod bundle;
pub mod challenge;
pub mod manager;
pub mod self_signed;
pub mod storage;

pub use acme::{AcmeAuthority, AcmeConfig, AcmeDirectory, CertificateAuthority};
pub use bundle::CertificateBundle;
pub use challenge::{ChallengeHooks, ChallengeStore, PendingChallenge};
pub use manager::{CertificateManager, DEFAULT_RENEWAL_WINDOW};
pub use self_signed::SelfSignedAuthority;
pub use storage::{CertificateStorage, FileCertificateStorage, MemoryCertificateStorage};

use thiserror::Error;

/// Certificate errors
///
/// Variants carry rendered messages so the error can be shared between all
/// handshakes waiting on one issuance.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CertError {
    #[error("Invalid hostname for certificate: {0}")]
    InvalidHostname(String),

    #[error("Invalid PEM data: {0}")]
    InvalidPem(String),

    #[error("Invalid certificate: {0}")]
    InvalidCertificate(String),

    #[error("TLS configuration error: {0}")]
    Tls(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("ACME error: {0}")]
    Acme(String),

    #[error("Challenge failed: {0}")]
    ChallengeFailed(String),

    #[error("Timeout waiting for {0}")]
    Timeout(String),

    #[error("Certificate generation error: {0}")]
    Generation(String),
}

impl From<std::io::Error> for CertError {
    fn from(e: std::io::Error) -> Self {
        CertError::Storage(e.to_string())
    }
}

impl From<instant_acme::Error> for CertError {
    fn from(e: instant_acme::Error) -> Self {
        CertError::Acme(e.to_string())
    }
}

impl From<rustls::Error> for CertError {
    fn from(e: rustls::Error) -> Self {
        CertError::Tls(e.to_string())
    }
}

impl From<rcgen::Error> for CertError {
    fn from(e: rcgen::Error) -> Self {
        CertError::Generation(e.to_string())
    }
}

/// Result type for certificate operations
pub type CertResult<T> = Result<T, CertError>;

/// Lowercase, strip a trailing dot, and reject anything that is not a plain
/// DNS name (storage paths are derived from it).
pub fn normalize_hostname(hostname: &str) -> CertResult<String> {
    let host = hostname.trim_end_matches('.').to_ascii_lowercase();

    let valid = !host.is_empty()
        && host.len() <= 253
        && host.split('.').all(|label| {
            !label.is_empty()
                && label.len() <= 63
                && !label.starts_with('-')
                && !label.ends_with('-')
                && label
                    .bytes()
                    .all(|b| b.is_ascii_alphanumeric() || b == b'-')
        });

    if valid {
        Ok(host)
    } else {
        Err(CertError::InvalidHostname(hostname.to_string()))
    }
}
