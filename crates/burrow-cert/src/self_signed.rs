//! Self-signed certificates for development and staging deployments
//!
//! Browsers will not trust these; use [`crate::AcmeAuthority`] in production.

use crate::acme::CertificateAuthority;
use crate::bundle::CertificateBundle;
use crate::challenge::ChallengeHooks;
use crate::storage::CertificateStorage;
use crate::{CertError, CertResult};
use async_trait::async_trait;
use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair};
use std::sync::Arc;
use tracing::info;

/// Validity of issued self-signed certificates
pub const SELF_SIGNED_VALIDITY_DAYS: i64 = 90;

/// Generate a self-signed bundle for `hostname` valid for `validity` from now.
pub fn generate_bundle(hostname: &str, validity: chrono::Duration) -> CertResult<CertificateBundle> {
    let mut params = CertificateParams::new(vec![hostname.to_string()])?;

    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, hostname);
    dn.push(DnType::OrganizationName, "Burrow Self-Signed");
    params.distinguished_name = dn;

    let now = time::OffsetDateTime::now_utc();
    params.not_before = now - time::Duration::days(1);
    params.not_after = now + time::Duration::seconds(validity.num_seconds());

    let key_pair = KeyPair::generate()?;
    let cert = params.self_signed(&key_pair)?;

    CertificateBundle::from_pem(hostname, key_pair.serialize_pem(), cert.pem())
}

/// Issues self-signed certificates and persists them like ACME ones
pub struct SelfSignedAuthority {
    storage: Arc<dyn CertificateStorage>,
    validity: chrono::Duration,
}

impl SelfSignedAuthority {
    pub fn new(storage: Arc<dyn CertificateStorage>) -> Self {
        Self {
            storage,
            validity: chrono::Duration::days(SELF_SIGNED_VALIDITY_DAYS),
        }
    }

    pub fn with_validity(mut self, validity: chrono::Duration) -> Self {
        self.validity = validity;
        self
    }
}

#[async_trait]
impl CertificateAuthority for SelfSignedAuthority {
    async fn fetch(&self, hostname: &str) -> CertResult<Option<CertificateBundle>> {
        self.storage.load(hostname).await
    }

    async fn register(
        &self,
        hostname: &str,
        _email: &str,
        _hooks: Arc<dyn ChallengeHooks>,
    ) -> CertResult<CertificateBundle> {
        let host = hostname.to_string();
        let validity = self.validity;

        // Key generation is CPU-bound
        let bundle = tokio::task::spawn_blocking(move || generate_bundle(&host, validity))
            .await
            .map_err(|e| CertError::Generation(e.to_string()))??;

        self.storage.save(&bundle).await?;
        info!(
            "Issued self-signed certificate for {} (expires {})",
            hostname, bundle.expires_at
        );
        Ok(bundle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::challenge::ChallengeStore;
    use crate::storage::MemoryCertificateStorage;

    #[test]
    fn test_generate_bundle_validity() {
        let bundle = generate_bundle("dev.example.com", chrono::Duration::days(90)).unwrap();
        assert!((89..=90).contains(&bundle.days_until_expiry()));
        assert!(bundle.certificate_pem.contains("BEGIN CERTIFICATE"));
        assert!(bundle.private_key_pem.contains("PRIVATE KEY"));
    }

    #[test]
    fn test_already_expired_bundle() {
        let bundle = generate_bundle("old.example.com", chrono::Duration::hours(-1)).unwrap();
        assert!(bundle.is_expired());
    }

    #[tokio::test]
    async fn test_register_persists() {
        let storage = Arc::new(MemoryCertificateStorage::new());
        let authority = SelfSignedAuthority::new(storage.clone());

        assert!(authority.fetch("api.example.com").await.unwrap().is_none());

        let issued = authority
            .register("api.example.com", "", Arc::new(ChallengeStore::new()))
            .await
            .unwrap();
        assert!((89..=90).contains(&issued.days_until_expiry()));

        let fetched = authority.fetch("api.example.com").await.unwrap().unwrap();
        assert_eq!(fetched.certificate_pem, issued.certificate_pem);
    }
}
