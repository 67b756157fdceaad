//! Certificate bundles

use crate::{CertError, CertResult};
use chrono::{DateTime, Duration, Utc};
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::ServerConfig;
use std::fmt;
use std::sync::Arc;

/// Key, certificate chain, and the leaf's expiry for one hostname
///
/// Bundles are immutable; renewal replaces the whole bundle.
#[derive(Clone)]
pub struct CertificateBundle {
    pub hostname: String,
    pub private_key_pem: String,
    /// Leaf certificate followed by any intermediates
    pub certificate_pem: String,
    pub expires_at: DateTime<Utc>,
    server_config: Arc<ServerConfig>,
}

impl fmt::Debug for CertificateBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CertificateBundle")
            .field("hostname", &self.hostname)
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

impl CertificateBundle {
    /// Parse a PEM key and chain, reading the expiry from the leaf certificate.
    pub fn from_pem(
        hostname: impl Into<String>,
        private_key_pem: impl Into<String>,
        certificate_pem: impl Into<String>,
    ) -> CertResult<Self> {
        let private_key_pem = private_key_pem.into();
        let certificate_pem = certificate_pem.into();

        let chain = parse_chain(&certificate_pem)?;
        let key = parse_key(&private_key_pem)?;
        let expires_at = leaf_expiry(&chain[0])?;
        let server_config = build_server_config(chain, key)?;

        Ok(Self {
            hostname: hostname.into(),
            private_key_pem,
            certificate_pem,
            expires_at,
            server_config,
        })
    }

    /// True once `now` is inside `window` of the expiry.
    pub fn needs_renewal(&self, window: Duration) -> bool {
        self.needs_renewal_at(Utc::now(), window)
    }

    pub fn needs_renewal_at(&self, now: DateTime<Utc>, window: Duration) -> bool {
        self.expires_at < now + window
    }

    pub fn is_expired(&self) -> bool {
        self.expires_at <= Utc::now()
    }

    pub fn days_until_expiry(&self) -> i64 {
        (self.expires_at - Utc::now()).num_days()
    }

    /// TLS server configuration presenting this bundle
    pub fn server_config(&self) -> Arc<ServerConfig> {
        Arc::clone(&self.server_config)
    }
}

fn parse_chain(pem: &str) -> CertResult<Vec<CertificateDer<'static>>> {
    let chain = rustls_pemfile::certs(&mut pem.as_bytes())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| CertError::InvalidPem(format!("Failed to parse certificate: {}", e)))?;

    if chain.is_empty() {
        return Err(CertError::InvalidPem("No certificate found".to_string()));
    }
    Ok(chain)
}

fn parse_key(pem: &str) -> CertResult<PrivateKeyDer<'static>> {
    rustls_pemfile::private_key(&mut pem.as_bytes())
        .map_err(|e| CertError::InvalidPem(format!("Failed to parse private key: {}", e)))?
        .ok_or_else(|| CertError::InvalidPem("No private key found".to_string()))
}

fn leaf_expiry(leaf: &CertificateDer<'_>) -> CertResult<DateTime<Utc>> {
    let (_, cert) = x509_parser::parse_x509_certificate(leaf.as_ref())
        .map_err(|e| CertError::InvalidCertificate(e.to_string()))?;

    let not_after = cert.validity().not_after.timestamp();
    DateTime::from_timestamp(not_after, 0)
        .ok_or_else(|| CertError::InvalidCertificate(format!("notAfter out of range: {}", not_after)))
}

fn build_server_config(
    chain: Vec<CertificateDer<'static>>,
    key: PrivateKeyDer<'static>,
) -> CertResult<Arc<ServerConfig>> {
    let mut config =
        ServerConfig::builder_with_provider(Arc::new(rustls::crypto::ring::default_provider()))
            .with_safe_default_protocol_versions()?
            .with_no_client_auth()
            .with_single_cert(chain, key)?;

    config.alpn_protocols = vec![b"http/1.1".to_vec()];
    Ok(Arc::new(config))
}
