//! Certificate persistence

use crate::bundle::CertificateBundle;
use crate::{normalize_hostname, CertResult};
use async_trait::async_trait;
use dashmap::DashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

const KEY_FILE: &str = "privkey.pem";
const CHAIN_FILE: &str = "fullchain.pem";

/// Persistent bundle storage keyed by hostname
#[async_trait]
pub trait CertificateStorage: Send + Sync {
    /// `Ok(None)` when nothing is stored for `hostname`.
    async fn load(&self, hostname: &str) -> CertResult<Option<CertificateBundle>>;

    async fn save(&self, bundle: &CertificateBundle) -> CertResult<()>;
}

/// Stores bundles as `<root>/live/<hostname>/{privkey.pem,fullchain.pem}`
#[derive(Debug, Clone)]
pub struct FileCertificateStorage {
    root: PathBuf,
}

impl FileCertificateStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding the files for `hostname`
    pub fn host_dir(&self, hostname: &str) -> CertResult<PathBuf> {
        Ok(self.root.join("live").join(normalize_hostname(hostname)?))
    }
}

#[async_trait]
impl CertificateStorage for FileCertificateStorage {
    async fn load(&self, hostname: &str) -> CertResult<Option<CertificateBundle>> {
        let dir = self.host_dir(hostname)?;
        trace!("Loading certificate from {}", dir.display());

        let key = match tokio::fs::read_to_string(dir.join(KEY_FILE)).await {
            Ok(key) => key,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let chain = match tokio::fs::read_to_string(dir.join(CHAIN_FILE)).await {
            Ok(chain) => chain,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        CertificateBundle::from_pem(hostname, key, chain).map(Some)
    }

    async fn save(&self, bundle: &CertificateBundle) -> CertResult<()> {
        let dir = self.host_dir(&bundle.hostname)?;
        tokio::fs::create_dir_all(&dir).await?;

        tokio::fs::write(dir.join(KEY_FILE), &bundle.private_key_pem).await?;
        tokio::fs::write(dir.join(CHAIN_FILE), &bundle.certificate_pem).await?;

        debug!("Certificate for {} saved to {}", bundle.hostname, dir.display());
        Ok(())
    }
}

/// Process-local storage, for tests and throwaway deployments
#[derive(Debug, Default)]
pub struct MemoryCertificateStorage {
    bundles: DashMap<String, CertificateBundle>,
}

impl MemoryCertificateStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self) -> usize {
        self.bundles.len()
    }
}

#[async_trait]
impl CertificateStorage for MemoryCertificateStorage {
    async fn load(&self, hostname: &str) -> CertResult<Option<CertificateBundle>> {
        let key = normalize_hostname(hostname)?;
        Ok(self.bundles.get(&key).map(|entry| entry.value().clone()))
    }

    async fn save(&self, bundle: &CertificateBundle) -> CertResult<()> {
        let key = normalize_hostname(&bundle.hostname)?;
        self.bundles.insert(key, bundle.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::self_signed::generate_bundle;
    use crate::CertError;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_file_storage_layout() {
        let temp_dir = TempDir::new().unwrap();
        let storage = FileCertificateStorage::new(temp_dir.path());
        let bundle = generate_bundle("api.example.com", chrono::Duration::days(30)).unwrap();

        storage.save(&bundle).await.unwrap();

        let dir = temp_dir.path().join("live").join("api.example.com");
        assert!(dir.join("privkey.pem").exists());
        assert!(dir.join("fullchain.pem").exists());

        let loaded = storage.load("API.example.com").await.unwrap().unwrap();
        assert_eq!(loaded.expires_at, bundle.expires_at);
        assert_eq!(loaded.certificate_pem, bundle.certificate_pem);
    }

    #[tokio::test]
    async fn test_file_storage_missing() {
        let temp_dir = TempDir::new().unwrap();
        let storage = FileCertificateStorage::new(temp_dir.path());

        assert!(storage.load("nothing.example.com").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_file_storage_corrupt() {
        let temp_dir = TempDir::new().unwrap();
        let storage = FileCertificateStorage::new(temp_dir.path());
        let dir = storage.host_dir("bad.example.com").unwrap();
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("privkey.pem"), "garbage").unwrap();
        std::fs::write(dir.join("fullchain.pem"), "garbage").unwrap();

        let result = storage.load("bad.example.com").await;
        assert!(matches!(result, Err(CertError::InvalidPem(_))));
    }

    #[tokio::test]
    async fn test_path_traversal_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let storage = FileCertificateStorage::new(temp_dir.path());

        let result = storage.load("../../etc").await;
        assert!(matches!(result, Err(CertError::InvalidHostname(_))));
    }

    #[tokio::test]
    async fn test_memory_storage() {
        let storage = MemoryCertificateStorage::new();
        let bundle = generate_bundle("web.example.com", chrono::Duration::days(30)).unwrap();

        storage.save(&bundle).await.unwrap();
        assert_eq!(storage.count(), 1);
        assert!(storage.load("web.example.com.").await.unwrap().is_some());
        assert!(storage.load("api.example.com").await.unwrap().is_none());
    }
}
