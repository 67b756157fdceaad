//! Certificate manager against real storage and a real TLS handshake

use burrow_cert::{
    CertificateBundle, CertificateManager, CertificateStorage, FileCertificateStorage,
    SelfSignedAuthority,
};
use rustls::pki_types::ServerName;
use rustls::{ClientConfig, RootCertStore};
use std::sync::Arc;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_rustls::{TlsAcceptor, TlsConnector};

fn manager_for(dir: &TempDir) -> CertificateManager {
    let storage = Arc::new(FileCertificateStorage::new(dir.path()));
    CertificateManager::new(Arc::new(SelfSignedAuthority::new(storage)), "")
}

fn client_trusting(bundle: &CertificateBundle) -> ClientConfig {
    let mut roots = RootCertStore::empty();
    for cert in rustls_pemfile::certs(&mut bundle.certificate_pem.as_bytes()) {
        roots.add(cert.unwrap()).unwrap();
    }

    ClientConfig::builder_with_provider(Arc::new(rustls::crypto::ring::default_provider()))
        .with_safe_default_protocol_versions()
        .unwrap()
        .with_root_certificates(roots)
        .with_no_client_auth()
}

#[tokio::test]
async fn test_handshake_with_issued_certificate() {
    let dir = TempDir::new().unwrap();
    let manager = manager_for(&dir);

    let server_config = manager.server_config("app.example.com").await.unwrap();
    let bundle = manager.cached("app.example.com").unwrap();
    let connector = TlsConnector::from(Arc::new(client_trusting(&bundle)));
    let acceptor = TlsAcceptor::from(server_config);

    let (client_io, server_io) = tokio::io::duplex(16 * 1024);

    let server = tokio::spawn(async move {
        let mut tls = acceptor.accept(server_io).await.unwrap();
        let mut buf = [0u8; 4];
        tls.read_exact(&mut buf).await.unwrap();
        tls.write_all(b"pong").await.unwrap();
        tls.flush().await.unwrap();
        buf
    });

    let name = ServerName::try_from("app.example.com").unwrap();
    let mut tls = connector.connect(name, client_io).await.unwrap();
    tls.write_all(b"ping").await.unwrap();
    tls.flush().await.unwrap();

    let mut reply = [0u8; 4];
    tls.read_exact(&mut reply).await.unwrap();

    assert_eq!(&reply, b"pong");
    assert_eq!(&server.await.unwrap(), b"ping");
}

#[tokio::test]
async fn test_certificate_survives_restart() {
    let dir = TempDir::new().unwrap();

    let issued = manager_for(&dir)
        .ensure_certificate("app.example.com")
        .await
        .unwrap();

    let stored = FileCertificateStorage::new(dir.path())
        .load("app.example.com")
        .await
        .unwrap()
        .expect("bundle persisted");
    assert_eq!(stored.certificate_pem, issued.certificate_pem);

    let reloaded = manager_for(&dir)
        .ensure_certificate("app.example.com")
        .await
        .unwrap();
    assert_eq!(reloaded.certificate_pem, issued.certificate_pem);
    assert_eq!(reloaded.expires_at, issued.expires_at);
}

#[tokio::test]
async fn test_hostnames_get_distinct_certificates() {
    let dir = TempDir::new().unwrap();
    let manager = manager_for(&dir);

    let api = manager.ensure_certificate("api.example.com").await.unwrap();
    let web = manager.ensure_certificate("web.example.com").await.unwrap();

    assert_ne!(api.certificate_pem, web.certificate_pem);
    assert!(Arc::ptr_eq(&manager.cached("api.example.com").unwrap(), &api));
    assert!(Arc::ptr_eq(&manager.cached("web.example.com").unwrap(), &web));
    assert!(manager.cached("other.example.com").is_none());
}
