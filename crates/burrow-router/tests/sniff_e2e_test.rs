//! End-to-end sniffing over real loopback sockets
//!
//! Verifies:
//! 1. SNI extraction for many hostnames followed by route lookup
//! 2. Plaintext Host sniffing from a TCP client writing in small pieces
//! 3. Sniffed bytes are replayed intact to the downstream handler

use burrow_router::sni::build_client_hello;
use burrow_router::{
    extract_sni, read_client_hello, read_request_head, HostSniff, PrefixedIo, RouteRegistry,
    SniError,
};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

#[test]
fn test_sni_routing_many_domains() {
    let registry = RouteRegistry::new();
    let domains = [
        "app.alice.example.com",
        "api.bob.example.com",
        "db.carol.example.com",
        "x.y.z.example.org",
    ];

    for (i, domain) in domains.iter().enumerate() {
        registry.insert(domain, i);
    }

    for (i, domain) in domains.iter().enumerate() {
        let hello = build_client_hello(Some(&domain.to_uppercase()));
        let sni = extract_sni(&hello).unwrap().unwrap();
        assert_eq!(registry.lookup(&sni), Some(i), "route for {}", sni);
    }

    let unknown = build_client_hello(Some("unknown.example.com"));
    let sni = extract_sni(&unknown).unwrap().unwrap();
    assert!(registry.lookup(&sni).is_none());
}

#[test]
fn test_malformed_inputs() {
    assert_eq!(extract_sni(&[]), Err(SniError::Incomplete));
    assert_eq!(extract_sni(&[0x17, 0x03, 0x03]), Err(SniError::NotHandshake(0x17)));

    // Record header claims 3 bytes of payload: complete but far too short
    assert_eq!(
        extract_sni(&[0x16, 0x03, 0x01, 0x00, 0x03, 0x01, 0x00, 0x00]),
        Err(SniError::Malformed)
    );
}

#[tokio::test]
async fn test_tls_sniff_and_replay_over_tcp() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let hello = build_client_hello(Some("tunnel.example.com"));

    let sent = hello.clone();
    let client = tokio::spawn(async move {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        for chunk in sent.chunks(11) {
            stream.write_all(chunk).await.unwrap();
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        stream.write_all(b"application data").await.unwrap();
        stream.shutdown().await.unwrap();
    });

    let (mut socket, _) = listener.accept().await.unwrap();
    let (consumed, sni) = read_client_hello(&mut socket).await;
    assert_eq!(sni.unwrap().as_deref(), Some("tunnel.example.com"));

    let mut replay = PrefixedIo::new(consumed, socket);
    let mut everything = Vec::new();
    replay.read_to_end(&mut everything).await.unwrap();

    let mut expected = hello;
    expected.extend_from_slice(b"application data");
    assert_eq!(everything, expected);

    client.await.unwrap();
}

#[tokio::test]
async fn test_http_sniff_over_tcp() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let client = tokio::spawn(async move {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        for piece in [
            &b"GET /.well-known/acme-"[..],
            b"challenge/abc HTTP/1.1\r\nHo",
            b"st: Sub.User.Example.com\r",
            b"\n\r\n",
        ] {
            stream.write_all(piece).await.unwrap();
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        stream
    });

    let (mut socket, _) = listener.accept().await.unwrap();
    let (_, verdict) = read_request_head(&mut socket).await;
    assert_eq!(
        verdict,
        HostSniff::Found {
            hostname: "Sub.User.Example.com".to_string(),
            path: "/.well-known/acme-challenge/abc".to_string(),
        }
    );

    drop(client.await.unwrap());
}
