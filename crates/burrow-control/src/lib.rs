//! Ingress orchestration
//!
//! Owns the listening sockets and decides, per connection, who gets the
//! bytes: the locally served API and website, a relay registered for the
//! hostname, or nobody. Relays register through an authenticated WebSocket
//! upgrade on the API hostname.

pub mod api;
pub mod config;
pub mod dns;
pub mod hostnames;
pub mod plain;
pub mod service;
pub mod tls;
pub mod web;

pub use config::{PortConfig, PortRange, ServiceConfig};
pub use dns::{
    CloudflareDnsProvider, DnsError, DnsProvider, DynamicDns, NoopDnsProvider, RecordType,
};
pub use hostnames::{HostClass, Hostnames};
pub use service::{BoundListener, Endpoint, IngressService};

use burrow_auth::AuthError;
use burrow_cert::CertError;
use burrow_relay::RelayError;
use thiserror::Error;

/// Ingress errors
#[derive(Debug, Error)]
pub enum IngressError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to bind to {address}:{port}: {reason}\n\nTroubleshooting:\n  • Check if another process is using this port: lsof -i :{port}\n  • Ports below 1024 need elevated privileges")]
    BindError {
        address: String,
        port: u16,
        reason: String,
    },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Missing header: {0}")]
    MissingHeader(String),

    #[error("Invalid relay hostname: {0}")]
    InvalidHostname(String),

    #[error("Authentication failed: {0}")]
    Auth(#[from] AuthError),

    #[error("Certificate error: {0}")]
    Certificate(#[from] CertError),

    #[error("Relay error: {0}")]
    Relay(#[from] RelayError),

    #[error("TLS handshake failed: {0}")]
    Tls(String),

    #[error("HTTP error: {0}")]
    Http(String),
}
