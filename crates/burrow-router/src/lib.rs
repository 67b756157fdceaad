//! Hostname sniffing and routing for the ingress listeners
//!
//! Classifies raw bytes on a freshly accepted socket (TLS SNI or plaintext
//! `Host:` header) before any protocol stack sees them, and keeps the
//! hostname → target routing table.

pub mod http;
pub mod prefixed;
pub mod registry;
pub mod sni;

pub use http::{
    read_request_head, sniff_host, HostSniff, RejectReason, MAX_HEAD_BYTES, PARSE_ERROR_RESPONSE,
};
pub use prefixed::{BoxedStream, PrefixedIo, RawStream};
pub use registry::{normalize_hostname, RouteRegistry};
pub use sni::{extract_sni, read_client_hello, SniError, MAX_CLIENT_HELLO_BYTES};
