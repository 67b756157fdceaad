//! Plaintext HTTP `Host:` sniffing
//!
//! Only the `Host` header and the request path are extracted; nothing else
//! of the request is interpreted.

use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::trace;

/// Upper bound on buffered request head bytes before giving up on finding
/// a `Host:` line.
pub const MAX_HEAD_BYTES: usize = 8 * 1024;

/// Response written to connections whose head cannot be classified.
pub const PARSE_ERROR_RESPONSE: &[u8] = b"HTTP/1.1 500 Parsing exception\r\n\r\nParsing exception";

const HEAD_TERMINATOR: &[u8] = b"\r\n\r\n";

/// Why a request head was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// More than [`MAX_HEAD_BYTES`] without a `Host:` line
    TooLarge,
    /// Header block terminated without a `Host:` line
    MissingHost,
    /// `Host:` present but empty
    EmptyHost,
    /// `Host:` value is not valid UTF-8
    InvalidHost,
    /// Connection closed before classification
    Closed,
}

/// Outcome of sniffing an accumulating request head
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostSniff {
    Found { hostname: String, path: String },
    NeedMore,
    Reject(RejectReason),
}

/// Classify the bytes received so far on a plaintext connection.
///
/// The `Host:` match is case-insensitive on the header name, anchored to the
/// start of a line, and requires the line to be CRLF-terminated. The value's
/// case is preserved.
pub fn sniff_host(buf: &[u8]) -> HostSniff {
    match find_host(buf) {
        Some(Ok(hostname)) if hostname.is_empty() => HostSniff::Reject(RejectReason::EmptyHost),
        Some(Ok(hostname)) => HostSniff::Found {
            hostname,
            path: request_path(buf).unwrap_or_default(),
        },
        Some(Err(reason)) => HostSniff::Reject(reason),
        None if buf.len() > MAX_HEAD_BYTES => HostSniff::Reject(RejectReason::TooLarge),
        None if contains(buf, HEAD_TERMINATOR) => HostSniff::Reject(RejectReason::MissingHost),
        None => HostSniff::NeedMore,
    }
}

fn find_host(buf: &[u8]) -> Option<Result<String, RejectReason>> {
    let mut line_start = 0;

    while line_start < buf.len() {
        let rest = &buf[line_start..];
        let Some(newline) = rest.iter().position(|&b| b == b'\n') else {
            // Unterminated line, wait for the rest of it
            return None;
        };
        let line = &rest[..newline];
        line_start += newline + 1;

        let Some(line) = line.strip_suffix(b"\r") else {
            continue;
        };
        if line.len() < 5 || !line[..5].eq_ignore_ascii_case(b"host:") {
            continue;
        }

        let value = trim_ascii_whitespace(&line[5..]);
        return Some(
            std::str::from_utf8(value)
                .map(|s| s.to_string())
                .map_err(|_| RejectReason::InvalidHost),
        );
    }

    None
}

/// `METHOD SP+ PATH SP` at the very start of the buffer.
fn request_path(buf: &[u8]) -> Option<String> {
    let method_len = buf.iter().take_while(|b| b.is_ascii_alphabetic()).count();
    if method_len == 0 {
        return None;
    }

    let rest = &buf[method_len..];
    let gap = rest.iter().take_while(|b| b.is_ascii_whitespace()).count();
    if gap == 0 {
        return None;
    }

    let rest = &rest[gap..];
    let end = rest.iter().position(|b| b.is_ascii_whitespace())?;
    std::str::from_utf8(&rest[..end]).ok().map(str::to_string)
}

fn trim_ascii_whitespace(mut bytes: &[u8]) -> &[u8] {
    while let [first, rest @ ..] = bytes {
        if first.is_ascii_whitespace() {
            bytes = rest;
        } else {
            break;
        }
    }
    while let [rest @ .., last] = bytes {
        if last.is_ascii_whitespace() {
            bytes = rest;
        } else {
            break;
        }
    }
    bytes
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

/// Read from `stream` until [`sniff_host`] reaches a verdict.
///
/// Returns every byte consumed so it can be replayed downstream.
pub async fn read_request_head<S>(stream: &mut S) -> (Vec<u8>, HostSniff)
where
    S: AsyncRead + Unpin,
{
    let mut buf = Vec::with_capacity(1024);
    let mut chunk = [0u8; 2048];

    loop {
        let n = match stream.read(&mut chunk).await {
            Ok(0) | Err(_) => return (buf, HostSniff::Reject(RejectReason::Closed)),
            Ok(n) => n,
        };
        buf.extend_from_slice(&chunk[..n]);

        match sniff_host(&buf) {
            HostSniff::NeedMore => continue,
            verdict => {
                trace!("Request head classified after {} bytes: {:?}", buf.len(), verdict);
                return (buf, verdict);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn found(hostname: &str, path: &str) -> HostSniff {
        HostSniff::Found {
            hostname: hostname.to_string(),
            path: path.to_string(),
        }
    }

    #[test]
    fn test_host_and_path() {
        let head = b"GET /index.html HTTP/1.1\r\nHost: Alice.Example.com\r\nAccept: */*\r\n\r\n";
        assert_eq!(sniff_host(head), found("Alice.Example.com", "/index.html"));
    }

    #[test]
    fn test_header_name_case_insensitive() {
        let head = b"POST /api HTTP/1.1\r\nhOsT:example.com\r\n";
        assert_eq!(sniff_host(head), found("example.com", "/api"));
    }

    #[test]
    fn test_host_not_first_header() {
        let head = b"GET / HTTP/1.1\r\nUser-Agent: test\r\nX-Forwarded-Host: evil\r\nHost:   web.example.com\r\n\r\n";
        assert_eq!(sniff_host(head), found("web.example.com", "/"));
    }

    #[test]
    fn test_host_must_be_line_anchored() {
        let head = b"GET / HTTP/1.1\r\nX-Host: nope\r\n";
        assert_eq!(sniff_host(head), HostSniff::NeedMore);
    }

    #[test]
    fn test_partial_host_line_needs_more() {
        assert_eq!(
            sniff_host(b"GET / HTTP/1.1\r\nHost: exam"),
            HostSniff::NeedMore
        );
        assert_eq!(
            sniff_host(b"GET / HTTP/1.1\r\nHost: example.com\r"),
            HostSniff::NeedMore
        );
    }

    #[test]
    fn test_missing_path_is_empty() {
        let head = b"\r\nHost: example.com\r\n";
        assert_eq!(sniff_host(head), found("example.com", ""));
    }

    #[test]
    fn test_terminated_without_host_rejects() {
        let head = b"GET / HTTP/1.1\r\nAccept: */*\r\n\r\n";
        assert_eq!(
            sniff_host(head),
            HostSniff::Reject(RejectReason::MissingHost)
        );
    }

    #[test]
    fn test_oversized_head_rejects() {
        let mut head = b"GET / HTTP/1.1\r\n".to_vec();
        while head.len() <= MAX_HEAD_BYTES {
            head.extend_from_slice(b"X-Padding: aaaaaaaaaaaaaaaaaaaaaaaaaaaaaa\r\n");
        }
        assert_eq!(sniff_host(&head), HostSniff::Reject(RejectReason::TooLarge));
    }

    #[test]
    fn test_exactly_at_cap_needs_more() {
        let head = vec![b'a'; MAX_HEAD_BYTES];
        assert_eq!(sniff_host(&head), HostSniff::NeedMore);
    }

    #[test]
    fn test_empty_host_rejects() {
        let head = b"GET / HTTP/1.1\r\nHost: \r\n\r\n";
        assert_eq!(sniff_host(head), HostSniff::Reject(RejectReason::EmptyHost));
    }

    #[test]
    fn test_chunking_does_not_change_result() {
        let head = b"GET /.well-known/acme-challenge/tok HTTP/1.1\r\nHost: Bob.Example.COM\r\n\r\n";
        let expected = found("Bob.Example.COM", "/.well-known/acme-challenge/tok");

        for split in 1..head.len() {
            let mut buf = Vec::new();
            buf.extend_from_slice(&head[..split]);
            let first = sniff_host(&buf);
            if first != HostSniff::NeedMore {
                assert_eq!(first, expected, "split at {}", split);
                continue;
            }
            buf.extend_from_slice(&head[split..]);
            assert_eq!(sniff_host(&buf), expected, "split at {}", split);
        }
    }

    #[tokio::test]
    async fn test_read_request_head() {
        use tokio::io::AsyncWriteExt;

        let (mut client, mut server) = tokio::io::duplex(16);
        let writer = tokio::spawn(async move {
            client
                .write_all(b"GET /a HTTP/1.1\r\nHost: x.example\r\n\r\n")
                .await
                .unwrap();
            client
        });

        let (consumed, verdict) = read_request_head(&mut server).await;
        assert_eq!(verdict, found("x.example", "/a"));
        assert!(consumed.starts_with(b"GET /a"));
        drop(writer.await.unwrap());
    }

    #[tokio::test]
    async fn test_read_request_head_closed() {
        let (client, mut server) = tokio::io::duplex(16);
        drop(client);
        let (_, verdict) = read_request_head(&mut server).await;
        assert_eq!(verdict, HostSniff::Reject(RejectReason::Closed));
    }
}
