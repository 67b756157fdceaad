//! TLS ClientHello SNI extraction

use tokio::io::{AsyncRead, AsyncReadExt};
use thiserror::Error;
use tracing::trace;

/// Largest buffer we will accumulate while waiting for a full ClientHello
/// record (record header + maximum TLS plaintext length).
pub const MAX_CLIENT_HELLO_BYTES: usize = 5 + 16384;

const CONTENT_TYPE_HANDSHAKE: u8 = 0x16;
const EXTENSION_SERVER_NAME: u16 = 0x0000;
const NAME_TYPE_HOST_NAME: u8 = 0x00;

/// Record header (5) + handshake header (4) + client version (2) + random (32).
const FIXED_HEADER_LEN: usize = 43;

/// SNI extraction errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SniError {
    #[error("Not a TLS handshake record (content type {0:#04x})")]
    NotHandshake(u8),

    #[error("Insufficient data for ClientHello")]
    Incomplete,

    #[error("Malformed ClientHello")]
    Malformed,

    #[error("Invalid UTF-8 in SNI hostname")]
    InvalidHostname,

    #[error("Connection closed before ClientHello")]
    Closed,

    #[error("IO error while reading ClientHello: {0}")]
    Io(String),
}

/// Bounds-checked forward-only reader over the ClientHello bytes.
struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8], pos: usize) -> Self {
        Self { buf, pos }
    }

    fn remaining(&self) -> usize {
        self.buf.len().saturating_sub(self.pos)
    }

    fn u8(&mut self) -> Result<u8, SniError> {
        let byte = *self.buf.get(self.pos).ok_or(SniError::Incomplete)?;
        self.pos += 1;
        Ok(byte)
    }

    fn u16(&mut self) -> Result<u16, SniError> {
        let bytes = self.take(2)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    fn skip(&mut self, n: usize) -> Result<(), SniError> {
        self.take(n).map(|_| ())
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], SniError> {
        let end = self.pos.checked_add(n).ok_or(SniError::Malformed)?;
        let slice = self.buf.get(self.pos..end).ok_or(SniError::Incomplete)?;
        self.pos = end;
        Ok(slice)
    }
}

/// Extract the SNI hostname from the first TLS record of a connection.
///
/// Returns `Ok(None)` when the ClientHello carries no `server_name`
/// extension (or names something other than a DNS host name), and
/// `Err(SniError::Incomplete)` when the caller should read more bytes.
pub fn extract_sni(buf: &[u8]) -> Result<Option<String>, SniError> {
    let first = *buf.first().ok_or(SniError::Incomplete)?;
    if first != CONTENT_TYPE_HANDSHAKE {
        return Err(SniError::NotHandshake(first));
    }

    // Once the whole record has arrived, running off its end is malformed
    // rather than a reason to wait.
    let record_end = (buf.len() >= 5).then(|| 5 + u16::from_be_bytes([buf[3], buf[4]]) as usize);
    let complete = record_end.is_some_and(|end| buf.len() >= end);
    let record = match record_end {
        Some(end) if complete => &buf[..end],
        _ => buf,
    };

    match parse_client_hello(record) {
        Err(SniError::Incomplete) if complete => Err(SniError::Malformed),
        Ok(None) if !complete => Err(SniError::Incomplete),
        other => other,
    }
}

fn parse_client_hello(record: &[u8]) -> Result<Option<String>, SniError> {
    let mut reader = Reader::new(record, 0);
    reader.skip(FIXED_HEADER_LEN)?;

    let session_id_len = reader.u8()? as usize;
    reader.skip(session_id_len)?;

    let cipher_suites_len = reader.u16()? as usize;
    reader.skip(cipher_suites_len)?;

    let compression_len = reader.u8()? as usize;
    reader.skip(compression_len)?;

    if reader.remaining() == 0 {
        // Extension-less ClientHello
        return Ok(None);
    }

    let extensions_len = reader.u16()? as usize;
    let extensions = reader.take(extensions_len)?;
    let mut reader = Reader::new(extensions, 0);

    while reader.remaining() > 0 {
        let ext_type = reader.u16()?;
        let ext_len = reader.u16()? as usize;
        let payload = reader.take(ext_len)?;

        if ext_type == EXTENSION_SERVER_NAME {
            return parse_server_name(payload).map_err(|e| match e {
                SniError::Incomplete => SniError::Malformed,
                other => other,
            });
        }
    }

    Ok(None)
}

fn parse_server_name(payload: &[u8]) -> Result<Option<String>, SniError> {
    let mut reader = Reader::new(payload, 0);

    // server_name_list length
    reader.skip(2)?;

    if reader.u8()? != NAME_TYPE_HOST_NAME {
        return Ok(None);
    }

    let name_len = reader.u16()? as usize;
    let name = reader.take(name_len)?;

    let hostname = std::str::from_utf8(name).map_err(|_| SniError::InvalidHostname)?;
    trace!("Extracted SNI hostname: {}", hostname);

    Ok(Some(hostname.to_string()))
}

/// Read from `stream` until the first TLS record can be classified.
///
/// Every byte read is returned alongside the result so the caller can
/// replay it to whoever handles the connection next.
pub async fn read_client_hello<S>(stream: &mut S) -> (Vec<u8>, Result<Option<String>, SniError>)
where
    S: AsyncRead + Unpin,
{
    let mut buf = Vec::with_capacity(1024);
    let mut chunk = [0u8; 4096];

    loop {
        let n = match stream.read(&mut chunk).await {
            Ok(0) => return (buf, Err(SniError::Closed)),
            Ok(n) => n,
            Err(e) => return (buf, Err(SniError::Io(e.to_string()))),
        };
        buf.extend_from_slice(&chunk[..n]);

        match extract_sni(&buf) {
            Err(SniError::Incomplete) if buf.len() < MAX_CLIENT_HELLO_BYTES => continue,
            Err(SniError::Incomplete) => return (buf, Err(SniError::Malformed)),
            result => return (buf, result),
        }
    }
}

/// Build a minimal ClientHello record, used by tests across the workspace.
#[doc(hidden)]
pub fn build_client_hello(hostname: Option<&str>) -> Vec<u8> {
    let mut body = Vec::new();

    // Client version + random
    body.extend_from_slice(&[0x03, 0x03]);
    body.extend_from_slice(&[0x42; 32]);

    // Session ID
    body.push(32);
    body.extend_from_slice(&[0x07; 32]);

    // Cipher suites
    body.extend_from_slice(&[0x00, 0x04, 0x13, 0x01, 0x13, 0x02]);

    // Compression methods
    body.extend_from_slice(&[0x01, 0x00]);

    let mut extensions = Vec::new();

    // supported_versions, placed before SNI so the parser has to skip it
    extensions.extend_from_slice(&[0x00, 0x2b, 0x00, 0x03, 0x02, 0x03, 0x04]);

    if let Some(name) = hostname {
        let name = name.as_bytes();
        let list_len = 3 + name.len();
        extensions.extend_from_slice(&EXTENSION_SERVER_NAME.to_be_bytes());
        extensions.extend_from_slice(&((list_len + 2) as u16).to_be_bytes());
        extensions.extend_from_slice(&(list_len as u16).to_be_bytes());
        extensions.push(NAME_TYPE_HOST_NAME);
        extensions.extend_from_slice(&(name.len() as u16).to_be_bytes());
        extensions.extend_from_slice(name);
    }

    body.extend_from_slice(&(extensions.len() as u16).to_be_bytes());
    body.extend_from_slice(&extensions);

    let mut handshake = vec![0x01];
    let len = body.len() as u32;
    handshake.extend_from_slice(&len.to_be_bytes()[1..]);
    handshake.extend_from_slice(&body);

    let mut record = vec![CONTENT_TYPE_HANDSHAKE, 0x03, 0x01];
    record.extend_from_slice(&(handshake.len() as u16).to_be_bytes());
    record.extend_from_slice(&handshake);
    record
}
