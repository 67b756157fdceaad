//! Relay protocol messages

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// Identifier of one tunneled TCP connection inside a control channel
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(String);

impl ConnectionId {
    /// Allocate a fresh random (UUID v4) id
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for ConnectionId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for ConnectionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// JSON header preceding every body message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum RelayHeader {
    /// A new inbound connection for `hostname` arrived on `port`.
    ///
    /// Only this side sends `open`, so a peer's copy is read loosely: missing
    /// or malformed fields decode as `None`.
    Open {
        #[serde(rename = "connectionId")]
        connection_id: ConnectionId,
        #[serde(default, deserialize_with = "loose", skip_serializing_if = "Option::is_none")]
        hostname: Option<String>,
        #[serde(default, deserialize_with = "loose", skip_serializing_if = "Option::is_none")]
        port: Option<u16>,
    },
    /// The body carries raw stream bytes
    Data {
        #[serde(rename = "connectionId")]
        connection_id: ConnectionId,
    },
    /// The stream ended on the sending side
    Close {
        #[serde(rename = "connectionId")]
        connection_id: ConnectionId,
    },
    /// Any type this side does not understand; its body is consumed and ignored
    #[serde(other)]
    Unknown,
}

fn loose<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).ok())
}

impl RelayHeader {
    pub fn connection_id(&self) -> Option<&ConnectionId> {
        match self {
            RelayHeader::Open { connection_id, .. }
            | RelayHeader::Data { connection_id }
            | RelayHeader::Close { connection_id } => Some(connection_id),
            RelayHeader::Unknown => None,
        }
    }
}

/// One message on the control channel, independent of the transport carrying it
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelMessage {
    Text(String),
    Binary(Bytes),
    /// Channel close with an optional status code
    Close(Option<u16>),
}

/// A decoded header/body pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayFrame {
    pub header: RelayHeader,
    pub body: Bytes,
}

impl RelayFrame {
    pub fn open(connection_id: ConnectionId, hostname: impl Into<String>, port: u16) -> Self {
        Self {
            header: RelayHeader::Open {
                connection_id,
                hostname: Some(hostname.into()),
                port: Some(port),
            },
            body: Bytes::new(),
        }
    }

    pub fn data(connection_id: ConnectionId, body: Bytes) -> Self {
        Self {
            header: RelayHeader::Data { connection_id },
            body,
        }
    }

    pub fn close(connection_id: ConnectionId) -> Self {
        Self {
            header: RelayHeader::Close { connection_id },
            body: Bytes::new(),
        }
    }

    /// Encode as the header text message followed by the body binary message
    pub fn encode(&self) -> Result<[ChannelMessage; 2], serde_json::Error> {
        let header = serde_json::to_string(&self.header)?;
        Ok([
            ChannelMessage::Text(header),
            ChannelMessage::Binary(self.body.clone()),
        ])
    }
}
