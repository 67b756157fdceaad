//! Header/body alternation decoder

use crate::messages::{ChannelMessage, RelayFrame, RelayHeader};
use bytes::Bytes;
use thiserror::Error;
use tracing::trace;

/// Protocol errors
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Invalid relay header: {0}")]
    InvalidHeader(#[from] serde_json::Error),

    #[error("Close messages are not part of the frame stream")]
    UnexpectedClose,
}

/// Where the decoder is in the header/body alternation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecoderState {
    AwaitingHeader,
    AwaitingBody(RelayHeader),
}

/// Per-channel decoder pairing each header with the message that follows it.
///
/// A header that fails to parse leaves the channel desynchronized; the
/// caller is expected to close the channel on any error.
#[derive(Debug)]
pub struct FrameDecoder {
    state: DecoderState,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self {
            state: DecoderState::AwaitingHeader,
        }
    }

    pub fn state(&self) -> &DecoderState {
        &self.state
    }

    /// Feed one channel message; yields a frame once its body has arrived.
    pub fn push(&mut self, message: ChannelMessage) -> Result<Option<RelayFrame>, ProtocolError> {
        let state = std::mem::replace(&mut self.state, DecoderState::AwaitingHeader);

        match (state, message) {
            (_, ChannelMessage::Close(_)) => Err(ProtocolError::UnexpectedClose),
            (DecoderState::AwaitingHeader, ChannelMessage::Text(text)) => {
                self.accept_header(serde_json::from_str(&text)?)
            }
            // Headers sent as binary are parsed from their UTF-8 bytes
            (DecoderState::AwaitingHeader, ChannelMessage::Binary(bytes)) => {
                self.accept_header(serde_json::from_slice(&bytes)?)
            }
            (DecoderState::AwaitingBody(header), ChannelMessage::Binary(body)) => {
                Ok(Some(RelayFrame { header, body }))
            }
            // Bodies sent as text are taken as their UTF-8 bytes
            (DecoderState::AwaitingBody(header), ChannelMessage::Text(text)) => {
                Ok(Some(RelayFrame {
                    header,
                    body: Bytes::from(text.into_bytes()),
                }))
            }
        }
    }
}

impl FrameDecoder {
    fn accept_header(&mut self, header: RelayHeader) -> Result<Option<RelayFrame>, ProtocolError> {
        trace!("Relay header: {:?}", header);
        self.state = DecoderState::AwaitingBody(header);
        Ok(None)
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::ConnectionId;

    fn text(s: &str) -> ChannelMessage {
        ChannelMessage::Text(s.to_string())
    }

    fn binary(b: &'static [u8]) -> ChannelMessage {
        ChannelMessage::Binary(Bytes::from_static(b))
    }

    #[test]
    fn test_header_then_body() {
        let mut decoder = FrameDecoder::new();

        let first = decoder
            .push(text(r#"{"type":"data","connectionId":"s1"}"#))
            .unwrap();
        assert!(first.is_none());
        assert!(matches!(decoder.state(), DecoderState::AwaitingBody(_)));

        let frame = decoder.push(binary(b"hello")).unwrap().unwrap();
        assert_eq!(
            frame.header,
            RelayHeader::Data {
                connection_id: ConnectionId::from("s1")
            }
        );
        assert_eq!(frame.body, Bytes::from_static(b"hello"));
        assert_eq!(decoder.state(), &DecoderState::AwaitingHeader);
    }

    #[test]
    fn test_sequence_of_frames() {
        let mut decoder = FrameDecoder::new();
        let messages = vec![
            text(r#"{"type":"data","connectionId":"a"}"#),
            binary(b"1"),
            text(r#"{"type":"close","connectionId":"a"}"#),
            binary(b""),
            text(r#"{"type":"mystery"}"#),
            binary(b"ignored"),
        ];

        let frames: Vec<_> = messages
            .into_iter()
            .filter_map(|m| decoder.push(m).unwrap())
            .collect();

        assert_eq!(frames.len(), 3);
        assert!(matches!(frames[0].header, RelayHeader::Data { .. }));
        assert!(matches!(frames[1].header, RelayHeader::Close { .. }));
        assert_eq!(frames[2].header, RelayHeader::Unknown);
    }

    #[test]
    fn test_encoded_frames_decode() {
        let mut decoder = FrameDecoder::new();
        let frame = RelayFrame::open(ConnectionId::new(), "a.example.com", 8443);
        let [header, body] = frame.encode().unwrap();

        assert!(decoder.push(header).unwrap().is_none());
        assert_eq!(decoder.push(body).unwrap(), Some(frame));
    }

    #[test]
    fn test_invalid_header_errors() {
        let mut decoder = FrameDecoder::new();
        let err = decoder.push(text("not json")).unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidHeader(_)));
    }

    #[test]
    fn test_binary_header_accepted() {
        let mut decoder = FrameDecoder::new();
        assert!(decoder
            .push(binary(br#"{"type":"close","connectionId":"s9"}"#))
            .unwrap()
            .is_none());

        let frame = decoder.push(binary(b"")).unwrap().unwrap();
        assert_eq!(
            frame.header,
            RelayHeader::Close {
                connection_id: ConnectionId::from("s9")
            }
        );
    }

    #[test]
    fn test_binary_garbage_in_header_position_errors() {
        let mut decoder = FrameDecoder::new();
        assert!(matches!(
            decoder.push(binary(b"oops")),
            Err(ProtocolError::InvalidHeader(_))
        ));
        assert!(matches!(
            decoder.push(binary(b"\xff\xfe{")),
            Err(ProtocolError::InvalidHeader(_))
        ));
    }

    #[test]
    fn test_text_body_accepted() {
        let mut decoder = FrameDecoder::new();
        decoder
            .push(text(r#"{"type":"data","connectionId":"s"}"#))
            .unwrap();
        let frame = decoder.push(text("plain")).unwrap().unwrap();
        assert_eq!(frame.body, Bytes::from_static(b"plain"));
    }

    #[test]
    fn test_close_message_rejected() {
        let mut decoder = FrameDecoder::new();
        assert!(matches!(
            decoder.push(ChannelMessage::Close(Some(1000))),
            Err(ProtocolError::UnexpectedClose)
        ));
    }
}
