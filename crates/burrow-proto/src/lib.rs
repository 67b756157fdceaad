//! Relay Protocol Definitions
//!
//! Every logical event on a control channel is a pair of messages: a JSON
//! text header naming the stream and event type, followed by a binary body
//! (empty for `open` and `close`).

pub mod codec;
pub mod messages;

pub use codec::{DecoderState, FrameDecoder, ProtocolError};
pub use messages::{ChannelMessage, ConnectionId, RelayFrame, RelayHeader};

/// Close code sent to a relay displaced by a newer one for the same hostname
pub const CLOSE_GOING_AWAY: u16 = 1001;

/// Close code for a relay shut down after a protocol violation
pub const CLOSE_PROTOCOL_ERROR: u16 = 1002;

/// Close code for a normal shutdown
pub const CLOSE_NORMAL: u16 = 1000;
