//! Relay multiplexer
//!
//! Wraps one authenticated control channel and tunnels any number of raw
//! sockets over it. Each relay runs as a small set of tasks:
//!
//! - an actor owning the stream map and the frame decoder
//! - one pump per attached socket, shuttling bytes in both directions
//! - one writer owning the channel sink
//!
//! Closing the control channel closes every attached socket; closing a
//! socket only removes its own stream.

pub mod relay;
pub mod stats;
mod pump;

pub use relay::{Relay, RelayHandle};
pub use stats::{RelayStats, RelayStatsSnapshot};

use thiserror::Error;

/// Relay errors
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Relay is closed")]
    Closed,
}

/// Result type for relay operations
pub type RelayResult<T> = Result<T, RelayError>;
