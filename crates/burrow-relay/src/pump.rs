//! Per-stream socket pump

use crate::relay::ActorEvent;
use crate::stats::RelayStats;
use burrow_proto::{ConnectionId, RelayFrame};
use burrow_router::BoxedStream;
use bytes::Bytes;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, trace};

const READ_BUFFER_SIZE: usize = 16 * 1024;

/// Shuttle bytes between one attached socket and the control channel.
///
/// Socket reads become `data` frames on the bounded writer queue, so a slow
/// control channel pushes back on the socket. Bytes from the peer arrive on
/// `inbound`; when the actor drops its sender the peer has closed the stream
/// and the socket is shut down without echoing a `close`.
pub(crate) async fn run(
    connection_id: ConnectionId,
    socket: BoxedStream,
    mut inbound: mpsc::UnboundedReceiver<Bytes>,
    outbound: mpsc::Sender<RelayFrame>,
    events: mpsc::UnboundedSender<ActorEvent>,
    stats: Arc<RelayStats>,
) {
    let (mut reader, mut writer) = tokio::io::split(socket);
    let mut buf = vec![0u8; READ_BUFFER_SIZE];

    loop {
        tokio::select! {
            read = reader.read(&mut buf) => match read {
                Ok(0) => {
                    trace!("[{}] Local socket reached EOF", connection_id);
                    break;
                }
                Ok(n) => {
                    stats.record_out(n);
                    let frame = RelayFrame::data(connection_id.clone(), Bytes::copy_from_slice(&buf[..n]));
                    if outbound.send(frame).await.is_err() {
                        debug!("[{}] Control channel writer gone", connection_id);
                        break;
                    }
                }
                Err(e) => {
                    debug!("[{}] Local socket read error: {}", connection_id, e);
                    break;
                }
            },
            data = inbound.recv() => match data {
                Some(bytes) => {
                    if let Err(e) = writer.write_all(&bytes).await {
                        debug!("[{}] Local socket write error: {}", connection_id, e);
                        break;
                    }
                }
                None => {
                    trace!("[{}] Stream closed by peer", connection_id);
                    let _ = writer.shutdown().await;
                    return;
                }
            },
        }
    }

    let _ = writer.shutdown().await;
    let _ = events.send(ActorEvent::StreamEnded(connection_id));
}
