//! Relay actor and handle

use crate::pump;
use crate::stats::{RelayStats, RelayStatsSnapshot};
use crate::{RelayError, RelayResult};
use burrow_proto::{
    ChannelMessage, ConnectionId, FrameDecoder, RelayFrame, RelayHeader, CLOSE_NORMAL,
    CLOSE_PROTOCOL_ERROR,
};
use burrow_router::BoxedStream;
use bytes::Bytes;
use futures::{Sink, SinkExt, Stream, StreamExt};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// Frames queued for the writer before socket reads start waiting
const OUTBOUND_QUEUE_SIZE: usize = 256;
const COMMAND_QUEUE_SIZE: usize = 64;

/// Upper bound on the closing handshake once a relay is cancelled
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Notifications from pumps to the actor
#[derive(Debug)]
pub(crate) enum ActorEvent {
    StreamEnded(ConnectionId),
}

enum Command {
    Attach {
        socket: BoxedStream,
        hostname: String,
        port: u16,
        reply: oneshot::Sender<ConnectionId>,
    },
}

struct Shared {
    id: String,
    hostname: String,
    cancel: CancellationToken,
    close_code: OnceLock<u16>,
    stats: Arc<RelayStats>,
}

/// Entry point for starting relays
pub struct Relay;

impl Relay {
    /// Start the tasks for one control channel and return a handle to it.
    ///
    /// `sink` and `stream` are the two halves of the already-authenticated
    /// channel; the relay takes ownership of both.
    pub fn spawn<Si, St, E>(hostname: impl Into<String>, sink: Si, stream: St) -> RelayHandle
    where
        Si: Sink<ChannelMessage> + Unpin + Send + 'static,
        Si::Error: fmt::Display + Send,
        St: Stream<Item = Result<ChannelMessage, E>> + Unpin + Send + 'static,
        E: fmt::Display + Send + 'static,
    {
        let shared = Arc::new(Shared {
            id: format!("relay-{}", uuid::Uuid::new_v4()),
            hostname: hostname.into(),
            cancel: CancellationToken::new(),
            close_code: OnceLock::new(),
            stats: Arc::new(RelayStats::new()),
        });

        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_QUEUE_SIZE);
        let (command_tx, command_rx) = mpsc::channel(COMMAND_QUEUE_SIZE);

        tokio::spawn(writer_task(sink, outbound_rx, Arc::clone(&shared)));

        let actor = Actor {
            shared: Arc::clone(&shared),
            streams: HashMap::new(),
            decoder: FrameDecoder::new(),
            outbound: outbound_tx,
        };
        tokio::spawn(actor.run(stream, command_rx));

        info!("[{}] Relay started for {}", shared.id, shared.hostname);

        RelayHandle {
            shared,
            commands: command_tx,
        }
    }
}

/// Cloneable handle to a running relay
#[derive(Clone)]
pub struct RelayHandle {
    shared: Arc<Shared>,
    commands: mpsc::Sender<Command>,
}

impl fmt::Debug for RelayHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelayHandle")
            .field("id", &self.shared.id)
            .field("hostname", &self.shared.hostname)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl RelayHandle {
    pub fn id(&self) -> &str {
        &self.shared.id
    }

    pub fn hostname(&self) -> &str {
        &self.shared.hostname
    }

    /// Tunnel `socket` to the relay client as a new stream.
    ///
    /// The peer receives an `open` frame naming `hostname` and the local
    /// listening `port`, then the socket's bytes as `data` frames.
    pub async fn attach(
        &self,
        socket: BoxedStream,
        hostname: impl Into<String>,
        port: u16,
    ) -> RelayResult<ConnectionId> {
        if self.is_closed() {
            return Err(RelayError::Closed);
        }

        let (reply, response) = oneshot::channel();
        self.commands
            .send(Command::Attach {
                socket,
                hostname: hostname.into(),
                port,
                reply,
            })
            .await
            .map_err(|_| RelayError::Closed)?;

        response.await.map_err(|_| RelayError::Closed)
    }

    /// Close the control channel with `code`, ending every attached stream.
    pub fn close(&self, code: u16) {
        let _ = self.shared.close_code.set(code);
        self.shared.cancel.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.shared.cancel.is_cancelled()
    }

    /// Resolves once the relay has shut down, for whatever reason.
    pub async fn closed(&self) {
        self.shared.cancel.cancelled().await
    }

    pub fn stats(&self) -> RelayStatsSnapshot {
        self.shared.stats.snapshot()
    }

    /// Whether both handles refer to the same relay instance
    pub fn same_relay(&self, other: &RelayHandle) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }
}

struct Actor {
    shared: Arc<Shared>,
    streams: HashMap<ConnectionId, mpsc::UnboundedSender<Bytes>>,
    decoder: FrameDecoder,
    outbound: mpsc::Sender<RelayFrame>,
}

impl Actor {
    async fn run<St, E>(mut self, mut channel: St, mut commands: mpsc::Receiver<Command>)
    where
        St: Stream<Item = Result<ChannelMessage, E>> + Unpin,
        E: fmt::Display,
    {
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let cancel = self.shared.cancel.clone();

        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    debug!("[{}] Relay close requested", self.shared.id);
                    break;
                }

                Some(command) = commands.recv() => match command {
                    Command::Attach { socket, hostname, port, reply } => {
                        if let Some(id) = self.attach(socket, hostname, port, &events_tx).await {
                            let _ = reply.send(id);
                        }
                    }
                },

                Some(event) = events_rx.recv() => match event {
                    ActorEvent::StreamEnded(id) => {
                        if self.streams.remove(&id).is_some() {
                            self.shared.stats.set_active_streams(self.streams.len());
                            debug!("[{}] Stream {} closed locally", self.shared.id, id);
                            if self.send(RelayFrame::close(id)).await.is_err() {
                                break;
                            }
                        }
                    }
                },

                message = channel.next() => match message {
                    Some(Ok(ChannelMessage::Close(code))) => {
                        debug!("[{}] Control channel closed by peer ({:?})", self.shared.id, code);
                        break;
                    }
                    Some(Ok(message)) => {
                        if !self.handle_message(message) {
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        warn!("[{}] Control channel error: {}", self.shared.id, e);
                        break;
                    }
                    None => {
                        debug!("[{}] Control channel ended", self.shared.id);
                        break;
                    }
                },
            }
        }

        self.shutdown().await;
    }

    async fn attach(
        &mut self,
        socket: BoxedStream,
        hostname: String,
        port: u16,
        events: &mpsc::UnboundedSender<ActorEvent>,
    ) -> Option<ConnectionId> {
        let id = ConnectionId::new();
        self.send(RelayFrame::open(id.clone(), hostname, port))
            .await
            .ok()?;

        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        self.streams.insert(id.clone(), inbound_tx);
        self.shared.stats.stream_opened();
        self.shared.stats.set_active_streams(self.streams.len());

        tokio::spawn(pump::run(
            id.clone(),
            socket,
            inbound_rx,
            self.outbound.clone(),
            events.clone(),
            Arc::clone(&self.shared.stats),
        ));

        debug!("[{}] Stream {} attached on port {}", self.shared.id, id, port);
        Some(id)
    }

    /// Returns false when the channel has to be torn down.
    fn handle_message(&mut self, message: ChannelMessage) -> bool {
        let frame = match self.decoder.push(message) {
            Ok(Some(frame)) => frame,
            Ok(None) => return true,
            Err(e) => {
                warn!("[{}] Protocol error, closing relay: {}", self.shared.id, e);
                let _ = self.shared.close_code.set(CLOSE_PROTOCOL_ERROR);
                return false;
            }
        };

        match frame.header {
            RelayHeader::Data { connection_id } => match self.streams.get(&connection_id) {
                Some(tx) => {
                    self.shared.stats.record_in(frame.body.len());
                    let _ = tx.send(frame.body);
                }
                None => trace!(
                    "[{}] Dropping data for unknown stream {}",
                    self.shared.id,
                    connection_id
                ),
            },
            RelayHeader::Close { connection_id } => {
                if self.streams.remove(&connection_id).is_some() {
                    self.shared.stats.set_active_streams(self.streams.len());
                    debug!("[{}] Stream {} closed by peer", self.shared.id, connection_id);
                }
            }
            RelayHeader::Open { connection_id, .. } => {
                trace!(
                    "[{}] Ignoring peer open for {}",
                    self.shared.id,
                    connection_id
                );
            }
            RelayHeader::Unknown => {
                trace!("[{}] Ignoring unknown frame type", self.shared.id);
            }
        }

        true
    }

    async fn send(&self, frame: RelayFrame) -> Result<(), ()> {
        self.outbound.send(frame).await.map_err(|_| ())
    }

    async fn shutdown(mut self) {
        // Dropping the senders ends every pump and closes its socket
        let stream_count = self.streams.len();
        self.streams.clear();
        self.shared.stats.set_active_streams(0);

        // The writer sends the close frame once it sees the cancellation
        let code = *self.shared.close_code.get_or_init(|| CLOSE_NORMAL);
        self.shared.cancel.cancel();

        let stats = self.shared.stats.snapshot();
        info!(
            "[{}] Relay for {} closed (code {}, {} streams dropped, {} total, {} bytes in, {} bytes out, up {}s)",
            self.shared.id,
            self.shared.hostname,
            code,
            stream_count,
            stats.total_streams,
            stats.bytes_in,
            stats.bytes_out,
            stats.uptime_secs
        );
    }
}

/// Owns the channel sink; frames are written as header + body pairs.
///
/// Every write is abandoned as soon as the relay is cancelled. Queued frames,
/// the close frame and the sink's own close then get [`CLOSE_TIMEOUT`] to
/// finish before the sink is dropped.
async fn writer_task<Si>(mut sink: Si, mut outbound: mpsc::Receiver<RelayFrame>, shared: Arc<Shared>)
where
    Si: Sink<ChannelMessage> + Unpin,
    Si::Error: fmt::Display,
{
    let cancel = shared.cancel.clone();

    loop {
        let frame = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            frame = outbound.recv() => match frame {
                Some(frame) => frame,
                None => break,
            },
        };

        let result = tokio::select! {
            _ = cancel.cancelled() => break,
            result = write_frame(&mut sink, frame, &shared.id) => result,
        };

        if let Err(e) = result {
            warn!("[{}] Control channel send error: {}", shared.id, e);
            cancel.cancel();
            debug!("[{}] Relay writer task ended", shared.id);
            return;
        }
    }

    let code = shared.close_code.get().copied().unwrap_or(CLOSE_NORMAL);
    let finish = async {
        while let Ok(frame) = outbound.try_recv() {
            write_frame(&mut sink, frame, &shared.id).await?;
        }
        sink.send(ChannelMessage::Close(Some(code))).await?;
        sink.close().await
    };

    match timeout(CLOSE_TIMEOUT, finish).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => debug!("[{}] Control channel close error: {}", shared.id, e),
        Err(_) => warn!(
            "[{}] Control channel did not close within {:?}, dropping it",
            shared.id, CLOSE_TIMEOUT
        ),
    }
    drop(sink);

    debug!("[{}] Relay writer task ended", shared.id);
}

async fn write_frame<Si>(sink: &mut Si, frame: RelayFrame, relay_id: &str) -> Result<(), Si::Error>
where
    Si: Sink<ChannelMessage> + Unpin,
{
    let [header, body] = match frame.encode() {
        Ok(messages) => messages,
        Err(e) => {
            warn!("[{}] Failed to encode frame: {}", relay_id, e);
            return Ok(());
        }
    };

    sink.feed(header).await?;
    sink.feed(body).await?;
    sink.flush().await
}
