//! Per-connection session.
//!
//! ```text
//! Connecting ──classify(path)──► Publisher | Viewer ──close/error──► Closed
//!                                   │    ▲
//!                                   ▼    │
//!                           decode → dispatch
//! ```
//!
//! The session owns the read half of the socket. The write half belongs to
//! a writer task fed by the connection's [`PeerHandle`] queue, so routing
//! from any session only ever enqueues.

use std::fmt::Display;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::{self, Message};

use crate::error::RelayError;
use crate::frame::{self, WireFrame};
use crate::peer::{ConnectionId, PeerClass, PeerHandle, PeerId};
use crate::registry::Registry;
use crate::router;
use crate::stats::RelayStats;

/// How long a closing session waits for its writer to flush the queue.
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Identity assigned to a connection from its handshake path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    Publisher(PeerId),
    Viewer(PeerId),
}

impl Classification {
    pub fn class(&self) -> PeerClass {
        match self {
            Self::Publisher(_) => PeerClass::Publisher,
            Self::Viewer(_) => PeerClass::Viewer,
        }
    }

    pub fn peer_id(&self) -> &PeerId {
        match self {
            Self::Publisher(id) | Self::Viewer(id) => id,
        }
    }
}

/// Classify a connection by its request path.
///
/// `<prefix><id>` with a single non-empty segment is a publisher; anything
/// else is a viewer with a freshly generated id. Query strings are ignored.
pub fn classify(path: &str, publish_prefix: &str) -> Classification {
    let path = path.split(['?', '#']).next().unwrap_or_default();
    match path.strip_prefix(publish_prefix) {
        Some(id) if !id.is_empty() && !id.contains('/') => Classification::Publisher(PeerId::from(id)),
        _ => Classification::Viewer(PeerId::generate_viewer()),
    }
}

/// How a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEnd {
    /// Close frame or end of stream.
    Closed,
    /// The receive loop hit a transport error.
    Errored(String),
}

/// Shared state every session needs.
#[derive(Clone)]
pub struct SessionContext {
    pub registry: Arc<Registry>,
    pub stats: Arc<RelayStats>,
    pub publish_prefix: Arc<str>,
    pub outbound_capacity: usize,
}

/// One accepted connection.
pub struct Session {
    conn_id: ConnectionId,
    remote_addr: String,
    ctx: SessionContext,
}

impl Session {
    pub fn new(conn_id: ConnectionId, remote_addr: impl Into<String>, ctx: SessionContext) -> Self {
        Self {
            conn_id,
            remote_addr: remote_addr.into(),
            ctx,
        }
    }

    /// Perform the WebSocket handshake on a raw TCP stream, then run.
    pub async fn accept(
        stream: TcpStream,
        addr: SocketAddr,
        conn_id: ConnectionId,
        ctx: SessionContext,
    ) -> Result<SessionEnd, RelayError> {
        let mut path = String::from("/");
        let capture_path = |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
            path = req.uri().path().to_string();
            Ok(resp)
        };
        let ws_stream = tokio_tungstenite::accept_hdr_async(stream, capture_path).await?;

        log::info!("WebSocket connection {conn_id} established from {addr}, path {path}");
        Ok(Session::new(conn_id, addr.to_string(), ctx).run(ws_stream, &path).await)
    }

    /// Classify, register, relay until the connection ends, deregister.
    pub async fn run<S>(self, ws: S, path: &str) -> SessionEnd
    where
        S: Stream<Item = Result<Message, tungstenite::Error>>
            + Sink<Message, Error = tungstenite::Error>
            + Send
            + Unpin
            + 'static,
    {
        let identity = classify(path, &self.ctx.publish_prefix);
        let class = identity.class();
        let peer_id = identity.peer_id().clone();

        let (handle, outbound_rx) = PeerHandle::channel(
            self.conn_id,
            self.remote_addr.as_str(),
            self.ctx.outbound_capacity,
        );
        let (ws_sink, mut ws_stream) = ws.split();
        let mut writer = tokio::spawn(write_loop(ws_sink, outbound_rx, self.conn_id));

        match identity {
            Classification::Publisher(id) => {
                self.ctx.registry.register_publisher(id, handle.clone()).await;
            }
            Classification::Viewer(id) => {
                self.ctx.registry.register_viewer(id, handle.clone()).await;
            }
        }
        self.ctx.stats.connection_opened();
        log::info!("{class} {peer_id} registered from {}", self.remote_addr);

        let end = loop {
            match ws_stream.next().await {
                Some(Ok(msg)) => match &msg {
                    Message::Text(text) => {
                        self.relay(class, &peer_id, WireFrame::Text(text.as_str()), &msg).await;
                    }
                    Message::Binary(data) => {
                        self.relay(class, &peer_id, WireFrame::Binary(data), &msg).await;
                    }
                    Message::Close(reason) => {
                        // Keep reading so the transport can finish the close handshake.
                        log::debug!("{class} {peer_id} sent close: {reason:?}");
                    }
                    Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {}
                },
                Some(Err(e)) => break SessionEnd::Errored(e.to_string()),
                None => break SessionEnd::Closed,
            }
        };

        self.ctx.registry.unregister(&handle).await;
        self.ctx.stats.connection_closed();
        // The queue closes once the last handle clone is gone; the writer
        // then flushes what is left and closes the sink.
        drop(handle);
        if timeout(WRITER_DRAIN_TIMEOUT, &mut writer).await.is_err() {
            log::debug!("Writer for connection {} did not drain in time", self.conn_id);
            writer.abort();
        }

        match &end {
            SessionEnd::Closed => log::info!("{class} {peer_id} disconnected ({})", self.remote_addr),
            SessionEnd::Errored(e) => {
                log::warn!("{class} {peer_id} dropped ({}): {e}", self.remote_addr)
            }
        }
        end
    }

    async fn relay(&self, class: PeerClass, peer_id: &PeerId, wire: WireFrame<'_>, msg: &Message) {
        self.ctx.stats.message_received();

        let frame = match frame::decode_ref(wire) {
            Ok(frame) => frame,
            Err(e) => {
                self.ctx.stats.frame_malformed();
                log::warn!("Discarding malformed frame from {class} {peer_id}: {e}");
                return;
            }
        };
        log::trace!(
            "{class} {peer_id} sent {:?} ({} payload bytes)",
            frame.message_type(),
            frame.payload().len()
        );

        let report = router::dispatch(&self.ctx.registry, class, &frame.header, msg).await;
        self.ctx.stats.deliveries(report.attempted, report.failed);
        if report.dropped.is_some() {
            self.ctx.stats.message_unrouted();
        }
    }
}

/// Drain a connection's outbound queue into its socket.
async fn write_loop<W>(mut sink: W, mut rx: mpsc::Receiver<Message>, conn_id: ConnectionId)
where
    W: Sink<Message> + Unpin,
    W::Error: Display,
{
    while let Some(msg) = rx.recv().await {
        if let Err(e) = sink.send(msg).await {
            log::debug!("Writer for connection {conn_id} stopped: {e}");
            break;
        }
    }
    let _ = sink.close().await;
}
