//! Peer identity and connection handles.
//!
//! A [`PeerHandle`] is the sending half of a connection's outbound queue.
//! Each connection owns exactly one writer task draining that queue into
//! the socket, so enqueueing never waits on the network and a slow peer
//! only ever backs up its own queue.

use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_tungstenite::tungstenite::Message;
use thiserror::Error;
use uuid::Uuid;

/// Opaque peer identity.
///
/// Publishers are named by their handshake path; viewers get a generated id.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PeerId(String);

impl PeerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Fresh viewer id, unique for the lifetime of the process.
    pub fn generate_viewer() -> Self {
        Self(format!("viewer_{}", Uuid::new_v4().simple()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for PeerId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Which side of the relay a connection is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PeerClass {
    /// Supplies tile data.
    Publisher,
    /// Consumes tile data.
    Viewer,
}

impl fmt::Display for PeerClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Publisher => f.write_str("publisher"),
            Self::Viewer => f.write_str("viewer"),
        }
    }
}

/// Process-unique identifier of an accepted connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Failure to enqueue a message for a destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SendError {
    /// The connection's writer is gone.
    #[error("connection closed")]
    Closed,
    /// The outbound queue is saturated.
    #[error("outbound queue full")]
    Full,
}

/// Cloneable reference to a live connection.
///
/// Two handles are equal when they refer to the same connection.
#[derive(Debug, Clone)]
pub struct PeerHandle {
    id: ConnectionId,
    remote_addr: Arc<str>,
    tx: mpsc::Sender<Message>,
}

impl PeerHandle {
    /// Create a handle and the receiving end of its outbound queue.
    pub fn channel(
        id: ConnectionId,
        remote_addr: impl Into<Arc<str>>,
        capacity: usize,
    ) -> (Self, mpsc::Receiver<Message>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let handle = Self {
            id,
            remote_addr: remote_addr.into(),
            tx,
        };
        (handle, rx)
    }

    /// Enqueue a message without waiting.
    pub fn send(&self, msg: Message) -> Result<(), SendError> {
        self.tx.try_send(msg).map_err(|e| match e {
            TrySendError::Full(_) => SendError::Full,
            TrySendError::Closed(_) => SendError::Closed,
        })
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn remote_addr(&self) -> &str {
        &self.remote_addr
    }
}

impl PartialEq for PeerHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for PeerHandle {}
