//! # tessera-relay: Tile stream relay between publishers and viewers
//!
//! Accepts WebSocket connections, classifies each one by its handshake path
//! and forwards messages by type. Tile payloads are never inspected or
//! re-encoded; forwarded frames are relayed byte-for-byte.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   /publish/<id>   ┌──────────────┐        /        ┌─────────────┐
//! │ Publisher   │ ◄───────────────► │ RelayServer  │ ◄─────────────► │ Viewer      │
//! │ (tiles out) │   tile_* ──►      │              │      ◄── watch  │ (tiles in)  │
//! └─────────────┘                   └──────┬───────┘                 └─────────────┘
//!                                          │ one Session per connection
//!                                   ┌──────┴───────┐
//!                                   │ Registry     │
//!                                   │ publishers / │
//!                                   │ viewers      │
//!                                   └──────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`frame`] - Length-prefixed JSON header + opaque payload codec
//! - [`peer`] - Peer identities and connection handles
//! - [`registry`] - Concurrent publisher/viewer routing table
//! - [`router`] - Per-type unicast/broadcast routing
//! - [`session`] - Per-connection lifecycle
//! - [`server`] - Accept loop
//! - [`client`] - Publisher/viewer client
//! - [`stats`] - Relay counters

pub mod error;
pub mod frame;
pub mod peer;
pub mod registry;
pub mod router;
pub mod session;
pub mod server;
pub mod client;
pub mod stats;

// Re-exports for convenience
pub use error::RelayError;
pub use frame::{Frame, FrameError, FrameRef, WireFrame};
pub use peer::{ConnectionId, PeerClass, PeerHandle, PeerId, SendError};
pub use registry::Registry;
pub use router::{Command, DeliveryReport, DropReason, Route, TileKind};
pub use session::{Classification, Session, SessionContext, SessionEnd};
pub use server::{RelayServer, ServerConfig};
pub use client::{ClientEvent, ConnectionState, RelayClient};
pub use stats::{RelayStats, StatsSnapshot};
