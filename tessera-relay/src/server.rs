//! WebSocket relay server.
//!
//! Architecture:
//! ```text
//! Publisher cam1 ──┐                         ┌── Viewer A
//!   /publish/cam1  │      ┌──────────┐       │     /
//!                  ├──────┤ Registry ├───────┤
//! Publisher cam2 ──┘      └──────────┘       └── Viewer B
//!   /publish/cam2   watch/start/stop ◄──  ──► tile_*
//! ```
//!
//! The server owns one [`Registry`] for its whole lifetime and spawns one
//! [`Session`] per accepted connection. It holds no other mutable state
//! besides counters.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::net::TcpListener;

use crate::error::RelayError;
use crate::peer::ConnectionId;
use crate::registry::Registry;
use crate::session::{Session, SessionContext, SessionEnd};
use crate::stats::{RelayStats, StatsSnapshot};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: String,
    /// Handshake path prefix identifying publishers
    pub publish_prefix: String,
    /// Messages buffered per connection before deliveries to it fail
    pub outbound_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8765".to_string(),
            publish_prefix: "/publish/".to_string(),
            outbound_capacity: 1024,
        }
    }
}

/// The relay server.
pub struct RelayServer {
    config: ServerConfig,
    registry: Arc<Registry>,
    stats: Arc<RelayStats>,
    next_conn_id: AtomicU64,
}

impl RelayServer {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            registry: Arc::new(Registry::new()),
            stats: Arc::new(RelayStats::new()),
            next_conn_id: AtomicU64::new(1),
        }
    }

    /// Create with default configuration.
    pub fn with_defaults() -> Self {
        Self::new(ServerConfig::default())
    }

    /// Bind `config.bind_addr` and serve forever.
    pub async fn run(&self) -> Result<(), RelayError> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        log::info!("Relay listening on {}", listener.local_addr()?);
        log::info!(
            "Publishers connect at {}<device_id>, viewers at any other path",
            self.config.publish_prefix
        );
        self.serve(listener).await
    }

    /// Accept connections on an already bound listener.
    ///
    /// Only a failing `accept` ends the loop; handshake and session errors
    /// are logged per connection.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), RelayError> {
        let ctx = SessionContext {
            registry: self.registry.clone(),
            stats: self.stats.clone(),
            publish_prefix: Arc::from(self.config.publish_prefix.as_str()),
            outbound_capacity: self.config.outbound_capacity,
        };

        loop {
            let (stream, addr) = listener.accept().await?;
            let conn_id = ConnectionId(self.next_conn_id.fetch_add(1, Ordering::Relaxed));
            log::debug!("New TCP connection {conn_id} from {addr}");

            let ctx = ctx.clone();
            tokio::spawn(async move {
                match Session::accept(stream, addr, conn_id, ctx).await {
                    Ok(SessionEnd::Closed) => {}
                    Ok(SessionEnd::Errored(e)) => {
                        log::debug!("Connection {conn_id} from {addr} ended with error: {e}");
                    }
                    Err(e) => log::error!("Connection error from {addr}: {e}"),
                }
            });
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn bind_addr(&self) -> &str {
        &self.config.bind_addr
    }
}
