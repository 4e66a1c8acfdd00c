//! Message routing between publishers and viewers.
//!
//! Routing is split in two steps:
//! - [`route`] is a pure decision from a command to a [`Route`]
//! - [`dispatch`] resolves that route against the [`Registry`] and enqueues
//!   the original transport message, unmodified, to every destination
//!
//! | type                                          | usual sender | destinations         |
//! |-----------------------------------------------|--------------|----------------------|
//! | `watch_request`                               | viewer       | publisher `target_id`|
//! | `start_streaming`, `stop_streaming`           | viewer       | all publishers       |
//! | `tile_metadata`, `tile_data`, `tile_complete` | publisher    | all viewers          |
//!
//! Routing looks at the type only; the sender's class is not checked.
//! Anything else is dropped without notifying the sender.

use serde_json::Value;
use tokio_tungstenite::tungstenite::Message;

use crate::peer::{PeerClass, PeerHandle, PeerId};
use crate::registry::Registry;

/// Tile stream message kinds sent by publishers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TileKind {
    Metadata,
    Data,
    Complete,
}

/// A header validated just enough to route it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    WatchRequest { target_id: Option<PeerId> },
    StartStreaming,
    StopStreaming,
    Tile(TileKind),
    /// Unrecognized or missing `type`.
    Unknown(Option<String>),
}

impl Command {
    /// Interpret a decoded header. Never fails; bad input becomes `Unknown`.
    pub fn from_header(header: &Value) -> Self {
        let Some(kind) = header.get("type").and_then(Value::as_str) else {
            return Self::Unknown(None);
        };
        match kind {
            "watch_request" => Self::WatchRequest {
                target_id: header
                    .get("target_id")
                    .and_then(Value::as_str)
                    .filter(|id| !id.is_empty())
                    .map(PeerId::from),
            },
            "start_streaming" => Self::StartStreaming,
            "stop_streaming" => Self::StopStreaming,
            "tile_metadata" => Self::Tile(TileKind::Metadata),
            "tile_data" => Self::Tile(TileKind::Data),
            "tile_complete" => Self::Tile(TileKind::Complete),
            other => Self::Unknown(Some(other.to_string())),
        }
    }

    /// Wire name of the command, if recognized.
    pub fn name(&self) -> Option<&str> {
        match self {
            Self::WatchRequest { .. } => Some("watch_request"),
            Self::StartStreaming => Some("start_streaming"),
            Self::StopStreaming => Some("stop_streaming"),
            Self::Tile(TileKind::Metadata) => Some("tile_metadata"),
            Self::Tile(TileKind::Data) => Some("tile_data"),
            Self::Tile(TileKind::Complete) => Some("tile_complete"),
            Self::Unknown(_) => None,
        }
    }
}

/// Why a message was not routed anywhere.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropReason {
    UnknownType(Option<String>),
    MissingTarget,
    TargetNotFound(PeerId),
}

/// Routing decision for one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// One publisher, by id.
    Publisher(PeerId),
    AllPublishers,
    AllViewers,
    Drop(DropReason),
}

/// Outcome of dispatching one message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub attempted: usize,
    pub delivered: usize,
    pub failed: usize,
    pub dropped: Option<DropReason>,
}

impl DeliveryReport {
    fn dropped(reason: DropReason) -> Self {
        Self {
            dropped: Some(reason),
            ..Self::default()
        }
    }
}

/// Decide where a command goes.
pub fn route(command: &Command) -> Route {
    match command {
        Command::WatchRequest { target_id: Some(id) } => Route::Publisher(id.clone()),
        Command::WatchRequest { target_id: None } => Route::Drop(DropReason::MissingTarget),
        Command::StartStreaming | Command::StopStreaming => Route::AllPublishers,
        Command::Tile(_) => Route::AllViewers,
        Command::Unknown(kind) => Route::Drop(DropReason::UnknownType(kind.clone())),
    }
}

/// Route a decoded header and forward `message` to its destinations.
///
/// Destinations are resolved from registry snapshots, so no lock is held
/// while enqueueing. A failed destination never stops the others.
pub async fn dispatch(
    registry: &Registry,
    sender: PeerClass,
    header: &Value,
    message: &Message,
) -> DeliveryReport {
    let command = Command::from_header(header);

    match route(&command) {
        Route::Publisher(id) => match registry.lookup_publisher(&id).await {
            Some(handle) => {
                log::debug!("Forwarding watch_request from {sender} to publisher {id}");
                fan_out(vec![(id, handle)], message)
            }
            None => {
                log::info!("watch_request target {id} is not registered");
                DeliveryReport::dropped(DropReason::TargetNotFound(id))
            }
        },
        Route::AllPublishers => {
            let targets = registry.snapshot_publishers().await;
            log::debug!(
                "Forwarding {} from {sender} to {} publishers",
                command.name().unwrap_or_default(),
                targets.len()
            );
            fan_out(targets, message)
        }
        Route::AllViewers => {
            let targets = registry.snapshot_viewers().await;
            log::trace!(
                "Forwarding {} from {sender} to {} viewers",
                command.name().unwrap_or_default(),
                targets.len()
            );
            fan_out(targets, message)
        }
        Route::Drop(reason) => {
            log::debug!("Dropping message from {sender}: {reason:?}");
            DeliveryReport::dropped(reason)
        }
    }
}

fn fan_out(targets: Vec<(PeerId, PeerHandle)>, message: &Message) -> DeliveryReport {
    let mut report = DeliveryReport::default();
    for (id, handle) in targets {
        report.attempted += 1;
        match handle.send(message.clone()) {
            Ok(()) => report.delivered += 1,
            Err(e) => {
                report.failed += 1;
                log::warn!("Delivery to {id} ({}) failed: {e}", handle.remote_addr());
            }
        }
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame;
    use crate::peer::ConnectionId;
    use serde_json::json;
    use tokio::sync::mpsc;

    fn handle(n: u64) -> (PeerHandle, mpsc::Receiver<Message>) {
        PeerHandle::channel(ConnectionId(n), format!("10.0.0.{n}:9000"), 8)
    }

    fn binary(header: Value, payload: &[u8]) -> Message {
        Message::Binary(frame::encode(&header, payload).unwrap().into())
    }

    #[test]
    fn test_command_parsing() {
        assert_eq!(
            Command::from_header(&json!({"type": "watch_request", "target_id": "cam1"})),
            Command::WatchRequest { target_id: Some("cam1".into()) }
        );
        assert_eq!(
            Command::from_header(&json!({"type": "watch_request", "target_id": 5})),
            Command::WatchRequest { target_id: None }
        );
        assert_eq!(
            Command::from_header(&json!({"type": "tile_data", "seq": 1})),
            Command::Tile(TileKind::Data)
        );
        assert_eq!(
            Command::from_header(&json!({"type": "login"})),
            Command::Unknown(Some("login".into()))
        );
        assert_eq!(Command::from_header(&json!({})), Command::Unknown(None));
        assert_eq!(Command::from_header(&json!([1, 2])), Command::Unknown(None));
    }

    #[test]
    fn test_route_table() {
        let watch = Command::WatchRequest { target_id: Some("cam1".into()) };

        assert_eq!(route(&watch), Route::Publisher("cam1".into()));
        assert_eq!(route(&Command::StartStreaming), Route::AllPublishers);
        assert_eq!(route(&Command::StopStreaming), Route::AllPublishers);
        for kind in [TileKind::Metadata, TileKind::Data, TileKind::Complete] {
            assert_eq!(route(&Command::Tile(kind)), Route::AllViewers);
        }
        assert_eq!(
            route(&Command::WatchRequest { target_id: None }),
            Route::Drop(DropReason::MissingTarget)
        );
    }

    #[test]
    fn test_route_unknown() {
        assert_eq!(
            route(&Command::Unknown(None)),
            Route::Drop(DropReason::UnknownType(None))
        );
        assert_eq!(
            route(&Command::Unknown(Some("ping".into()))),
            Route::Drop(DropReason::UnknownType(Some("ping".into())))
        );
    }

    #[tokio::test]
    async fn test_watch_request_unicast_unmodified() {
        let registry = Registry::new();
        let (cam1, mut rx1) = handle(1);
        let (cam2, mut rx2) = handle(2);
        registry.register_publisher("cam1".into(), cam1).await;
        registry.register_publisher("cam2".into(), cam2).await;

        let header = json!({"type": "watch_request", "target_id": "cam1"});
        let message = binary(header.clone(), &[]);
        let report = dispatch(&registry, PeerClass::Viewer, &header, &message).await;

        assert_eq!(report.attempted, 1);
        assert_eq!(report.delivered, 1);
        assert_eq!(rx1.try_recv().unwrap(), message);
        assert!(rx2.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_watch_request_unknown_target() {
        let registry = Registry::new();
        let (cam1, mut rx1) = handle(1);
        registry.register_publisher("cam1".into(), cam1).await;

        let header = json!({"type": "watch_request", "target_id": "nobody"});
        let message = binary(header.clone(), &[]);
        let report = dispatch(&registry, PeerClass::Viewer, &header, &message).await;

        assert_eq!(report.attempted, 0);
        assert_eq!(report.dropped, Some(DropReason::TargetNotFound("nobody".into())));
        assert!(rx1.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_start_streaming_best_effort() {
        let registry = Registry::new();
        let (a, mut rx_a) = handle(1);
        let (b, rx_b) = handle(2);
        let (c, mut rx_c) = handle(3);
        registry.register_publisher("a".into(), a).await;
        registry.register_publisher("b".into(), b).await;
        registry.register_publisher("c".into(), c).await;
        drop(rx_b);

        let header = json!({"type": "start_streaming"});
        let message = Message::Text(header.to_string().into());
        let report = dispatch(&registry, PeerClass::Viewer, &header, &message).await;

        assert_eq!(report.attempted, 3);
        assert_eq!(report.delivered, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(rx_a.try_recv().unwrap(), message);
        assert_eq!(rx_c.try_recv().unwrap(), message);
    }

    #[tokio::test]
    async fn test_publisher_start_streaming_reaches_all_publishers() {
        let registry = Registry::new();
        let (cam1, mut rx1) = handle(1);
        let (cam2, mut rx2) = handle(2);
        registry.register_publisher("cam1".into(), cam1).await;
        registry.register_publisher("cam2".into(), cam2).await;

        let header = json!({"type": "start_streaming"});
        let message = Message::Text(header.to_string().into());
        let report = dispatch(&registry, PeerClass::Publisher, &header, &message).await;

        assert_eq!(report.attempted, 2);
        assert_eq!(report.delivered, 2);
        assert_eq!(report.dropped, None);
        assert_eq!(rx1.try_recv().unwrap(), message);
        assert_eq!(rx2.try_recv().unwrap(), message);
    }

    #[tokio::test]
    async fn test_viewer_tile_data_reaches_all_viewers() {
        let registry = Registry::new();
        let (v1, mut rx1) = handle(1);
        let (v2, mut rx2) = handle(2);
        registry.register_viewer("viewer_1".into(), v1).await;
        registry.register_viewer("viewer_2".into(), v2).await;

        let header = json!({"type": "tile_data"});
        let message = binary(header.clone(), &[4, 5, 6]);
        let report = dispatch(&registry, PeerClass::Viewer, &header, &message).await;

        assert_eq!(report.delivered, 2);
        assert_eq!(rx1.try_recv().unwrap(), message);
        assert_eq!(rx2.try_recv().unwrap(), message);
    }

    #[tokio::test]
    async fn test_full_queue_does_not_block_others() {
        let registry = Registry::new();
        let (slow, _rx_slow) = PeerHandle::channel(ConnectionId(1), "slow", 1);
        let (fast, mut rx_fast) = handle(2);
        registry.register_viewer("viewer_a".into(), slow.clone()).await;
        registry.register_viewer("viewer_b".into(), fast).await;
        slow.send(Message::Text("backlog".into())).unwrap();

        let header = json!({"type": "tile_data"});
        let message = binary(header.clone(), &[9, 9, 9]);
        let report = dispatch(&registry, PeerClass::Publisher, &header, &message).await;

        assert_eq!(report.attempted, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(rx_fast.try_recv().unwrap(), message);
    }

    #[tokio::test]
    async fn test_tile_data_without_viewers() {
        let registry = Registry::new();
        let header = json!({"type": "tile_data"});
        let message = binary(header.clone(), &[1, 2, 3]);

        let report = dispatch(&registry, PeerClass::Publisher, &header, &message).await;
        assert_eq!(report, DeliveryReport::default());
    }

    #[tokio::test]
    async fn test_tiles_fan_out_to_viewers_only() {
        let registry = Registry::new();
        let (pubr, mut rx_pub) = handle(1);
        let (v1, mut rx_v1) = handle(2);
        let (v2, mut rx_v2) = handle(3);
        registry.register_publisher("cam1".into(), pubr).await;
        registry.register_viewer("viewer_1".into(), v1).await;
        registry.register_viewer("viewer_2".into(), v2).await;

        let header = json!({"type": "tile_metadata", "cols": 4, "rows": 4});
        let message = binary(header.clone(), &[]);
        let report = dispatch(&registry, PeerClass::Publisher, &header, &message).await;

        assert_eq!(report.delivered, 2);
        assert_eq!(rx_v1.try_recv().unwrap(), message);
        assert_eq!(rx_v2.try_recv().unwrap(), message);
        assert!(rx_pub.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_unknown_type_sends_nothing() {
        let registry = Registry::new();
        let (v, mut rx) = handle(1);
        registry.register_viewer("viewer_1".into(), v).await;

        let header = json!({"type": "mouse_position"});
        let message = binary(header.clone(), &[]);
        let report = dispatch(&registry, PeerClass::Publisher, &header, &message).await;

        assert_eq!(report.attempted, 0);
        assert!(report.dropped.is_some());
        assert!(rx.try_recv().is_err());
    }
}
