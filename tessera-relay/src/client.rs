//! WebSocket client for publishers and viewers.
//!
//! Provides:
//! - Connection as a publisher (`/publish/<id>`) or a viewer (`/`)
//! - Sending length-prefixed binary frames or bare JSON text frames
//! - Inbound frames decoded and delivered as [`ClientEvent`]s

use std::sync::Arc;
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::{mpsc, RwLock};
use tokio_tungstenite::tungstenite::Message;

use crate::error::RelayError;
use crate::frame::{self, Frame, WireFrame};

/// Client connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Events emitted by the client.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// A frame relayed from another peer
    Frame(Frame),
    /// An inbound message that failed to decode
    Malformed(String),
    /// Connection lost
    Disconnected,
}

/// A relay client.
pub struct RelayClient {
    url: String,
    state: Arc<RwLock<ConnectionState>>,
    /// Channel to the WebSocket writer task
    outgoing_tx: Option<mpsc::Sender<Message>>,
    event_rx: Option<mpsc::Receiver<ClientEvent>>,
    event_tx: mpsc::Sender<ClientEvent>,
}

impl RelayClient {
    /// Client for an explicit WebSocket URL.
    pub fn new(url: impl Into<String>) -> Self {
        let (event_tx, event_rx) = mpsc::channel(256);
        Self {
            url: url.into(),
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            outgoing_tx: None,
            event_rx: Some(event_rx),
            event_tx,
        }
    }

    /// Client that will register as publisher `id`.
    pub fn publisher(base_url: &str, id: &str) -> Self {
        Self::new(format!("{}/publish/{id}", base_url.trim_end_matches('/')))
    }

    /// Client that will register as a viewer.
    pub fn viewer(base_url: &str) -> Self {
        Self::new(format!("{}/", base_url.trim_end_matches('/')))
    }

    /// Take the event receiver (can only be called once).
    pub fn take_event_rx(&mut self) -> Option<mpsc::Receiver<ClientEvent>> {
        self.event_rx.take()
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub async fn state(&self) -> ConnectionState {
        *self.state.read().await
    }

    /// Connect and spawn the reader and writer tasks.
    pub async fn connect(&mut self) -> Result<(), RelayError> {
        *self.state.write().await = ConnectionState::Connecting;

        let ws_stream = match tokio_tungstenite::connect_async(self.url.as_str()).await {
            Ok((ws_stream, _)) => ws_stream,
            Err(e) => {
                *self.state.write().await = ConnectionState::Disconnected;
                return Err(e.into());
            }
        };
        let (mut ws_writer, mut ws_reader) = ws_stream.split();

        let (out_tx, mut out_rx) = mpsc::channel::<Message>(256);
        self.outgoing_tx = Some(out_tx);

        tokio::spawn(async move {
            while let Some(msg) = out_rx.recv().await {
                if ws_writer.send(msg).await.is_err() {
                    break;
                }
            }
            let _ = ws_writer.close().await;
        });

        let event_tx = self.event_tx.clone();
        let state = self.state.clone();
        tokio::spawn(async move {
            while let Some(msg) = ws_reader.next().await {
                let decoded = match &msg {
                    Ok(Message::Text(text)) => frame::decode(WireFrame::Text(text.as_str())),
                    Ok(Message::Binary(data)) => frame::decode(WireFrame::Binary(data)),
                    Ok(_) => continue,
                    Err(e) => {
                        log::debug!("Relay client read error: {e}");
                        break;
                    }
                };
                let event = match decoded {
                    Ok(frame) => ClientEvent::Frame(frame),
                    Err(e) => ClientEvent::Malformed(e.to_string()),
                };
                if event_tx.send(event).await.is_err() {
                    break;
                }
            }

            *state.write().await = ConnectionState::Disconnected;
            let _ = event_tx.send(ClientEvent::Disconnected).await;
        });

        *self.state.write().await = ConnectionState::Connected;
        log::info!("Connected to relay at {}", self.url);
        Ok(())
    }

    /// Send a binary frame built from `header` and `payload`.
    pub async fn send_frame(&self, header: &Value, payload: &[u8]) -> Result<(), RelayError> {
        let encoded = frame::encode(header, payload)?;
        self.send_raw(Message::Binary(encoded.into())).await
    }

    /// Send `header` as a bare JSON text frame.
    pub async fn send_text(&self, header: &Value) -> Result<(), RelayError> {
        self.send_raw(Message::Text(header.to_string().into())).await
    }

    /// Send a transport message as is.
    pub async fn send_raw(&self, msg: Message) -> Result<(), RelayError> {
        let tx = self.outgoing_tx.as_ref().ok_or(RelayError::NotConnected)?;
        tx.send(msg).await.map_err(|_| RelayError::NotConnected)
    }

    /// Close the connection. The reader emits `Disconnected` once the
    /// server acknowledges.
    pub fn disconnect(&mut self) {
        self.outgoing_tx = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_publisher_url() {
        let client = RelayClient::publisher("ws://127.0.0.1:8765/", "cam1");
        assert_eq!(client.url(), "ws://127.0.0.1:8765/publish/cam1");
    }

    #[test]
    fn test_viewer_url() {
        let client = RelayClient::viewer("ws://127.0.0.1:8765");
        assert_eq!(client.url(), "ws://127.0.0.1:8765/");
    }

    #[test]
    fn test_take_event_rx_once() {
        let mut client = RelayClient::viewer("ws://127.0.0.1:8765");
        assert!(client.take_event_rx().is_some());
        assert!(client.take_event_rx().is_none());
    }

    #[tokio::test]
    async fn test_send_before_connect() {
        let client = RelayClient::viewer("ws://127.0.0.1:8765");
        assert_eq!(client.state().await, ConnectionState::Disconnected);
        let result = client.send_text(&json!({"type": "start_streaming"})).await;
        assert!(matches!(result, Err(RelayError::NotConnected)));
    }

    #[tokio::test]
    async fn test_connect_failure_resets_state() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let mut client = RelayClient::viewer(&format!("ws://127.0.0.1:{port}"));
        assert!(client.connect().await.is_err());
        assert_eq!(client.state().await, ConnectionState::Disconnected);
    }
}
