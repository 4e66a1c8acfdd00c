use thiserror::Error;
use tokio_tungstenite::tungstenite;

use crate::frame::FrameError;

/// Errors surfaced by the server accept loop and the relay client.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),
    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),
    #[error("Not connected")]
    NotConnected,
}
