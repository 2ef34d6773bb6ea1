//! Unified error type for the Racelane server.

use racelane_protocol::ProtocolError;
use racelane_room::RoomError;
use racelane_session::SessionError;

/// Top-level error wrapping every crate-specific error, so `?` works across
/// layers.
#[derive(Debug, thiserror::Error)]
pub enum RacelaneError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Room(#[from] RoomError),

    #[error(transparent)]
    Session(#[from] SessionError),

    /// Binding or accepting on the listener failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The WebSocket handshake or a frame failed.
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}
