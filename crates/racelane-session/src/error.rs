//! Error types for the session layer.

use racelane_protocol::{ErrorCode, PlayerId};
use racelane_room::RoomError;

/// Errors returned by the session manager and the gateway.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SessionError {
    /// The room rejected the operation.
    #[error(transparent)]
    Room(#[from] RoomError),

    /// No session exists for the given player.
    #[error("session not found for player {0}")]
    NotFound(PlayerId),

    /// The reconnection token was never issued, or its session is gone.
    #[error("invalid reconnection token")]
    InvalidToken,

    /// The reconnection grace period has elapsed and the seat was given up.
    #[error("session expired for player {0}")]
    SessionExpired(PlayerId),

    /// The player's session is already connected.
    #[error("player {0} already has an active session")]
    AlreadyConnected(PlayerId),
}

impl SessionError {
    /// The client-visible category of this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Room(err) => err.code(),
            Self::NotFound(_) => ErrorCode::NotFound,
            Self::InvalidToken => ErrorCode::InvalidToken,
            Self::SessionExpired(_) => ErrorCode::SessionExpired,
            Self::AlreadyConnected(_) => ErrorCode::BadRequest,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use racelane_protocol::RoomId;

    #[test]
    fn test_code_room_error_passes_through() {
        let err: SessionError = RoomError::RoomFull(RoomId(1)).into();
        assert_eq!(err.code(), ErrorCode::RoomFull);
        assert_eq!(err.to_string(), "room R-1 is full");
    }

    #[test]
    fn test_code_session_errors() {
        assert_eq!(SessionError::InvalidToken.code(), ErrorCode::InvalidToken);
        assert_eq!(
            SessionError::SessionExpired(PlayerId(1)).code(),
            ErrorCode::SessionExpired
        );
    }
}
