//! Error types for the room layer.

use racelane_protocol::{ErrorCode, Phase, PlayerId, RoomId};

use crate::StoreError;

/// Errors returned by lobby operations and room handles.
///
/// Every validation error is raised before any state changes, so a failed
/// request leaves the room exactly as it was.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RoomError {
    /// The room does not exist (or has been closed and pruned).
    #[error("room {0} not found")]
    NotFound(RoomId),

    /// Every seat is taken.
    #[error("room {0} is full")]
    RoomFull(RoomId),

    /// The display name is empty, too long, or contains control characters.
    #[error("invalid display name: {0}")]
    InvalidName(String),

    /// The player is not in this room.
    #[error("player {0} is not in room {1}")]
    UnknownPlayer(PlayerId, RoomId),

    /// The operation is not allowed in the room's current phase.
    #[error("cannot {op} while room is {phase}")]
    InvalidTransition { op: &'static str, phase: Phase },

    /// The room's command channel is full or closed.
    #[error("room {0} is unavailable")]
    Unavailable(RoomId),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl RoomError {
    /// The client-visible category of this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::NotFound(_) => ErrorCode::NotFound,
            Self::RoomFull(_) => ErrorCode::RoomFull,
            Self::InvalidName(_) => ErrorCode::InvalidName,
            Self::UnknownPlayer(..) => ErrorCode::UnknownPlayer,
            Self::InvalidTransition { .. } => ErrorCode::InvalidTransition,
            Self::Unavailable(_) => ErrorCode::Unavailable,
            Self::Store(StoreError::NotFound(_)) => ErrorCode::NotFound,
            Self::Store(_) => ErrorCode::Unavailable,
        }
    }
}
