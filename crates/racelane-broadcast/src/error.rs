//! Error types for the broadcast layer.

use racelane_protocol::RoomId;

/// Errors reported by a [`Channel`](crate::Channel).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChannelError {
    /// The transport did not acknowledge the publish. Retryable.
    #[error("publish to room {room_id} failed: {reason}")]
    PublishFailed { room_id: RoomId, reason: String },

    /// The channel has shut down and will not accept further publishes.
    #[error("channel closed")]
    Closed,
}
