//! Error types for the protocol layer.

/// Errors raised while turning wire bytes into typed messages and back.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Serialization failed.
    #[cfg(feature = "json")]
    #[error("encode failed: {0}")]
    Encode(serde_json::Error),

    /// The bytes are malformed or don't match the expected type.
    #[cfg(feature = "json")]
    #[error("decode failed: {0}")]
    Decode(serde_json::Error),

    /// The message decoded but breaks a protocol rule (for example a
    /// client sending a `Response` payload).
    #[error("invalid message: {0}")]
    InvalidMessage(String),
}
