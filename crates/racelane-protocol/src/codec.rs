//! Byte codecs for envelopes, snapshots and events.
//!
//! The rest of the workspace only depends on the [`Codec`] trait; the JSON
//! implementation is the default because browser clients read it natively.

use serde::{de::DeserializeOwned, Serialize};

use crate::ProtocolError;

/// Encodes typed values to bytes and back.
///
/// `Send + Sync + 'static` because a single codec instance is shared by
/// every connection task of the server.
pub trait Codec: Send + Sync + 'static {
    /// # Errors
    /// Returns [`ProtocolError::Encode`] if the value cannot be represented.
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtocolError>;

    /// # Errors
    /// Returns [`ProtocolError::Decode`] if the bytes are malformed or do not
    /// match `T`.
    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, ProtocolError>;
}

/// A [`Codec`] backed by `serde_json`.
///
/// ```rust
/// use racelane_protocol::{ClientRequest, Codec, JsonCodec};
///
/// let codec = JsonCodec;
/// let bytes = codec.encode(&ClientRequest::CreateRoom).unwrap();
/// let decoded: ClientRequest = codec.decode(&bytes).unwrap();
/// assert_eq!(decoded, ClientRequest::CreateRoom);
/// ```
#[cfg(feature = "json")]
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

#[cfg(feature = "json")]
impl Codec for JsonCodec {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtocolError> {
        serde_json::to_vec(value).map_err(ProtocolError::Encode)
    }

    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, ProtocolError> {
        serde_json::from_slice(data).map_err(ProtocolError::Decode)
    }
}

#[cfg(all(test, feature = "json"))]
mod tests {
    use super::*;
    use crate::{Envelope, Payload, Response};

    #[test]
    fn test_json_codec_decodes_what_it_encodes() {
        let codec = JsonCodec;
        let envelope = Envelope {
            seq: 3,
            timestamp: 1500,
            payload: Payload::Response {
                reply_to: 2,
                response: Response::Ok,
            },
        };

        let bytes = codec.encode(&envelope).unwrap();
        let decoded: Envelope = codec.decode(&bytes).unwrap();

        assert_eq!(decoded, envelope);
    }

    #[test]
    fn test_json_codec_rejects_garbage() {
        let result: Result<Envelope, _> = JsonCodec.decode(b"not json");
        assert!(matches!(result, Err(ProtocolError::Decode(_))));
    }
}
