//! Client-facing request/response surface and the wire envelope.
//!
//! The request surface is transport-agnostic: the session gateway consumes
//! [`ClientRequest`] and produces [`Response`] directly, and the WebSocket
//! front-end wraps both in an [`Envelope`] for the wire.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{Phase, PlayerId, RaceEvent, RoomId, RoomSnapshot};

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

/// Everything a client can ask of the server.
///
/// Internally tagged: `{ "type": "JoinRoom", "room_id": 1, "display_name": "Alice" }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientRequest {
    CreateRoom,
    ListRooms,
    JoinRoom {
        room_id: RoomId,
        display_name: String,
    },
    SetReady {
        room_id: RoomId,
        player_id: PlayerId,
        ready: bool,
    },
    LeaveRoom {
        room_id: RoomId,
        player_id: PlayerId,
    },
    StartRace {
        room_id: RoomId,
    },
    ResetRoom {
        room_id: RoomId,
    },
    /// Start receiving the room's events. With `last_seen`, the server
    /// resumes from the event log when it still covers that point; otherwise
    /// a fresh snapshot is sent first.
    Subscribe {
        room_id: RoomId,
        #[serde(default)]
        last_seen: Option<u64>,
    },
    Unsubscribe {
        room_id: RoomId,
    },
    /// Resume a dropped session with the token handed out on join.
    Reconnect {
        token: String,
    },
    /// Accepted for compatibility with older clients; the server does not
    /// relay chat.
    Chat {
        room_id: RoomId,
        text: String,
    },
    Heartbeat {
        client_time: u64,
    },
}

// ---------------------------------------------------------------------------
// Responses
// ---------------------------------------------------------------------------

/// A room as shown in room listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomSummary {
    pub room_id: RoomId,
    pub phase: Phase,
    pub player_count: usize,
    pub max_players: usize,
}

/// The server's answer to exactly one [`ClientRequest`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Response {
    RoomCreated {
        room_id: RoomId,
    },
    RoomList {
        rooms: Vec<RoomSummary>,
    },
    Joined {
        room_id: RoomId,
        player_id: PlayerId,
        reconnect_token: String,
    },
    Reconnected {
        room_id: RoomId,
        player_id: PlayerId,
    },
    Subscribed {
        room_id: RoomId,
    },
    /// The mutation was applied; its events follow on the room's stream.
    Ok,
    /// The request was understood but deliberately not acted upon.
    Ignored {
        reason: String,
    },
    HeartbeatAck {
        client_time: u64,
        server_time: u64,
    },
    Error {
        code: ErrorCode,
        message: String,
    },
}

/// Stable, client-visible error categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    NotFound,
    InvalidTransition,
    RoomFull,
    InvalidName,
    UnknownPlayer,
    InvalidToken,
    SessionExpired,
    Unavailable,
    BadRequest,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

// ---------------------------------------------------------------------------
// Deliveries
// ---------------------------------------------------------------------------

/// A message pushed to a room subscriber.
///
/// A subscription always starts with either a `Snapshot` or a run of
/// replayed events, followed by live events in sequence order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum Delivery {
    Snapshot(RoomSnapshot),
    Event(RaceEvent),
}

impl Delivery {
    /// Sequence number this delivery brings the subscriber up to.
    pub fn seq(&self) -> u64 {
        match self {
            Self::Snapshot(snapshot) => snapshot.seq,
            Self::Event(event) => event.seq,
        }
    }

    pub fn room_id(&self) -> RoomId {
        match self {
            Self::Snapshot(snapshot) => snapshot.room_id,
            Self::Event(event) => event.room_id,
        }
    }
}

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

/// What an envelope carries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum Payload {
    /// Client → server. `id` is echoed back in the matching response.
    Request { id: u64, request: ClientRequest },
    /// Server → client answer to request `reply_to`.
    Response { reply_to: u64, response: Response },
    /// Server → client push for a subscribed room.
    Delivery(Delivery),
}

/// The top-level wire message. Each side numbers its own envelopes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub seq: u64,
    /// Milliseconds since the sender started.
    pub timestamp: u64,
    pub payload: Payload,
}
