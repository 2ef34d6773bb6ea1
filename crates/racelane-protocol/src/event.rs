//! Race events: the ordered record of everything that changes a room.
//!
//! Each event carries the room's sequence number at emission time. Numbers
//! are strictly increasing and gapless per room, so a consumer that folds
//! events in order (see [`RoomSnapshot::apply`](crate::RoomSnapshot::apply))
//! reconstructs the server's room state exactly.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{
    EntrantProgress, Phase, Placement, PlayerId, PlayerView, RaceStart, RoomId,
    RoundResult,
};

/// A state-affecting event for one room.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RaceEvent {
    pub room_id: RoomId,
    /// The room's sequence number after this event.
    pub seq: u64,
    pub payload: EventPayload,
}

impl RaceEvent {
    pub fn kind(&self) -> EventKind {
        self.payload.kind()
    }
}

/// Kind-specific event data.
///
/// Internally tagged on `kind`, e.g.
/// `{ "kind": "ReadyChanged", "player_id": 1, "ready": true }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum EventPayload {
    /// One simulation step.
    Tick {
        /// Tick number within the round, starting at 1.
        tick: u64,
        /// Entrants that moved during this tick, in join order.
        progress: Vec<EntrantProgress>,
        /// Entrants that crossed the line during this tick.
        finished: Vec<Placement>,
    },

    PlayerJoined { player: PlayerView },

    /// The player is gone from the room. `forfeited` is set when the player
    /// left mid-race and their entrant was taken out of the ranking.
    PlayerLeft { player_id: PlayerId, forfeited: bool },

    ReadyChanged { player_id: PlayerId, ready: bool },

    /// `race` is present exactly when `to` is `Racing`.
    PhaseChanged {
        from: Phase,
        to: Phase,
        race: Option<RaceStart>,
    },

    /// The round ended. Moves the room to `Finished`.
    RoundFinished { result: RoundResult },

    /// The player's connection dropped or came back.
    ConnectionChanged { player_id: PlayerId, connected: bool },
}

impl EventPayload {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Tick { .. } => EventKind::Tick,
            Self::PlayerJoined { .. } => EventKind::PlayerJoined,
            Self::PlayerLeft { .. } => EventKind::PlayerLeft,
            Self::ReadyChanged { .. } => EventKind::ReadyChanged,
            Self::PhaseChanged { .. } => EventKind::PhaseChanged,
            Self::RoundFinished { .. } => EventKind::RoundFinished,
            Self::ConnectionChanged { .. } => EventKind::ConnectionChanged,
        }
    }
}

/// Discriminant of [`EventPayload`], handy for logging and assertions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    Tick,
    PlayerJoined,
    PlayerLeft,
    ReadyChanged,
    PhaseChanged,
    RoundFinished,
    ConnectionChanged,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}
