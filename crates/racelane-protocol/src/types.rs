//! Identity and state types shared by the server core and its clients.
//!
//! Everything in here is plain data: it derives `Serialize`/`Deserialize`
//! so it can travel on the wire inside events and snapshots, and it carries
//! no behavior beyond small predicates.

use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Identity types
// ---------------------------------------------------------------------------

/// A unique identifier for a player.
///
/// Newtype over `u64` so a `PlayerId` can never be passed where a `RoomId`
/// is expected. `#[serde(transparent)]` keeps the JSON form a plain number:
/// `PlayerId(42)` serializes as `42`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct PlayerId(pub u64);

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "P-{}", self.0)
    }
}

/// A unique identifier for a room (one lobby plus its race rounds).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct RoomId(pub u64);

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "R-{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Phase
// ---------------------------------------------------------------------------

/// The lifecycle phase of a room.
///
/// ```text
///        ┌──────── un-ready ────────┐
///        ▼                          │
///      Open ──(all ready, ≥ min)──→ Ready ──start──→ Racing ──→ Finished ──→ Closed
///        ▲                                                         │
///        └───────────────────────── reset ─────────────────────────┘
/// ```
///
/// Any phase may be force-closed. `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Phase {
    /// Accepting joins, leaves and ready toggles.
    Open,
    /// Every current player is ready; waiting for the start trigger.
    Ready,
    /// The race simulation owns entrant progress.
    Racing,
    /// Results are available; the room can be reset to `Open`.
    Finished,
    /// The room is gone. No further events follow.
    Closed,
}

impl Phase {
    /// Returns `true` if new players may join.
    pub fn is_joinable(self) -> bool {
        matches!(self, Self::Open)
    }

    /// Returns `true` if players may toggle their ready flag.
    pub fn accepts_ready(self) -> bool {
        matches!(self, Self::Open | Self::Ready)
    }

    /// Returns `true` if the room may be removed by the idle expiry sweep.
    pub fn is_expirable(self) -> bool {
        matches!(self, Self::Open | Self::Finished)
    }

    /// Returns `true` if moving from `self` to `target` is a legal
    /// transition.
    pub fn can_transition_to(self, target: Self) -> bool {
        use Phase::*;
        match (self, target) {
            (Closed, _) => false,
            (_, Closed) => true,
            (Open, Ready) | (Ready, Open) | (Ready, Racing) => true,
            (Racing, Finished) | (Finished, Open) => true,
            _ => false,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Open => "Open",
            Self::Ready => "Ready",
            Self::Racing => "Racing",
            Self::Finished => "Finished",
            Self::Closed => "Closed",
        };
        f.write_str(name)
    }
}

// ---------------------------------------------------------------------------
// Players and entrants
// ---------------------------------------------------------------------------

/// A player as seen by clients. Position in the room's player list is the
/// seat (join order).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerView {
    pub id: PlayerId,
    pub display_name: String,
    pub ready: bool,
    pub connected: bool,
}

/// A player's in-race representation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntrantView {
    pub player_id: PlayerId,
    /// Distance covered, in `[0, track_length]`.
    pub progress: f64,
    /// 1-based finishing position, once the entrant crossed the line.
    pub finish_rank: Option<u32>,
    /// The player left mid-race. Progress is frozen and the entrant is not
    /// ranked.
    pub forfeited: bool,
}

/// One entrant's progress after a tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntrantProgress {
    pub player_id: PlayerId,
    pub progress: f64,
}

/// A finishing position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Placement {
    pub player_id: PlayerId,
    pub rank: u32,
}

// ---------------------------------------------------------------------------
// Round results
// ---------------------------------------------------------------------------

/// How a race round ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoundOutcome {
    /// Every active entrant crossed the line.
    Completed,
    /// `max_ticks` elapsed; unfinished entrants did not finish.
    TimedOut,
    /// The round was started without any active entrant.
    NoEntrants,
    /// The round was cancelled before completion. No ranking is assigned.
    Aborted,
}

impl fmt::Display for RoundOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Completed => "Completed",
            Self::TimedOut => "TimedOut",
            Self::NoEntrants => "NoEntrants",
            Self::Aborted => "Aborted",
        };
        f.write_str(name)
    }
}

/// The final result of a round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundResult {
    pub outcome: RoundOutcome,
    /// Ranked entrants, best first.
    pub rankings: Vec<Placement>,
    /// Active entrants that never reached the line.
    pub did_not_finish: Vec<PlayerId>,
}

impl RoundResult {
    /// A result carrying no ranking at all.
    pub fn empty(outcome: RoundOutcome) -> Self {
        Self {
            outcome,
            rankings: Vec::new(),
            did_not_finish: Vec::new(),
        }
    }
}

/// Parameters of a round, fixed when the room enters `Racing`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RaceStart {
    /// PRNG seed. Recorded so the round can be replayed for audits.
    pub seed: u64,
    pub track_length: f64,
    /// Entrants in join order.
    pub entrants: Vec<PlayerId>,
}
