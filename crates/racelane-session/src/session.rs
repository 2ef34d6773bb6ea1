//! Session types: the server's record of a seated player.

use std::time::Duration;

use racelane_protocol::{PlayerId, RoomId};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

// ---------------------------------------------------------------------------
// SessionConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// How long a disconnected player keeps their seat. When it runs out
    /// the player leaves the room (forfeiting a running round).
    ///
    /// Default: 30 seconds. Zero gives up the seat on the next scheduler
    /// turn.
    pub reconnect_grace: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            reconnect_grace: Duration::from_secs(30),
        }
    }
}

// ---------------------------------------------------------------------------
// SessionState
// ---------------------------------------------------------------------------

/// Lifecycle of a session.
///
/// ```text
///   Connected ──(disconnect)──→ Disconnected ──(grace elapsed)──→ Expired
///       ↑                            │
///       └────────(reconnect)─────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connected,
    /// Lost its connection at `since`; may come back until
    /// `since + reconnect_grace`.
    Disconnected { since: Instant },
    /// The grace period ran out. Kept until purged so a late reconnect gets
    /// a clear answer.
    Expired,
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// One seated player.
#[derive(Debug, Clone)]
pub struct Session {
    pub player_id: PlayerId,
    /// The room the player sits in.
    pub room_id: RoomId,
    pub state: SessionState,
    /// Secret handed to the client on join. Presenting it resumes the
    /// session after a disconnect. 32 hex characters (128 bits).
    pub reconnect_token: String,
}

impl Session {
    pub fn is_connected(&self) -> bool {
        self.state == SessionState::Connected
    }
}
