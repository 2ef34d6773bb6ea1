//! Room configuration.

use std::time::Duration;

use racelane_broadcast::RetryPolicy;
use racelane_sim::RaceConfig;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Settings shared by every room a registry creates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomConfig {
    /// Ready players needed before a room can leave `Open`. Never below 2.
    pub min_players: usize,

    /// Seats per room.
    pub max_players: usize,

    /// Longest accepted display name, in characters.
    pub max_name_len: usize,

    /// Parameters for every round played in the room.
    pub race: RaceConfig,

    /// Start the race on its own once the room has stayed `Ready` this long.
    /// `None` waits for an explicit start.
    pub auto_start_after: Option<Duration>,

    /// Reset a `Finished` room to `Open` after this much idle time. `None`
    /// waits for an explicit reset.
    pub finished_reset_after: Option<Duration>,

    /// Events kept for resuming subscribers.
    pub event_log_capacity: usize,

    /// Publish retry behavior.
    pub retry: RetryPolicy,

    /// Bound of the room actor's command queue.
    pub command_buffer: usize,
}

impl Default for RoomConfig {
    fn default() -> Self {
        Self {
            min_players: 2,
            max_players: 4,
            max_name_len: 24,
            race: RaceConfig::default(),
            auto_start_after: None,
            finished_reset_after: None,
            event_log_capacity: 256,
            retry: RetryPolicy::default(),
            command_buffer: 64,
        }
    }
}

impl RoomConfig {
    /// Fewest players a race may start with.
    pub const MIN_PLAYERS: usize = 2;

    /// Clamps out-of-range values. Called by the registry before any room
    /// is created.
    pub fn validated(mut self) -> Self {
        if self.min_players < Self::MIN_PLAYERS {
            warn!(min_players = self.min_players, "min_players below 2, clamping");
            self.min_players = Self::MIN_PLAYERS;
        }
        if self.max_players < self.min_players {
            warn!(
                min_players = self.min_players,
                max_players = self.max_players,
                "max_players below min_players, clamping"
            );
            self.max_players = self.min_players;
        }
        if self.max_name_len == 0 {
            warn!("max_name_len is 0, clamping to 1");
            self.max_name_len = 1;
        }
        self.event_log_capacity = self.event_log_capacity.max(1);
        self.command_buffer = self.command_buffer.max(1);
        self.race = self.race.validated();
        self
    }
}
