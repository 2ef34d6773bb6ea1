//! Server configuration.

use std::time::Duration;

use racelane_room::RoomConfig;
use racelane_session::SessionConfig;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Everything needed to start a [`RacelaneServer`](crate::RacelaneServer).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address the WebSocket listener binds to.
    pub bind_addr: String,
    pub room: RoomConfig,
    pub session: SessionConfig,
    /// `Open` and `Finished` rooms idle for longer than this are closed.
    pub room_ttl: Duration,
    /// How often idle rooms and expired sessions are swept.
    pub janitor_interval: Duration,
    /// A connection that sends nothing for this long is dropped. Clients
    /// keep it alive with heartbeats.
    pub idle_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8080".to_string(),
            room: RoomConfig::default(),
            session: SessionConfig::default(),
            room_ttl: Duration::from_secs(600),
            janitor_interval: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(60),
        }
    }
}

impl ServerConfig {
    /// Replaces zero durations with their defaults. Room settings are
    /// validated by the registry.
    pub fn validated(mut self) -> Self {
        let defaults = Self::default();
        if self.janitor_interval.is_zero() {
            warn!("janitor_interval is 0, using default");
            self.janitor_interval = defaults.janitor_interval;
        }
        if self.room_ttl.is_zero() {
            warn!("room_ttl is 0, using default");
            self.room_ttl = defaults.room_ttl;
        }
        if self.idle_timeout.is_zero() {
            warn!("idle_timeout is 0, using default");
            self.idle_timeout = defaults.idle_timeout;
        }
        self
    }
}
