//! The session manager: tracks every seated player's connection.
//!
//! `SessionManager` is plain data behind `&mut self`. The gateway wraps it
//! in a mutex and never holds that lock across an `.await`.

use std::collections::HashMap;

use racelane_protocol::{PlayerId, RoomId};
use rand::Rng;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::{Session, SessionConfig, SessionError, SessionState};

/// Sessions by player, plus a token index for reconnection.
///
/// ```text
/// create() ──→ [Connected] ──disconnect()──→ [Disconnected]
///                   ↑                              │
///                   └─────────reconnect()──────────┤
///                                                  ▼ expire()
///                                             [Expired] ──→ purge_expired()
/// ```
pub struct SessionManager {
    sessions: HashMap<PlayerId, Session>,
    /// Reconnection token → player. Kept in sync with `sessions`.
    tokens: HashMap<String, PlayerId>,
    config: SessionConfig,
}

impl SessionManager {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            sessions: HashMap::new(),
            tokens: HashMap::new(),
            config,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Opens a session for a player who just took a seat in `room_id`, and
    /// issues a fresh reconnection token.
    ///
    /// # Errors
    /// [`SessionError::AlreadyConnected`] if the player already has a
    /// connected session.
    pub fn create(
        &mut self,
        player_id: PlayerId,
        room_id: RoomId,
    ) -> Result<&Session, SessionError> {
        if let Some(existing) = self.sessions.get(&player_id) {
            if existing.is_connected() {
                return Err(SessionError::AlreadyConnected(player_id));
            }
            self.tokens.remove(&existing.reconnect_token);
        }

        let token = generate_token();
        self.tokens.insert(token.clone(), player_id);
        let session = Session {
            player_id,
            room_id,
            state: SessionState::Connected,
            reconnect_token: token,
        };

        info!(%player_id, %room_id, "session created");
        Ok(self
            .sessions
            .entry(player_id)
            .insert_entry(session)
            .into_mut())
    }

    /// Marks a player as disconnected at `now`, starting the grace period.
    ///
    /// # Errors
    /// [`SessionError::NotFound`] if there is no session for the player.
    pub fn disconnect(&mut self, player_id: PlayerId, now: Instant) -> Result<&Session, SessionError> {
        let session = self
            .sessions
            .get_mut(&player_id)
            .ok_or(SessionError::NotFound(player_id))?;

        if session.is_connected() {
            session.state = SessionState::Disconnected { since: now };
            info!(%player_id, room_id = %session.room_id, "player disconnected, grace period started");
        }
        Ok(session)
    }

    /// Resumes a session with its reconnection token.
    ///
    /// A session whose grace period has elapsed is left as it is, so that
    /// [`expire`](Self::expire) still hands it out exactly once.
    ///
    /// # Errors
    /// - [`SessionError::InvalidToken`]: the token is unknown
    /// - [`SessionError::SessionExpired`]: the grace period has elapsed
    /// - [`SessionError::AlreadyConnected`]: the session never dropped
    pub fn reconnect(&mut self, token: &str, now: Instant) -> Result<&Session, SessionError> {
        let player_id = self
            .tokens
            .get(token)
            .copied()
            .ok_or(SessionError::InvalidToken)?;
        let grace = self.config.reconnect_grace;
        let session = self
            .sessions
            .get_mut(&player_id)
            .ok_or(SessionError::InvalidToken)?;

        let state = session.state;
        match state {
            SessionState::Disconnected { since } => {
                if now.saturating_duration_since(since) >= grace {
                    return Err(SessionError::SessionExpired(player_id));
                }
                session.state = SessionState::Connected;
                info!(%player_id, room_id = %session.room_id, "player reconnected");
                Ok(session)
            }
            SessionState::Connected => Err(SessionError::AlreadyConnected(player_id)),
            SessionState::Expired => Err(SessionError::SessionExpired(player_id)),
        }
    }

    /// Expires one player's session if it has been disconnected for the
    /// whole grace period. Returns the expired session.
    pub fn expire(&mut self, player_id: PlayerId, now: Instant) -> Option<&Session> {
        let grace = self.config.reconnect_grace;
        let session = self.sessions.get_mut(&player_id)?;
        let state = session.state;
        match state {
            SessionState::Disconnected { since }
                if now.saturating_duration_since(since) >= grace =>
            {
                session.state = SessionState::Expired;
                info!(%player_id, room_id = %session.room_id, "session expired (grace period elapsed)");
                Some(session)
            }
            _ => None,
        }
    }

    /// Expires every session whose grace period has elapsed. Returns the
    /// affected players.
    pub fn expire_stale(&mut self, now: Instant) -> Vec<PlayerId> {
        let stale: Vec<PlayerId> = self
            .sessions
            .values()
            .filter(|s| {
                matches!(s.state, SessionState::Disconnected { since }
                    if now.saturating_duration_since(since) >= self.config.reconnect_grace)
            })
            .map(|s| s.player_id)
            .collect();
        for player_id in &stale {
            self.expire(*player_id, now);
        }
        stale
    }

    /// Drops expired sessions and their tokens. Returns how many.
    pub fn purge_expired(&mut self) -> usize {
        let before = self.sessions.len();
        let tokens = &mut self.tokens;
        self.sessions.retain(|_, session| {
            let keep = session.state != SessionState::Expired;
            if !keep {
                tokens.remove(&session.reconnect_token);
            }
            keep
        });
        let purged = before - self.sessions.len();
        if purged > 0 {
            debug!(purged, "purged expired sessions");
        }
        purged
    }

    /// Removes a player's session outright (the player left their room).
    pub fn remove(&mut self, player_id: PlayerId) -> Option<Session> {
        let session = self.sessions.remove(&player_id)?;
        self.tokens.remove(&session.reconnect_token);
        debug!(%player_id, "session removed");
        Some(session)
    }

    pub fn get(&self, player_id: PlayerId) -> Option<&Session> {
        self.sessions.get(&player_id)
    }

    /// Number of sessions in any state.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

/// A random 32-character hex string (128 bits).
fn generate_token() -> String {
    let bytes: [u8; 16] = rand::rng().random();
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

// =========================================================================
// Tests
// =========================================================================
