//! The room: authoritative state plus the running round.
//!
//! A [`Room`]'s observable state is a [`RoomSnapshot`] that only ever
//! changes through [`RoomSnapshot::apply`], the same fold clients run. Every
//! mutation goes through [`Room::commit`], which stamps the next sequence
//! number, folds the event in and hands it back for broadcasting. The lobby
//! operations live in `lobby.rs`.

use racelane_protocol::{
    Applied, EventPayload, Phase, PlayerId, RaceEvent, RaceStart, RoomId, RoomSnapshot,
    RoundOutcome, RoundResult,
};
use racelane_sim::RaceSimulator;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::{RoomConfig, RoomError};

pub struct Room {
    pub(crate) state: RoomSnapshot,
    pub(crate) config: RoomConfig,
    /// Present while the room is `Racing`.
    pub(crate) sim: Option<RaceSimulator>,
    created_at: Instant,
    last_activity_at: Instant,
}

impl Room {
    /// A fresh, empty room in `Open`.
    pub fn new(room_id: RoomId, config: RoomConfig) -> Self {
        let now = Instant::now();
        Self {
            state: RoomSnapshot::new(room_id),
            config,
            sim: None,
            created_at: now,
            last_activity_at: now,
        }
    }

    /// Rebuilds a room from a stored snapshot after a restart.
    ///
    /// The returned events bring the stored state in line with what the
    /// restarted server can vouch for:
    ///
    /// - every player comes back disconnected and not ready (their sessions
    ///   did not survive), so a `Ready` room drops back to `Open`;
    /// - a round that was running is finished as `Aborted`, since the
    ///   simulator's state is not stored.
    ///
    /// # Errors
    /// [`RoomError::NotFound`] if the stored room was already closed.
    pub fn restore(
        snapshot: RoomSnapshot,
        config: RoomConfig,
    ) -> Result<(Self, Vec<RaceEvent>), RoomError> {
        if snapshot.phase == Phase::Closed {
            return Err(RoomError::NotFound(snapshot.room_id));
        }

        if let Some(max) = snapshot.players.iter().map(|p| p.id).max() {
            crate::lobby::reserve_player_ids_through(max);
        }

        let now = Instant::now();
        let mut room = Self {
            state: snapshot,
            config,
            sim: None,
            created_at: now,
            last_activity_at: now,
        };
        let mut events = Vec::new();

        if room.state.phase == Phase::Racing {
            room.commit(
                EventPayload::RoundFinished {
                    result: RoundResult::empty(RoundOutcome::Aborted),
                },
                &mut events,
            );
        }

        let players: Vec<(PlayerId, bool, bool)> = room
            .state
            .players
            .iter()
            .map(|p| (p.id, p.connected, p.ready))
            .collect();
        for (player_id, connected, ready) in players {
            if connected {
                room.commit(
                    EventPayload::ConnectionChanged {
                        player_id,
                        connected: false,
                    },
                    &mut events,
                );
            }
            if ready {
                room.commit(
                    EventPayload::ReadyChanged {
                        player_id,
                        ready: false,
                    },
                    &mut events,
                );
                room.recompute_phase(&mut events);
            }
        }

        info!(
            room_id = %room.id(),
            seq = room.seq(),
            phase = %room.phase(),
            players = room.player_count(),
            "room restored"
        );
        Ok((room, events))
    }

    // -- Accessors --------------------------------------------------------

    pub fn id(&self) -> RoomId {
        self.state.room_id
    }

    pub fn phase(&self) -> Phase {
        self.state.phase
    }

    pub fn seq(&self) -> u64 {
        self.state.seq
    }

    /// The live state. Use [`snapshot`](Self::snapshot) to hand it out.
    pub fn state(&self) -> &RoomSnapshot {
        &self.state
    }

    /// A consistent copy of the room's state.
    pub fn snapshot(&self) -> RoomSnapshot {
        self.state.clone()
    }

    pub fn config(&self) -> &RoomConfig {
        &self.config
    }

    pub fn player_count(&self) -> usize {
        self.state.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.players.is_empty()
    }

    pub fn simulator(&self) -> Option<&RaceSimulator> {
        self.sim.as_ref()
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn last_activity_at(&self) -> Instant {
        self.last_activity_at
    }

    // -- Commit -----------------------------------------------------------

    /// Folds `payload` into the state as the next event and appends the
    /// event to `out`.
    pub(crate) fn commit(&mut self, payload: EventPayload, out: &mut Vec<RaceEvent>) {
        let event = RaceEvent {
            room_id: self.state.room_id,
            seq: self.state.seq + 1,
            payload,
        };
        let applied = self.state.apply(&event);
        if applied != Applied::Applied {
            // Unreachable: the event is built from the state's own counter.
            warn!(room_id = %self.id(), seq = event.seq, ?applied, "commit not applied");
            return;
        }
        self.last_activity_at = Instant::now();
        out.push(event);
    }

    /// Commits a `PhaseChanged` from the current phase to `to`.
    pub(crate) fn transition(
        &mut self,
        to: Phase,
        race: Option<RaceStart>,
        out: &mut Vec<RaceEvent>,
    ) {
        let from = self.phase();
        debug_assert!(from.can_transition_to(to), "illegal transition {from} -> {to}");
        self.commit(EventPayload::PhaseChanged { from, to, race }, out);
    }
}
