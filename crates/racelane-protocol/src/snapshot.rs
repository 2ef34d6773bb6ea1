//! Room snapshots and the event fold.
//!
//! A [`RoomSnapshot`] is a full copy of a room's observable state at a given
//! sequence number. The server uses the same type as its authoritative room
//! state and advances it only through [`RoomSnapshot::apply`], so a client
//! that starts from any snapshot and applies the following events ends up
//! with exactly the server's state.

use serde::{Deserialize, Serialize};

use crate::{
    EntrantView, EventPayload, Phase, PlayerId, PlayerView, RaceEvent, RoomId,
    RoundResult,
};

/// Full observable state of a room.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomSnapshot {
    pub room_id: RoomId,
    /// Sequence number of the last event folded into this snapshot.
    pub seq: u64,
    pub phase: Phase,
    /// Seed of the current round, recorded when the room entered `Racing`.
    pub seed: Option<u64>,
    /// Players in join order.
    pub players: Vec<PlayerView>,
    /// The current or last round. Cleared on reset.
    pub race: Option<RaceView>,
}

/// State of a race round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RaceView {
    /// Last simulated tick (0 before the first one).
    pub tick: u64,
    pub track_length: f64,
    /// Entrants in join order.
    pub entrants: Vec<EntrantView>,
    /// Set once the round has ended.
    pub result: Option<RoundResult>,
}

/// What happened when an event was offered to [`RoomSnapshot::apply`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    /// The event was the next one in sequence and has been folded in.
    Applied,
    /// The event was already folded in (at-least-once redelivery).
    Duplicate,
    /// One or more events are missing between the snapshot and this event.
    /// The snapshot is unchanged; the consumer should resubscribe.
    Gap { expected: u64, got: u64 },
    /// The event belongs to another room.
    ForeignRoom,
}

impl RoomSnapshot {
    /// State of a freshly created room.
    pub fn new(room_id: RoomId) -> Self {
        Self {
            room_id,
            seq: 0,
            phase: Phase::Open,
            seed: None,
            players: Vec::new(),
            race: None,
        }
    }

    /// Folds one event into the snapshot.
    ///
    /// Events at or below the current sequence number are ignored, which
    /// makes redelivery harmless. Events that skip ahead are rejected
    /// without touching the state.
    pub fn apply(&mut self, event: &RaceEvent) -> Applied {
        if event.room_id != self.room_id {
            return Applied::ForeignRoom;
        }
        if event.seq <= self.seq {
            return Applied::Duplicate;
        }
        if event.seq != self.seq + 1 {
            return Applied::Gap {
                expected: self.seq + 1,
                got: event.seq,
            };
        }

        self.fold(&event.payload);
        self.seq = event.seq;
        Applied::Applied
    }

    fn fold(&mut self, payload: &EventPayload) {
        match payload {
            EventPayload::PlayerJoined { player } => {
                self.players.push(player.clone());
            }
            EventPayload::PlayerLeft {
                player_id,
                forfeited,
            } => {
                self.players.retain(|p| p.id != *player_id);
                if *forfeited {
                    if let Some(entrant) = self.entrant_mut(*player_id) {
                        entrant.forfeited = true;
                    }
                }
            }
            EventPayload::ReadyChanged { player_id, ready } => {
                if let Some(player) = self.player_mut(*player_id) {
                    player.ready = *ready;
                }
            }
            EventPayload::ConnectionChanged {
                player_id,
                connected,
            } => {
                if let Some(player) = self.player_mut(*player_id) {
                    player.connected = *connected;
                }
            }
            EventPayload::PhaseChanged { from, to, race } => {
                self.phase = *to;
                if let Some(start) = race {
                    self.seed = Some(start.seed);
                    self.race = Some(RaceView {
                        tick: 0,
                        track_length: start.track_length,
                        entrants: start
                            .entrants
                            .iter()
                            .map(|&player_id| EntrantView {
                                player_id,
                                progress: 0.0,
                                finish_rank: None,
                                forfeited: false,
                            })
                            .collect(),
                        result: None,
                    });
                }
                if *from == Phase::Finished && *to == Phase::Open {
                    self.seed = None;
                    self.race = None;
                    for player in &mut self.players {
                        player.ready = false;
                    }
                }
            }
            EventPayload::Tick {
                tick,
                progress,
                finished,
            } => {
                if let Some(race) = &mut self.race {
                    race.tick = *tick;
                    for step in progress {
                        if let Some(e) = race
                            .entrants
                            .iter_mut()
                            .find(|e| e.player_id == step.player_id)
                        {
                            e.progress = step.progress;
                        }
                    }
                    for placement in finished {
                        if let Some(e) = race
                            .entrants
                            .iter_mut()
                            .find(|e| e.player_id == placement.player_id)
                        {
                            e.finish_rank = Some(placement.rank);
                        }
                    }
                }
            }
            EventPayload::RoundFinished { result } => {
                self.phase = Phase::Finished;
                if let Some(race) = &mut self.race {
                    race.result = Some(result.clone());
                }
            }
        }
    }

    /// Looks up a player by id.
    pub fn player(&self, id: PlayerId) -> Option<&PlayerView> {
        self.players.iter().find(|p| p.id == id)
    }

    fn player_mut(&mut self, id: PlayerId) -> Option<&mut PlayerView> {
        self.players.iter_mut().find(|p| p.id == id)
    }

    fn entrant_mut(&mut self, id: PlayerId) -> Option<&mut EntrantView> {
        self.race
            .as_mut()?
            .entrants
            .iter_mut()
            .find(|e| e.player_id == id)
    }

    /// Returns `true` if the room has at least one player and all of them
    /// are ready.
    pub fn all_ready(&self) -> bool {
        !self.players.is_empty() && self.players.iter().all(|p| p.ready)
    }
}
