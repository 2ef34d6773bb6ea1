//! The lobby state machine.
//!
//! Operations on [`Room`] that move it through its phases:
//!
//! | operation      | allowed in        | events                                  |
//! |----------------|-------------------|-----------------------------------------|
//! | `join`         | Open              | `PlayerJoined`                          |
//! | `set_ready`    | Open, Ready       | `ReadyChanged` [+ `PhaseChanged`]       |
//! | `leave`        | any but Closed    | `PlayerLeft` [+ `PhaseChanged`]         |
//! | `start_race`   | Ready             | `PhaseChanged` (with the seed)          |
//! | `advance_race` | Racing            | `Tick` [+ `RoundFinished`]              |
//! | `finish_race`  | Racing            | `RoundFinished`                         |
//! | `reset`        | Finished          | `PhaseChanged`                          |
//! | `close`        | any but Closed    | [`RoundFinished`] + `PhaseChanged`      |
//!
//! Every fallible operation validates first and mutates second: on `Err`
//! the room is untouched and no event is produced.
//!
//! While in `Open` or `Ready`, the phase is a pure function of the players:
//! `Ready` exactly when there are at least `min_players` and all are ready.

use std::sync::atomic::{AtomicU64, Ordering};

use racelane_protocol::{
    EventPayload, Phase, PlayerId, PlayerView, RaceEvent, RaceStart, RoundOutcome,
    RoundResult,
};
use racelane_sim::RaceSimulator;
use tracing::{debug, info, warn};

use crate::{Room, RoomError};

/// Counter for generating unique player IDs across all rooms.
static NEXT_PLAYER_ID: AtomicU64 = AtomicU64::new(1);

/// Makes sure freshly allocated player ids stay above `id`.
pub(crate) fn reserve_player_ids_through(id: PlayerId) {
    NEXT_PLAYER_ID.fetch_max(id.0 + 1, Ordering::Relaxed);
}

/// Trims and checks a display name.
fn validate_name(raw: &str, max_len: usize) -> Result<String, RoomError> {
    let name = raw.trim();
    if name.is_empty() {
        return Err(RoomError::InvalidName("display name is empty".into()));
    }
    if name.chars().count() > max_len {
        return Err(RoomError::InvalidName(format!(
            "display name is longer than {max_len} characters"
        )));
    }
    if name.chars().any(char::is_control) {
        return Err(RoomError::InvalidName(
            "display name contains control characters".into(),
        ));
    }
    Ok(name.to_owned())
}

impl Room {
    fn require_phase(
        &self,
        op: &'static str,
        allowed: impl FnOnce(Phase) -> bool,
    ) -> Result<(), RoomError> {
        let phase = self.phase();
        if allowed(phase) {
            Ok(())
        } else {
            Err(RoomError::InvalidTransition { op, phase })
        }
    }

    fn require_player(&self, player_id: PlayerId) -> Result<&PlayerView, RoomError> {
        self.state
            .player(player_id)
            .ok_or(RoomError::UnknownPlayer(player_id, self.id()))
    }

    /// Seats a new player at the end of the player list.
    ///
    /// # Errors
    /// - [`RoomError::InvalidTransition`] outside `Open`.
    /// - [`RoomError::InvalidName`] if the name is empty, too long, or has
    ///   control characters.
    /// - [`RoomError::RoomFull`] if every seat is taken.
    pub fn join(&mut self, display_name: &str) -> Result<(PlayerId, Vec<RaceEvent>), RoomError> {
        self.require_phase("join", Phase::is_joinable)?;
        let display_name = validate_name(display_name, self.config.max_name_len)?;
        if self.player_count() >= self.config.max_players {
            return Err(RoomError::RoomFull(self.id()));
        }

        let player_id = PlayerId(NEXT_PLAYER_ID.fetch_add(1, Ordering::Relaxed));
        let mut events = Vec::new();
        self.commit(
            EventPayload::PlayerJoined {
                player: PlayerView {
                    id: player_id,
                    display_name,
                    ready: false,
                    connected: true,
                },
            },
            &mut events,
        );
        self.recompute_phase(&mut events);

        info!(
            room_id = %self.id(),
            %player_id,
            players = self.player_count(),
            "player joined"
        );
        Ok((player_id, events))
    }

    /// Sets a player's ready flag and re-derives the phase.
    ///
    /// Always emits `ReadyChanged`, even when the flag already had that
    /// value, so the request is confirmed on the event stream.
    ///
    /// # Errors
    /// - [`RoomError::InvalidTransition`] outside `Open`/`Ready`.
    /// - [`RoomError::UnknownPlayer`] if the player is not in the room.
    pub fn set_ready(
        &mut self,
        player_id: PlayerId,
        ready: bool,
    ) -> Result<Vec<RaceEvent>, RoomError> {
        self.require_phase("set ready", Phase::accepts_ready)?;
        self.require_player(player_id)?;

        let mut events = Vec::new();
        self.commit(EventPayload::ReadyChanged { player_id, ready }, &mut events);
        self.recompute_phase(&mut events);

        debug!(room_id = %self.id(), %player_id, ready, phase = %self.phase(), "ready changed");
        Ok(events)
    }

    /// Removes a player.
    ///
    /// During `Racing` an unfinished entrant is forfeited: its progress
    /// freezes and it drops out of the ranking. An entrant that already
    /// finished keeps its rank.
    ///
    /// # Errors
    /// - [`RoomError::InvalidTransition`] once the room is `Closed`.
    /// - [`RoomError::UnknownPlayer`] if the player is not in the room.
    pub fn leave(&mut self, player_id: PlayerId) -> Result<Vec<RaceEvent>, RoomError> {
        self.require_phase("leave", |p| p != Phase::Closed)?;
        self.require_player(player_id)?;

        let forfeited = match &mut self.sim {
            Some(sim) => sim.forfeit(player_id),
            None => false,
        };

        let mut events = Vec::new();
        self.commit(
            EventPayload::PlayerLeft {
                player_id,
                forfeited,
            },
            &mut events,
        );
        self.recompute_phase(&mut events);

        info!(
            room_id = %self.id(),
            %player_id,
            forfeited,
            players = self.player_count(),
            "player left"
        );
        Ok(events)
    }

    /// Marks a player's connection as dropped or restored.
    ///
    /// Returns no events if the flag already had that value.
    ///
    /// # Errors
    /// - [`RoomError::InvalidTransition`] once the room is `Closed`.
    /// - [`RoomError::UnknownPlayer`] if the player is not in the room.
    pub fn set_connected(
        &mut self,
        player_id: PlayerId,
        connected: bool,
    ) -> Result<Vec<RaceEvent>, RoomError> {
        self.require_phase("change connection", |p| p != Phase::Closed)?;
        let player = self.require_player(player_id)?;

        let mut events = Vec::new();
        if player.connected != connected {
            self.commit(
                EventPayload::ConnectionChanged {
                    player_id,
                    connected,
                },
                &mut events,
            );
            debug!(room_id = %self.id(), %player_id, connected, "connection changed");
        }
        Ok(events)
    }

    /// Starts a round with every current player as an entrant, in join
    /// order.
    ///
    /// If the simulator refuses the entrant list, the round is recorded as
    /// started and immediately finished with outcome `NoEntrants`.
    ///
    /// # Errors
    /// [`RoomError::InvalidTransition`] outside `Ready`.
    pub fn start_race(&mut self, seed: u64) -> Result<Vec<RaceEvent>, RoomError> {
        self.require_phase("start race", |p| p == Phase::Ready)?;

        let entrants: Vec<PlayerId> = self.state.players.iter().map(|p| p.id).collect();
        let race_config = self.config.race.clone().validated();
        let track_length = race_config.track_length;
        let mut events = Vec::new();

        match RaceSimulator::new(race_config, seed, &entrants) {
            Ok(sim) => {
                self.sim = Some(sim);
                self.transition(
                    Phase::Racing,
                    Some(RaceStart {
                        seed,
                        track_length,
                        entrants: entrants.clone(),
                    }),
                    &mut events,
                );
                info!(
                    room_id = %self.id(),
                    seed,
                    entrants = entrants.len(),
                    "race started"
                );
            }
            Err(err) => {
                warn!(room_id = %self.id(), seed, error = %err, "race could not start");
                self.transition(
                    Phase::Racing,
                    Some(RaceStart {
                        seed,
                        track_length,
                        entrants: Vec::new(),
                    }),
                    &mut events,
                );
                self.finish_race(RoundResult::empty(RoundOutcome::NoEntrants), &mut events);
            }
        }
        Ok(events)
    }

    /// Runs one simulation step. Finishes the round once the simulator is
    /// done. Does nothing outside `Racing`.
    pub fn advance_race(&mut self) -> Vec<RaceEvent> {
        let mut events = Vec::new();
        if self.phase() != Phase::Racing {
            return events;
        }
        let Some(sim) = self.sim.as_mut() else {
            warn!(room_id = %self.id(), "racing without a simulator, finishing");
            self.finish_race(RoundResult::empty(RoundOutcome::NoEntrants), &mut events);
            return events;
        };

        let frame = sim.step();
        let result = sim.result();

        if let Some(frame) = frame {
            if !frame.progress.is_empty() || !frame.finished.is_empty() {
                self.commit(
                    EventPayload::Tick {
                        tick: frame.tick,
                        progress: frame.progress,
                        finished: frame.finished,
                    },
                    &mut events,
                );
            }
        }
        if let Some(result) = result {
            self.finish_race(result, &mut events);
        }
        events
    }

    /// Ends the running round with `result` and drops the simulator.
    pub fn finish_race(&mut self, result: RoundResult, out: &mut Vec<RaceEvent>) {
        if self.phase() != Phase::Racing {
            return;
        }
        let seed = self.sim.take().map(|sim| sim.seed()).or(self.state.seed);
        info!(
            room_id = %self.id(),
            seed = ?seed,
            outcome = %result.outcome,
            ranked = result.rankings.len(),
            "race finished"
        );
        self.commit(EventPayload::RoundFinished { result }, out);
    }

    /// Cancels the running round: outcome `Aborted`, no ranking.
    pub fn abort_race(&mut self) -> Vec<RaceEvent> {
        let mut events = Vec::new();
        self.finish_race(RoundResult::empty(RoundOutcome::Aborted), &mut events);
        events
    }

    /// Returns a finished room to `Open`, keeping its players but clearing
    /// their ready flags and the last round.
    ///
    /// # Errors
    /// [`RoomError::InvalidTransition`] outside `Finished`.
    pub fn reset(&mut self) -> Result<Vec<RaceEvent>, RoomError> {
        self.require_phase("reset", |p| p == Phase::Finished)?;
        let mut events = Vec::new();
        self.transition(Phase::Open, None, &mut events);
        debug!(room_id = %self.id(), "room reset");
        Ok(events)
    }

    /// Closes the room for good. A running round is aborted first.
    pub fn close(&mut self) -> Vec<RaceEvent> {
        let mut events = Vec::new();
        if self.phase() == Phase::Closed {
            return events;
        }
        if self.phase() == Phase::Racing {
            events = self.abort_race();
        }
        self.transition(Phase::Closed, None, &mut events);
        info!(room_id = %self.id(), seq = self.seq(), "room closed");
        events
    }

    /// Re-derives `Open`/`Ready` from the players and their ready flags.
    pub(crate) fn recompute_phase(&mut self, out: &mut Vec<RaceEvent>) {
        let can_race =
            self.player_count() >= self.config.min_players && self.state.all_ready();
        match (self.phase(), can_race) {
            (Phase::Open, true) => self.transition(Phase::Ready, None, out),
            (Phase::Ready, false) => self.transition(Phase::Open, None, out),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use racelane_protocol::{EventKind, RoomId};
    use racelane_sim::RaceConfig;

    use crate::RoomConfig;

    fn room() -> Room {
        Room::new(RoomId(1), RoomConfig::default())
    }

    fn kinds(events: &[RaceEvent]) -> Vec<EventKind> {
        events.iter().map(RaceEvent::kind).collect()
    }

    /// A room with `names` joined and all of them ready.
    fn ready_room(names: &[&str]) -> (Room, Vec<PlayerId>) {
        let mut room = room();
        let ids: Vec<PlayerId> = names.iter().map(|n| room.join(n).unwrap().0).collect();
        for id in &ids {
            room.set_ready(*id, true).unwrap();
        }
        (room, ids)
    }

    // =====================================================================
    // join()
    // =====================================================================

    #[test]
    fn test_join_two_players_stays_open_until_ready() {
        let mut room = room();

        let (alice, events) = room.join("Alice").unwrap();
        assert_eq!(kinds(&events), vec![EventKind::PlayerJoined]);
        assert_eq!(room.phase(), Phase::Open);
        assert_eq!(room.state().players[0].display_name, "Alice");

        let (bob, _) = room.join("Bob").unwrap();
        assert_eq!(room.phase(), Phase::Open);

        room.set_ready(alice, true).unwrap();
        assert_eq!(room.phase(), Phase::Open);
        let events = room.set_ready(bob, true).unwrap();

        assert_eq!(room.phase(), Phase::Ready);
        assert_eq!(
            kinds(&events),
            vec![EventKind::ReadyChanged, EventKind::PhaseChanged]
        );
        assert_eq!(room.seq(), 5);
    }

    #[test]
    fn test_join_trims_name() {
        let mut room = room();
        room.join("  Alice  ").unwrap();
        assert_eq!(room.state().players[0].display_name, "Alice");
    }

    #[test]
    fn test_join_bad_names_rejected() {
        let mut room = room();
        let long = "x".repeat(25);
        for name in ["", "   ", long.as_str(), "bad\u{7}name"] {
            let err = room.join(name).unwrap_err();
            assert!(matches!(err, RoomError::InvalidName(_)), "{name:?}: {err}");
        }
        assert_eq!(room.seq(), 0);
    }

    #[test]
    fn test_join_full_room_returns_room_full() {
        let mut room = room();
        for name in ["A", "B", "C", "D"] {
            room.join(name).unwrap();
        }
        let before = room.snapshot();

        assert_eq!(room.join("E").unwrap_err(), RoomError::RoomFull(RoomId(1)));
        assert_eq!(room.snapshot(), before);
    }

    #[test]
    fn test_join_while_racing_returns_invalid_transition() {
        let (mut room, _) = ready_room(&["Alice", "Bob"]);
        room.start_race(42).unwrap();
        let before = room.snapshot();

        let err = room.join("Carol").unwrap_err();

        assert_eq!(
            err,
            RoomError::InvalidTransition {
                op: "join",
                phase: Phase::Racing
            }
        );
        assert_eq!(room.snapshot(), before);
    }

    #[test]
    fn test_join_while_ready_returns_invalid_transition() {
        let (mut room, _) = ready_room(&["Alice", "Bob"]);
        assert!(matches!(
            room.join("Carol"),
            Err(RoomError::InvalidTransition { phase: Phase::Ready, .. })
        ));
    }

    // =====================================================================
    // set_ready() / leave()
    // =====================================================================

    #[test]
    fn test_set_ready_unknown_player_returns_error() {
        let mut room = room();
        room.join("Alice").unwrap();
        assert_eq!(
            room.set_ready(PlayerId(u64::MAX), true).unwrap_err(),
            RoomError::UnknownPlayer(PlayerId(u64::MAX), RoomId(1))
        );
    }

    #[test]
    fn test_unready_reverts_ready_to_open() {
        let (mut room, ids) = ready_room(&["Alice", "Bob"]);
        let events = room.set_ready(ids[0], false).unwrap();
        assert_eq!(room.phase(), Phase::Open);
        assert_eq!(
            kinds(&events),
            vec![EventKind::ReadyChanged, EventKind::PhaseChanged]
        );
    }

    #[test]
    fn test_leave_solo_remaining_reverts_to_open() {
        let (mut room, ids) = ready_room(&["Alice", "Bob"]);
        room.leave(ids[1]).unwrap();
        assert_eq!(room.phase(), Phase::Open);
        assert_eq!(room.player_count(), 1);
    }

    #[test]
    fn test_leave_during_race_forfeits_entrant() {
        let (mut room, ids) = ready_room(&["Alice", "Bob", "Carol"]);
        room.start_race(7).unwrap();
        room.advance_race();

        let events = room.leave(ids[0]).unwrap();

        assert!(matches!(
            events[0].payload,
            EventPayload::PlayerLeft { forfeited: true, .. }
        ));
        let race = room.state().race.as_ref().unwrap();
        assert!(race.entrants[0].forfeited);
        assert_eq!(room.player_count(), 2);
        assert_eq!(room.phase(), Phase::Racing);
    }

    #[test]
    fn test_leave_after_finishing_keeps_rank() {
        let mut room = Room::new(
            RoomId(1),
            RoomConfig {
                race: RaceConfig {
                    min_step: 100.0,
                    max_step: 100.0,
                    ..RaceConfig::default()
                },
                ..RoomConfig::default()
            },
        );
        let a = room.join("A").unwrap().0;
        let b = room.join("B").unwrap().0;
        room.set_ready(a, true).unwrap();
        room.set_ready(b, true).unwrap();
        room.start_race(1).unwrap();
        room.advance_race();
        assert_eq!(room.phase(), Phase::Finished);

        let events = room.leave(a).unwrap();

        assert!(matches!(
            events[0].payload,
            EventPayload::PlayerLeft { forfeited: false, .. }
        ));
        let result = room.state().race.as_ref().unwrap().result.clone().unwrap();
        assert_eq!(result.rankings[0].player_id, a);
    }

    // =====================================================================
    // start_race() / advance_race()
    // =====================================================================

    #[test]
    fn test_start_race_from_open_returns_invalid_transition() {
        let mut room = room();
        room.join("Alice").unwrap();
        assert!(matches!(
            room.start_race(1),
            Err(RoomError::InvalidTransition { phase: Phase::Open, .. })
        ));
    }

    #[test]
    fn test_start_race_records_seed_and_entrants() {
        let (mut room, ids) = ready_room(&["Alice", "Bob"]);

        let events = room.start_race(42).unwrap();

        assert_eq!(room.phase(), Phase::Racing);
        assert_eq!(room.state().seed, Some(42));
        match &events[0].payload {
            EventPayload::PhaseChanged {
                from: Phase::Ready,
                to: Phase::Racing,
                race: Some(start),
            } => {
                assert_eq!(start.seed, 42);
                assert_eq!(start.entrants, ids);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_start_race_records_validated_track_length() {
        let config = RoomConfig {
            race: RaceConfig {
                track_length: -5.0,
                ..RaceConfig::default()
            },
            ..RoomConfig::default()
        };
        let mut room = Room::new(RoomId(1), config);
        for name in ["Alice", "Bob"] {
            let (id, _) = room.join(name).unwrap();
            room.set_ready(id, true).unwrap();
        }

        room.start_race(7).unwrap();

        let recorded = room.state().race.as_ref().unwrap().track_length;
        assert_eq!(recorded, RaceConfig::default().track_length);
        assert_eq!(recorded, room.simulator().unwrap().config().track_length);
    }

    #[test]
    fn test_advance_race_runs_to_finished() {
        let (mut room, _) = ready_room(&["Alice", "Bob"]);
        room.start_race(42).unwrap();

        let mut ticks = 0;
        while room.phase() == Phase::Racing {
            room.advance_race();
            ticks += 1;
            assert!(ticks <= 100, "round must end within 100 ticks");
        }

        let race = room.state().race.as_ref().unwrap();
        let result = race.result.as_ref().unwrap();
        assert_eq!(result.outcome, RoundOutcome::Completed);
        let mut ranks: Vec<u32> = result.rankings.iter().map(|p| p.rank).collect();
        ranks.sort_unstable();
        assert_eq!(ranks, vec![1, 2]);
        assert!(room.simulator().is_none());
    }

    #[test]
    fn test_advance_race_outside_racing_is_noop() {
        let mut room = room();
        assert!(room.advance_race().is_empty());
    }

    // =====================================================================
    // reset() / close()
    // =====================================================================

    #[test]
    fn test_reset_from_open_returns_invalid_transition() {
        let mut room = room();
        assert!(matches!(
            room.reset(),
            Err(RoomError::InvalidTransition { op: "reset", phase: Phase::Open })
        ));
    }

    #[test]
    fn test_reset_after_round_keeps_players_clears_ready() {
        let (mut room, _) = ready_room(&["Alice", "Bob"]);
        room.start_race(3).unwrap();
        while room.phase() == Phase::Racing {
            room.advance_race();
        }

        room.reset().unwrap();

        assert_eq!(room.phase(), Phase::Open);
        assert_eq!(room.player_count(), 2);
        assert!(room.state().players.iter().all(|p| !p.ready));
        assert!(room.state().race.is_none());
        assert!(room.state().seed.is_none());
    }

    #[test]
    fn test_close_while_racing_aborts_round() {
        let (mut room, _) = ready_room(&["Alice", "Bob"]);
        room.start_race(3).unwrap();
        room.advance_race();

        let events = room.close();

        assert_eq!(
            kinds(&events),
            vec![EventKind::RoundFinished, EventKind::PhaseChanged]
        );
        assert_eq!(room.phase(), Phase::Closed);
        let result = room.state().race.as_ref().unwrap().result.clone().unwrap();
        assert_eq!(result.outcome, RoundOutcome::Aborted);
        assert!(result.rankings.is_empty());
        assert!(room.close().is_empty());
    }

    #[test]
    fn test_closed_room_rejects_leave() {
        let mut room = room();
        let (alice, _) = room.join("Alice").unwrap();
        room.close();
        assert!(matches!(
            room.leave(alice),
            Err(RoomError::InvalidTransition { phase: Phase::Closed, .. })
        ));
    }

    // =====================================================================
    // set_connected() / restore()
    // =====================================================================

    #[test]
    fn test_set_connected_same_value_emits_nothing() {
        let mut room = room();
        let (alice, _) = room.join("Alice").unwrap();
        assert!(room.set_connected(alice, true).unwrap().is_empty());

        let events = room.set_connected(alice, false).unwrap();
        assert_eq!(kinds(&events), vec![EventKind::ConnectionChanged]);
        assert!(!room.state().players[0].connected);
    }

    #[test]
    fn test_restore_racing_room_comes_back_finished_and_disconnected() {
        let (mut room, _) = ready_room(&["Alice", "Bob"]);
        room.start_race(3).unwrap();
        room.advance_race();
        let stored = room.snapshot();

        let (restored, events) = Room::restore(stored.clone(), RoomConfig::default()).unwrap();

        assert_eq!(restored.phase(), Phase::Finished);
        assert_eq!(events[0].seq, stored.seq + 1);
        assert_eq!(events[0].kind(), EventKind::RoundFinished);
        assert!(restored.state().players.iter().all(|p| !p.connected && !p.ready));
        assert!(restored.simulator().is_none());
    }

    #[test]
    fn test_restore_ready_room_drops_to_open() {
        let (room, _) = ready_room(&["Alice", "Bob"]);
        let (restored, _) = Room::restore(room.snapshot(), RoomConfig::default()).unwrap();
        assert_eq!(restored.phase(), Phase::Open);
    }

    #[test]
    fn test_restore_closed_room_returns_not_found() {
        let mut room = room();
        room.close();
        assert!(matches!(
            Room::restore(room.snapshot(), RoomConfig::default()),
            Err(RoomError::NotFound(_))
        ));
    }
}
