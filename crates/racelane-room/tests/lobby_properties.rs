//! Property tests for the lobby state machine.

use proptest::prelude::*;
use racelane_protocol::{Phase, PlayerId, RoomId};
use racelane_room::{Room, RoomConfig};

#[derive(Debug, Clone)]
enum Op {
    Join(u8),
    Leave(usize),
    Ready(usize, bool),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0u8..4).prop_map(Op::Join),
        (0usize..6).prop_map(Op::Leave),
        (0usize..6, any::<bool>()).prop_map(|(i, r)| Op::Ready(i, r)),
    ]
}

const NAMES: [&str; 4] = ["Alice", "Bob", "", "Carol"];

fn pick(room: &Room, i: usize) -> PlayerId {
    room.state()
        .players
        .get(i)
        .map(|p| p.id)
        .unwrap_or(PlayerId(u64::MAX))
}

proptest! {
    #[test]
    fn prop_phase_is_function_of_players(ops in prop::collection::vec(op(), 0..40)) {
        let mut room = Room::new(RoomId(1), RoomConfig::default());

        for op in ops {
            let before = room.snapshot();
            let result = match op {
                Op::Join(n) => room.join(NAMES[n as usize]).map(|(_, e)| e),
                Op::Leave(i) => {
                    let id = pick(&room, i);
                    room.leave(id)
                }
                Op::Ready(i, ready) => {
                    let id = pick(&room, i);
                    room.set_ready(id, ready)
                }
            };

            match result {
                Ok(events) => {
                    // Gapless and continuing from the previous state.
                    for (k, event) in events.iter().enumerate() {
                        prop_assert_eq!(event.seq, before.seq + 1 + k as u64);
                    }
                }
                Err(_) => prop_assert_eq!(&room.snapshot(), &before),
            }

            let state = room.state();
            let can_race = state.players.len() >= 2 && state.all_ready();
            prop_assert_eq!(state.phase == Phase::Ready, can_race);
            prop_assert!(matches!(state.phase, Phase::Open | Phase::Ready));
            prop_assert!(state.players.len() <= 4);
        }
    }

    #[test]
    fn prop_fold_of_events_matches_room(ops in prop::collection::vec(op(), 0..40)) {
        let mut room = Room::new(RoomId(1), RoomConfig::default());
        let mut mirror = room.snapshot();

        for op in ops {
            let events = match op {
                Op::Join(n) => room.join(NAMES[n as usize]).map(|(_, e)| e),
                Op::Leave(i) => {
                    let id = pick(&room, i);
                    room.leave(id)
                }
                Op::Ready(i, ready) => {
                    let id = pick(&room, i);
                    room.set_ready(id, ready)
                }
            }
            .unwrap_or_default();

            for event in &events {
                mirror.apply(event);
                // Redelivery is harmless.
                mirror.apply(event);
            }
            prop_assert_eq!(&mirror, room.state());
        }
    }
}
