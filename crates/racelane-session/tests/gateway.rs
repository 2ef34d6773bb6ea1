//! Integration tests for the session gateway, on a paused clock.

use std::sync::Arc;
use std::time::Duration;

use racelane_broadcast::LocalChannel;
use racelane_protocol::{
    ClientRequest, Delivery, ErrorCode, EventPayload, Phase, PlayerId, RaceEvent, Response,
    RoomId, RoomSnapshot, RoundOutcome,
};
use racelane_room::{FixedSeed, MemoryStore, RoomConfig, RoomRegistry};
use racelane_session::{ClientConnection, SessionConfig, SessionGateway, SessionState};
use tokio::sync::mpsc;
use tokio::time;

// =========================================================================
// Helpers
// =========================================================================

type Gateway = SessionGateway<LocalChannel, MemoryStore>;

fn gateway(grace: Duration) -> Gateway {
    let registry = RoomRegistry::new(
        RoomConfig::default(),
        Arc::new(LocalChannel::new()),
        Arc::new(MemoryStore::new()),
        Arc::new(FixedSeed(42)),
    );
    SessionGateway::new(
        Arc::new(registry),
        SessionConfig {
            reconnect_grace: grace,
        },
    )
}

fn connection() -> (ClientConnection, mpsc::UnboundedReceiver<Delivery>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (ClientConnection::new(tx), rx)
}

async fn join(gw: &Gateway, conn: &mut ClientConnection, room_id: RoomId, name: &str) -> (PlayerId, String) {
    let response = gw
        .handle(
            conn,
            ClientRequest::JoinRoom {
                room_id,
                display_name: name.into(),
            },
        )
        .await;
    match response {
        Response::Joined {
            player_id,
            reconnect_token,
            ..
        } => (player_id, reconnect_token),
        other => panic!("expected Joined, got {other:?}"),
    }
}

async fn ready(gw: &Gateway, conn: &mut ClientConnection, room_id: RoomId, player_id: PlayerId) {
    let response = gw
        .handle(
            conn,
            ClientRequest::SetReady {
                room_id,
                player_id,
                ready: true,
            },
        )
        .await;
    assert_eq!(response, Response::Ok);
}

fn error_code(response: Response) -> ErrorCode {
    match response {
        Response::Error { code, .. } => code,
        other => panic!("expected Error, got {other:?}"),
    }
}

/// Folds deliveries until `stop` matches an event.
async fn fold_until(
    rx: &mut mpsc::UnboundedReceiver<Delivery>,
    state: &mut Option<RoomSnapshot>,
    stop: impl Fn(&RaceEvent) -> bool,
) {
    loop {
        let delivery = time::timeout(Duration::from_secs(600), rx.recv())
            .await
            .expect("timed out")
            .expect("stream ended");
        match delivery {
            Delivery::Snapshot(snap) => *state = Some(snap),
            Delivery::Event(event) => {
                let hit = stop(&event);
                state
                    .get_or_insert_with(|| RoomSnapshot::new(event.room_id))
                    .apply(&event);
                if hit {
                    return;
                }
            }
        }
    }
}

// =========================================================================
// Requests
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_handle_create_and_list_rooms() {
    let gw = gateway(Duration::from_secs(30));
    let (mut conn, _rx) = connection();

    let Response::RoomCreated { room_id } = gw.handle(&mut conn, ClientRequest::CreateRoom).await
    else {
        panic!("expected RoomCreated");
    };
    join(&gw, &mut conn, room_id, "Alice").await;

    let Response::RoomList { rooms } = gw.handle(&mut conn, ClientRequest::ListRooms).await else {
        panic!("expected RoomList");
    };
    assert_eq!(rooms.len(), 1);
    assert_eq!(rooms[0].room_id, room_id);
    assert_eq!(rooms[0].player_count, 1);
    assert_eq!(rooms[0].phase, Phase::Open);
}

#[tokio::test(start_paused = true)]
async fn test_handle_join_returns_token_and_opens_session() {
    let gw = gateway(Duration::from_secs(30));
    let (mut conn, _rx) = connection();
    let room_id = gw.create_room();

    let (player_id, token) = join(&gw, &mut conn, room_id, "Alice").await;

    assert_eq!(token.len(), 32);
    let session = gw.session(player_id).unwrap();
    assert_eq!(session.room_id, room_id);
    assert_eq!(session.state, SessionState::Connected);
    assert_eq!(conn.players().collect::<Vec<_>>(), vec![player_id]);
}

#[tokio::test(start_paused = true)]
async fn test_handle_errors_map_to_codes() {
    let gw = gateway(Duration::from_secs(30));
    let (mut conn, _rx) = connection();
    let room_id = gw.create_room();
    for name in ["A", "B", "C", "D"] {
        join(&gw, &mut conn, room_id, name).await;
    }

    let full = gw
        .handle(
            &mut conn,
            ClientRequest::JoinRoom {
                room_id,
                display_name: "Eve".into(),
            },
        )
        .await;
    let missing = gw
        .handle(&mut conn, ClientRequest::StartRace { room_id: RoomId(u64::MAX) })
        .await;
    let not_ready = gw
        .handle(&mut conn, ClientRequest::StartRace { room_id })
        .await;
    let stranger = gw
        .handle(
            &mut conn,
            ClientRequest::SetReady {
                room_id,
                player_id: PlayerId(u64::MAX),
                ready: true,
            },
        )
        .await;

    assert_eq!(error_code(full), ErrorCode::RoomFull);
    assert_eq!(error_code(missing), ErrorCode::NotFound);
    assert_eq!(error_code(not_ready), ErrorCode::InvalidTransition);
    assert_eq!(error_code(stranger), ErrorCode::UnknownPlayer);
}

#[tokio::test(start_paused = true)]
async fn test_handle_invalid_name_rejected() {
    let gw = gateway(Duration::from_secs(30));
    let (mut conn, _rx) = connection();
    let room_id = gw.create_room();

    let response = gw
        .handle(
            &mut conn,
            ClientRequest::JoinRoom {
                room_id,
                display_name: "   ".into(),
            },
        )
        .await;

    assert_eq!(error_code(response), ErrorCode::InvalidName);
    assert_eq!(conn.players().count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_handle_chat_is_ignored() {
    let gw = gateway(Duration::from_secs(30));
    let (mut conn, _rx) = connection();
    let room_id = gw.create_room();

    let response = gw
        .handle(
            &mut conn,
            ClientRequest::Chat {
                room_id,
                text: "gl hf".into(),
            },
        )
        .await;

    assert!(matches!(response, Response::Ignored { .. }));
}

#[tokio::test(start_paused = true)]
async fn test_handle_heartbeat_echoes_client_time() {
    let gw = gateway(Duration::from_secs(30));
    let (mut conn, _rx) = connection();
    time::advance(Duration::from_millis(1500)).await;

    let response = gw
        .handle(&mut conn, ClientRequest::Heartbeat { client_time: 77 })
        .await;

    assert_eq!(
        response,
        Response::HeartbeatAck {
            client_time: 77,
            server_time: 1500
        }
    );
}

#[tokio::test(start_paused = true)]
async fn test_handle_subscribe_sends_snapshot_then_events() {
    let gw = gateway(Duration::from_secs(30));
    let (mut conn, mut rx) = connection();
    let room_id = gw.create_room();

    let response = gw
        .handle(&mut conn, ClientRequest::Subscribe { room_id, last_seen: None })
        .await;
    assert_eq!(response, Response::Subscribed { room_id });
    assert!(conn.is_subscribed(room_id));
    join(&gw, &mut conn, room_id, "Alice").await;

    assert!(matches!(rx.recv().await, Some(Delivery::Snapshot(s)) if s.seq == 0));
    assert!(matches!(
        rx.recv().await,
        Some(Delivery::Event(RaceEvent { seq: 1, payload: EventPayload::PlayerJoined { .. }, .. }))
    ));
}

#[tokio::test(start_paused = true)]
async fn test_handle_resubscribe_replaces_subscription() {
    let gw = gateway(Duration::from_secs(30));
    let (mut conn, mut rx) = connection();
    let room_id = gw.create_room();
    let subscribe = ClientRequest::Subscribe { room_id, last_seen: None };

    gw.handle(&mut conn, subscribe.clone()).await;
    gw.handle(&mut conn, subscribe).await;
    join(&gw, &mut conn, room_id, "Alice").await;

    // Two snapshots, then the event exactly once.
    assert!(matches!(rx.recv().await, Some(Delivery::Snapshot(_))));
    assert!(matches!(rx.recv().await, Some(Delivery::Snapshot(_))));
    assert_eq!(rx.recv().await.map(|d| d.seq()), Some(1));
    assert!(rx.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn test_handle_leave_ends_session() {
    let gw = gateway(Duration::from_secs(30));
    let (mut conn, _rx) = connection();
    let room_id = gw.create_room();
    let (alice, token) = join(&gw, &mut conn, room_id, "Alice").await;
    join(&gw, &mut conn, room_id, "Bob").await;

    let response = gw
        .handle(&mut conn, ClientRequest::LeaveRoom { room_id, player_id: alice })
        .await;

    assert_eq!(response, Response::Ok);
    assert!(gw.session(alice).is_none());
    let reconnect = gw.handle(&mut conn, ClientRequest::Reconnect { token }).await;
    assert_eq!(error_code(reconnect), ErrorCode::InvalidToken);
}

// =========================================================================
// Disconnect and reconnect
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_close_connection_marks_players_disconnected() {
    let gw = gateway(Duration::from_secs(30));
    let (mut alice_conn, _a) = connection();
    let (mut watcher, mut rx) = connection();
    let room_id = gw.create_room();
    let (alice, _) = join(&gw, &mut alice_conn, room_id, "Alice").await;
    join(&gw, &mut watcher, room_id, "Bob").await;
    gw.handle(&mut watcher, ClientRequest::Subscribe { room_id, last_seen: None })
        .await;
    let mut state = None;

    gw.close_connection(alice_conn).await;
    fold_until(&mut rx, &mut state, |e| {
        matches!(e.payload, EventPayload::ConnectionChanged { connected: false, .. })
    })
    .await;

    let snap = state.unwrap();
    assert!(!snap.player(alice).unwrap().connected);
    assert!(matches!(
        gw.session(alice).unwrap().state,
        SessionState::Disconnected { .. }
    ));
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_within_grace_keeps_seat() {
    let gw = gateway(Duration::from_secs(30));
    let (mut alice_conn, _a) = connection();
    let (mut bob_conn, _b) = connection();
    let room_id = gw.create_room();
    let (alice, token) = join(&gw, &mut alice_conn, room_id, "Alice").await;
    join(&gw, &mut bob_conn, room_id, "Bob").await;
    gw.close_connection(alice_conn).await;
    time::sleep(Duration::from_secs(20)).await;

    let (mut fresh, _f) = connection();
    let response = gw.handle(&mut fresh, ClientRequest::Reconnect { token }).await;

    assert_eq!(response, Response::Reconnected { room_id, player_id: alice });
    time::sleep(Duration::from_secs(60)).await;
    let snap = gw.registry().get(room_id).unwrap().snapshot().await.unwrap();
    assert!(snap.player(alice).unwrap().connected);
    assert_eq!(snap.players.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_grace_elapsed_player_leaves_and_token_expires() {
    let gw = gateway(Duration::from_secs(30));
    let (mut alice_conn, _a) = connection();
    let (mut bob_conn, _b) = connection();
    let room_id = gw.create_room();
    let (alice, token) = join(&gw, &mut alice_conn, room_id, "Alice").await;
    join(&gw, &mut bob_conn, room_id, "Bob").await;

    gw.close_connection(alice_conn).await;
    time::sleep(Duration::from_secs(31)).await;

    let snap = gw.registry().get(room_id).unwrap().snapshot().await.unwrap();
    assert!(snap.player(alice).is_none());
    let (mut fresh, _f) = connection();
    let response = gw
        .handle(&mut fresh, ClientRequest::Reconnect { token: token.clone() })
        .await;
    assert_eq!(error_code(response), ErrorCode::SessionExpired);

    assert_eq!(gw.purge_expired(), 1);
    let response = gw.handle(&mut fresh, ClientRequest::Reconnect { token }).await;
    assert_eq!(error_code(response), ErrorCode::InvalidToken);
}

// Real clock: the grace period has to run out while the grace timer task
// is starved, so the reconnect is the first to notice.
#[tokio::test]
async fn test_reconnect_after_grace_before_timer_runs_removes_player() {
    let gw = gateway(Duration::from_millis(50));
    let (mut alice_conn, _a) = connection();
    let (mut bob_conn, _b) = connection();
    let room_id = gw.create_room();
    let (alice, token) = join(&gw, &mut alice_conn, room_id, "Alice").await;
    let (bob, _) = join(&gw, &mut bob_conn, room_id, "Bob").await;
    gw.close_connection(alice_conn).await;

    std::thread::sleep(Duration::from_millis(80));
    let (mut fresh, _f) = connection();
    let response = gw.handle(&mut fresh, ClientRequest::Reconnect { token }).await;

    assert_eq!(error_code(response), ErrorCode::SessionExpired);
    time::sleep(Duration::from_millis(200)).await;
    let snap = gw.registry().get(room_id).unwrap().snapshot().await.unwrap();
    assert!(snap.player(alice).is_none());
    let seated: Vec<PlayerId> = snap.players.iter().map(|p| p.id).collect();
    assert_eq!(seated, vec![bob]);
    assert_eq!(
        gw.session(alice).map(|s| s.state),
        Some(SessionState::Expired)
    );
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_during_race_forfeits_after_grace() {
    let gw = gateway(Duration::from_secs(1));
    let (mut alice_conn, _a) = connection();
    let (mut bob_conn, mut rx) = connection();
    let room_id = gw.create_room();
    let (alice, _) = join(&gw, &mut alice_conn, room_id, "Alice").await;
    let (bob, _) = join(&gw, &mut bob_conn, room_id, "Bob").await;
    ready(&gw, &mut alice_conn, room_id, alice).await;
    ready(&gw, &mut bob_conn, room_id, bob).await;
    gw.handle(&mut bob_conn, ClientRequest::Subscribe { room_id, last_seen: None })
        .await;
    let mut state = None;

    assert_eq!(
        gw.handle(&mut bob_conn, ClientRequest::StartRace { room_id }).await,
        Response::Ok
    );
    fold_until(&mut rx, &mut state, |e| matches!(e.payload, EventPayload::Tick { .. })).await;
    gw.close_connection(alice_conn).await;
    fold_until(&mut rx, &mut state, |e| {
        matches!(e.payload, EventPayload::RoundFinished { .. })
    })
    .await;

    let snap = state.unwrap();
    assert_eq!(snap.phase, Phase::Finished);
    let race = snap.race.unwrap();
    let alice_entrant = race.entrants.iter().find(|e| e.player_id == alice).unwrap();
    assert!(alice_entrant.forfeited);
    assert_eq!(alice_entrant.finish_rank, None);
    let result = race.result.unwrap();
    assert_eq!(result.outcome, RoundOutcome::Completed);
    assert_eq!(result.rankings.len(), 1);
    assert_eq!(result.rankings[0].player_id, bob);
    assert!(!result.did_not_finish.contains(&alice));
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_unknown_token_rejected() {
    let gw = gateway(Duration::from_secs(30));
    let (mut conn, _rx) = connection();

    let response = gw
        .handle(&mut conn, ClientRequest::Reconnect { token: "0".repeat(32) })
        .await;

    assert_eq!(error_code(response), ErrorCode::InvalidToken);
}
