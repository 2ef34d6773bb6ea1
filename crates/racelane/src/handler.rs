//! Per-connection handler.
//!
//! Each accepted socket gets its own task running [`handle_connection`]:
//!   1. Upgrade to WebSocket
//!   2. Spawn a writer task that owns the outgoing half
//!   3. Loop: decode envelopes → gateway → queue the response
//!   4. On exit, hand the connection back to the gateway, which starts the
//!      grace period for its players
//!
//! Responses and deliveries share one outgoing stream. Deliveries are
//! drained first, so the events a request produced reach the client before
//! its response.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use racelane_broadcast::Channel;
use racelane_protocol::{
    Codec, Delivery, Envelope, ErrorCode, JsonCodec, Payload, Response, RoomId,
};
use racelane_room::RoomStore;
use racelane_session::ClientConnection;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{self, Instant};
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, trace, warn};

use crate::RacelaneError;
use crate::server::ServerState;

/// Counter for connection ids in logs.
static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

type WsSink = SplitSink<WebSocketStream<TcpStream>, Message>;

/// Handles a single connection from accept to close.
pub(crate) async fn handle_connection<C: Channel, S: RoomStore>(
    stream: TcpStream,
    addr: SocketAddr,
    state: Arc<ServerState<C, S>>,
) -> Result<(), RacelaneError> {
    let ws = tokio_tungstenite::accept_async(stream).await?;
    let conn_id = NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed);
    debug!(conn_id, %addr, "accepted WebSocket connection");

    let (sink, mut source) = ws.split();
    let (response_tx, response_rx) = mpsc::unbounded_channel();
    let (delivery_tx, delivery_rx) = mpsc::unbounded_channel();
    let writer = tokio::spawn(write_loop(sink, response_rx, delivery_rx, state.codec));

    let mut conn = ClientConnection::new(delivery_tx);

    loop {
        let message = match time::timeout(state.idle_timeout, source.next()).await {
            Ok(Some(Ok(message))) => message,
            Ok(Some(Err(err))) => {
                debug!(conn_id, error = %err, "recv error");
                break;
            }
            Ok(None) => {
                info!(conn_id, "connection closed cleanly");
                break;
            }
            Err(_) => {
                info!(conn_id, "connection timed out");
                break;
            }
        };

        let data = match message {
            Message::Binary(data) => data.to_vec(),
            Message::Text(text) => text.as_bytes().to_vec(),
            Message::Close(_) => {
                info!(conn_id, "client sent close");
                break;
            }
            _ => continue,
        };

        let envelope: Envelope = match state.codec.decode(&data) {
            Ok(envelope) => envelope,
            Err(err) => {
                debug!(conn_id, error = %err, "failed to decode envelope");
                let _ = response_tx.send(bad_request(0, err.to_string()));
                continue;
            }
        };

        match envelope.payload {
            Payload::Request { id, request } => {
                trace!(conn_id, id, ?request, "request");
                let response = state.gateway.handle(&mut conn, request).await;
                if response_tx
                    .send(Payload::Response {
                        reply_to: id,
                        response,
                    })
                    .is_err()
                {
                    break;
                }
            }
            _ => {
                debug!(conn_id, "ignoring non-request payload");
                let _ = response_tx.send(bad_request(
                    envelope.seq,
                    "clients may only send requests".into(),
                ));
            }
        }
    }

    state.gateway.close_connection(conn).await;
    writer.abort();
    debug!(conn_id, "connection handler finished");
    Ok(())
}

fn bad_request(reply_to: u64, message: String) -> Payload {
    Payload::Response {
        reply_to,
        response: Response::Error {
            code: ErrorCode::BadRequest,
            message,
        },
    }
}

/// Owns the outgoing half of the socket. Numbers every envelope and drops
/// deliveries the client has already seen.
async fn write_loop(
    mut sink: WsSink,
    mut responses: mpsc::UnboundedReceiver<Payload>,
    mut deliveries: mpsc::UnboundedReceiver<Delivery>,
    codec: JsonCodec,
) {
    let started = Instant::now();
    let mut filter = DeliveryFilter::default();
    let mut seq: u64 = 0;

    loop {
        let payload = tokio::select! {
            biased;
            Some(delivery) = deliveries.recv() => {
                filter.admit(&delivery).then_some(Payload::Delivery(delivery))
            }
            Some(payload) = responses.recv() => Some(payload),
            else => break,
        };
        let Some(payload) = payload else {
            continue;
        };

        seq += 1;
        let envelope = Envelope {
            seq,
            timestamp: started.elapsed().as_millis() as u64,
            payload,
        };
        let bytes = match codec.encode(&envelope) {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(error = %err, "failed to encode envelope");
                continue;
            }
        };
        if let Err(err) = sink.send(Message::Binary(bytes.into())).await {
            debug!(error = %err, "send failed, writer stopping");
            break;
        }
    }

    let _ = sink.close().await;
}

/// Drops redelivered events so each client sees every sequence number of a
/// room at most once.
#[derive(Default)]
struct DeliveryFilter {
    last_seen: HashMap<RoomId, u64>,
}

impl DeliveryFilter {
    /// Snapshots always pass and reset the room's position. Events pass
    /// only if they are newer than anything sent for the room.
    fn admit(&mut self, delivery: &Delivery) -> bool {
        let room_id = delivery.room_id();
        let seq = delivery.seq();
        match delivery {
            Delivery::Snapshot(_) => {
                self.last_seen.insert(room_id, seq);
                true
            }
            Delivery::Event(_) => {
                let last = self.last_seen.entry(room_id).or_insert(0);
                if seq <= *last {
                    trace!(%room_id, seq, "dropping duplicate delivery");
                    return false;
                }
                *last = seq;
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use racelane_protocol::{EventPayload, PlayerId, RaceEvent, RoomSnapshot};

    fn event(room: u64, seq: u64) -> Delivery {
        Delivery::Event(RaceEvent {
            room_id: RoomId(room),
            seq,
            payload: EventPayload::ReadyChanged {
                player_id: PlayerId(1),
                ready: true,
            },
        })
    }

    fn snapshot(room: u64, seq: u64) -> Delivery {
        let mut snap = RoomSnapshot::new(RoomId(room));
        snap.seq = seq;
        Delivery::Snapshot(snap)
    }

    #[test]
    fn test_admit_drops_duplicate_events() {
        let mut filter = DeliveryFilter::default();

        assert!(filter.admit(&event(1, 1)));
        assert!(filter.admit(&event(1, 2)));
        assert!(!filter.admit(&event(1, 1)));
        assert!(!filter.admit(&event(1, 2)));
        assert!(filter.admit(&event(1, 3)));
    }

    #[test]
    fn test_admit_drops_events_covered_by_snapshot() {
        let mut filter = DeliveryFilter::default();

        assert!(filter.admit(&snapshot(1, 5)));
        assert!(!filter.admit(&event(1, 5)));
        assert!(filter.admit(&event(1, 6)));
    }

    #[test]
    fn test_admit_tracks_rooms_separately() {
        let mut filter = DeliveryFilter::default();

        assert!(filter.admit(&event(1, 4)));
        assert!(filter.admit(&event(2, 1)));
    }
}
