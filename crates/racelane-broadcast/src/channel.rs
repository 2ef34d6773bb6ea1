//! The pub/sub channel abstraction and its in-process implementation.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use racelane_protocol::{Delivery, RaceEvent, RoomId};
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::ChannelError;

/// Where a subscriber receives its deliveries.
pub type DeliverySink = mpsc::UnboundedSender<Delivery>;

/// Opaque handle returned by [`Channel::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(pub u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "S-{}", self.0)
    }
}

/// A topic-per-room publish/subscribe transport.
///
/// Delivery is at-least-once per subscriber: an event may arrive twice, and
/// consumers de-duplicate by sequence number. Within one topic, events reach
/// each subscriber in the order they were published.
///
/// Implementations can be backed by anything (an in-process map, a message
/// broker, a hosted realtime service). The room only ever calls `publish`
/// from its own actor task, one event at a time.
pub trait Channel: Send + Sync + 'static {
    /// Publishes one event to every subscriber of `room_id`.
    ///
    /// Resolves once the transport has acknowledged the event. An `Err`
    /// means the event may or may not have reached subscribers; the caller
    /// retries.
    fn publish(
        &self,
        room_id: RoomId,
        event: &RaceEvent,
    ) -> impl std::future::Future<Output = Result<(), ChannelError>> + Send;

    /// Registers `sink` for all future events of `room_id`.
    fn subscribe(&self, room_id: RoomId, sink: DeliverySink) -> SubscriptionId;

    /// Removes a subscription. Returns `false` if it was already gone.
    fn unsubscribe(&self, id: SubscriptionId) -> bool;
}

// ---------------------------------------------------------------------------
// LocalChannel
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Topics {
    by_room: HashMap<RoomId, Vec<(SubscriptionId, DeliverySink)>>,
    rooms: HashMap<SubscriptionId, RoomId>,
}

/// In-process [`Channel`]: pushes events straight into subscriber sinks.
///
/// Publishing never fails. Sinks whose receiver has been dropped are pruned
/// on the next publish to their room.
#[derive(Default)]
pub struct LocalChannel {
    topics: Mutex<Topics>,
    next_id: AtomicU64,
}

impl LocalChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Live subscriptions for a room.
    pub fn subscriber_count(&self, room_id: RoomId) -> usize {
        let topics = self.topics.lock().unwrap_or_else(PoisonError::into_inner);
        topics.by_room.get(&room_id).map_or(0, Vec::len)
    }
}

impl Channel for LocalChannel {
    async fn publish(&self, room_id: RoomId, event: &RaceEvent) -> Result<(), ChannelError> {
        let mut topics = self.topics.lock().unwrap_or_else(PoisonError::into_inner);
        let Topics { by_room, rooms } = &mut *topics;

        let Some(sinks) = by_room.get_mut(&room_id) else {
            trace!(%room_id, seq = event.seq, "no subscribers");
            return Ok(());
        };

        sinks.retain(|(id, sink)| {
            let alive = sink.send(Delivery::Event(event.clone())).is_ok();
            if !alive {
                rooms.remove(id);
                debug!(%room_id, subscription = %id, "pruned closed subscriber");
            }
            alive
        });
        if sinks.is_empty() {
            by_room.remove(&room_id);
        }

        trace!(%room_id, seq = event.seq, kind = ?event.kind(), "event published");
        Ok(())
    }

    fn subscribe(&self, room_id: RoomId, sink: DeliverySink) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let mut topics = self.topics.lock().unwrap_or_else(PoisonError::into_inner);
        topics.by_room.entry(room_id).or_default().push((id, sink));
        topics.rooms.insert(id, room_id);
        debug!(%room_id, subscription = %id, "subscribed");
        id
    }

    fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut topics = self.topics.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(room_id) = topics.rooms.remove(&id) else {
            return false;
        };
        if let Some(sinks) = topics.by_room.get_mut(&room_id) {
            sinks.retain(|(sub, _)| *sub != id);
            if sinks.is_empty() {
                topics.by_room.remove(&room_id);
            }
        }
        debug!(%room_id, subscription = %id, "unsubscribed");
        true
    }
}
