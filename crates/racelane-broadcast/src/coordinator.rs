//! Per-room broadcast coordinator.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use racelane_protocol::{Delivery, RaceEvent, RoomId, RoomSnapshot};
use serde::{Deserialize, Serialize};
use tokio::time;
use tracing::{debug, info, warn};

use crate::{Channel, ChannelError, DeliverySink, EventLog, SubscriptionId};

// ---------------------------------------------------------------------------
// RetryPolicy
// ---------------------------------------------------------------------------

/// How hard to try before giving up on a publish.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Publish attempts per flush, including the first one.
    pub max_attempts: u32,
    /// Wait after the first failure. Doubles after every further failure.
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(50),
            max_backoff: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Backoff after the `failures`-th consecutive failure (1-based).
    pub fn backoff(&self, failures: u32) -> Duration {
        let shift = failures.saturating_sub(1).min(16);
        self.initial_backoff
            .saturating_mul(1 << shift)
            .min(self.max_backoff)
    }
}

// ---------------------------------------------------------------------------
// BroadcastCoordinator
// ---------------------------------------------------------------------------

/// Subscription ids handed out by coordinators. Unique across rooms.
static NEXT_SUBSCRIPTION_ID: AtomicU64 = AtomicU64::new(1);

enum Subscriber {
    /// Registered with the channel under this id.
    Live(SubscriptionId),
    /// Already holds the room's state up to `caught_up`. Joins the channel
    /// once no pending event at or below that point is left.
    Parked { sink: DeliverySink, caught_up: u64 },
}

/// Turns a room's committed events into ordered channel publishes.
///
/// Owned by the room actor, so everything here runs inside the room's
/// serialization slot:
///
/// - [`enqueue`](Self::enqueue) records events in the replay log and the
///   pending queue.
/// - [`flush`](Self::flush) publishes pending events strictly in order. A
///   failing event blocks the ones behind it until it is acknowledged.
/// - [`attach`](Self::attach) sends a new subscriber its starting point
///   before registering it, so nothing published later can overtake it.
///   While older events are still pending, registration waits until they
///   are out, so the subscriber never sees an event its starting point
///   already covers.
pub struct BroadcastCoordinator<C: Channel> {
    room_id: RoomId,
    channel: Arc<C>,
    log: EventLog,
    /// Committed but not yet acknowledged by the channel, oldest first.
    pending: VecDeque<RaceEvent>,
    retry: RetryPolicy,
    degraded: bool,
    /// Flushes in a row that ended with events still pending.
    failed_flushes: u32,
    subscribers: HashMap<SubscriptionId, Subscriber>,
}

impl<C: Channel> BroadcastCoordinator<C> {
    /// Creates a coordinator for a room whose state is at `seq`.
    pub fn new(
        room_id: RoomId,
        channel: Arc<C>,
        retry: RetryPolicy,
        log_capacity: usize,
        seq: u64,
    ) -> Self {
        Self {
            room_id,
            channel,
            log: EventLog::starting_at(log_capacity, seq),
            pending: VecDeque::new(),
            retry,
            degraded: false,
            failed_flushes: 0,
            subscribers: HashMap::new(),
        }
    }

    /// Queues freshly committed events for publishing.
    ///
    /// Events must continue the room's sequence without gaps; anything else
    /// is a bug in the caller and is dropped with a warning.
    pub fn enqueue(&mut self, events: impl IntoIterator<Item = RaceEvent>) {
        for event in events {
            if !self.log.push(event.clone()) {
                warn!(
                    room_id = %self.room_id,
                    expected = self.log.latest_seq() + 1,
                    got = event.seq,
                    "out-of-order event dropped"
                );
                continue;
            }
            self.pending.push_back(event);
        }
    }

    /// Publishes every pending event, in order.
    ///
    /// Each event gets up to `max_attempts` tries with exponential backoff.
    /// When an event still fails, the room is flagged degraded and the
    /// event stays at the head of the queue for the next flush; see
    /// [`retry_after`](Self::retry_after).
    pub async fn flush(&mut self) -> Result<(), ChannelError> {
        let max_attempts = self.retry.max_attempts.max(1);

        while let Some(event) = self.pending.front() {
            let mut failures = 0;
            loop {
                match self.channel.publish(self.room_id, event).await {
                    Ok(()) => break,
                    Err(err) => {
                        failures += 1;
                        if failures >= max_attempts {
                            if !self.degraded {
                                warn!(
                                    room_id = %self.room_id,
                                    seq = event.seq,
                                    pending = self.pending.len(),
                                    error = %err,
                                    "publish retries exhausted, room degraded"
                                );
                            }
                            self.degraded = true;
                            self.failed_flushes = self.failed_flushes.saturating_add(1);
                            return Err(err);
                        }
                        let backoff = self.retry.backoff(failures);
                        warn!(
                            room_id = %self.room_id,
                            seq = event.seq,
                            attempt = failures,
                            backoff_ms = backoff.as_millis() as u64,
                            error = %err,
                            "publish failed, retrying"
                        );
                        time::sleep(backoff).await;
                    }
                }
            }
            let published = event.seq;
            self.pending.pop_front();
            self.promote_parked(published);
        }

        if self.degraded {
            info!(room_id = %self.room_id, "publishing recovered");
            self.degraded = false;
        }
        self.failed_flushes = 0;
        Ok(())
    }

    /// When the owner should call [`flush`](Self::flush) again on its own.
    /// `None` while nothing is pending. Backs off with every failed flush.
    pub fn retry_after(&self) -> Option<Duration> {
        if self.pending.is_empty() {
            return None;
        }
        Some(self.retry.backoff(self.failed_flushes.max(1)))
    }

    /// Registers parked subscribers whose starting point `published` has
    /// now reached.
    fn promote_parked(&mut self, published: u64) {
        let backlog_done = self.pending.is_empty();
        let ready: Vec<SubscriptionId> = self
            .subscribers
            .iter()
            .filter(|(_, sub)| {
                matches!(sub, Subscriber::Parked { caught_up, .. }
                    if backlog_done || *caught_up <= published)
            })
            .map(|(id, _)| *id)
            .collect();

        for id in ready {
            if let Some(Subscriber::Parked { sink, .. }) = self.subscribers.remove(&id) {
                let channel_id = self.channel.subscribe(self.room_id, sink);
                debug!(
                    room_id = %self.room_id,
                    subscription = %id,
                    published,
                    "parked subscriber registered"
                );
                self.subscribers.insert(id, Subscriber::Live(channel_id));
            }
        }
    }

    /// Bootstraps a subscriber and registers it with the channel.
    ///
    /// With `last_seen` still covered by the replay log, the subscriber gets
    /// the missing events; otherwise it gets `snapshot`. Either way the
    /// first live event it receives follows directly.
    pub fn attach(
        &mut self,
        sink: DeliverySink,
        snapshot: &RoomSnapshot,
        last_seen: Option<u64>,
    ) -> SubscriptionId {
        let replay = last_seen
            .filter(|_| self.log.latest_seq() == snapshot.seq)
            .and_then(|seen| self.log.since(seen));

        match replay {
            Some(events) => {
                debug!(
                    room_id = %self.room_id,
                    replayed = events.len(),
                    "resuming subscriber from log"
                );
                for event in events {
                    let _ = sink.send(Delivery::Event(event));
                }
            }
            None => {
                debug!(room_id = %self.room_id, seq = snapshot.seq, "sending snapshot");
                let _ = sink.send(Delivery::Snapshot(snapshot.clone()));
            }
        }

        let id = SubscriptionId(NEXT_SUBSCRIPTION_ID.fetch_add(1, Ordering::Relaxed));
        let caught_up = snapshot.seq;
        let subscriber = if self.pending.front().is_some_and(|e| e.seq <= caught_up) {
            debug!(
                room_id = %self.room_id,
                subscription = %id,
                pending = self.pending.len(),
                "subscriber parked behind unpublished events"
            );
            Subscriber::Parked { sink, caught_up }
        } else {
            Subscriber::Live(self.channel.subscribe(self.room_id, sink))
        };
        self.subscribers.insert(id, subscriber);
        id
    }

    /// Removes one subscriber. Returns `false` if it did not belong to this
    /// room.
    pub fn detach(&mut self, id: SubscriptionId) -> bool {
        match self.subscribers.remove(&id) {
            Some(Subscriber::Live(channel_id)) => self.channel.unsubscribe(channel_id),
            Some(Subscriber::Parked { .. }) => true,
            None => false,
        }
    }

    /// Removes every subscriber. Called when the room closes.
    pub fn detach_all(&mut self) {
        for (_, subscriber) in self.subscribers.drain() {
            if let Subscriber::Live(channel_id) = subscriber {
                self.channel.unsubscribe(channel_id);
            }
        }
    }

    /// `true` while publishing has been failing past the retry budget.
    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    /// Events waiting for a channel acknowledgment.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn log(&self) -> &EventLog {
        &self.log
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}
