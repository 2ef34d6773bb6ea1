//! Room actor: an isolated Tokio task that owns one [`Room`].
//!
//! All access to a room goes through its command channel, so exactly one
//! mutation is in flight per room and rooms never block each other. The
//! actor also owns the room's timers (race ticks, auto-start countdown,
//! idle reset) and its [`BroadcastCoordinator`], which keeps the event
//! stream in commit order.

use std::sync::Arc;
use std::time::Duration;

use racelane_broadcast::{BroadcastCoordinator, Channel, DeliverySink, SubscriptionId};
use racelane_protocol::{Phase, PlayerId, RaceEvent, RoomId, RoomSnapshot, RoomSummary};
use racelane_tick::{Deadline, TickConfig, TickScheduler};
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::{Room, RoomError, RoomStore, SeedSource};

type Reply<T> = oneshot::Sender<Result<T, RoomError>>;

/// Commands sent to a room actor through its channel.
pub(crate) enum RoomCommand {
    Join {
        display_name: String,
        reply: Reply<PlayerId>,
    },
    SetReady {
        player_id: PlayerId,
        ready: bool,
        reply: Reply<()>,
    },
    Leave {
        player_id: PlayerId,
        reply: Reply<()>,
    },
    StartRace {
        reply: Reply<()>,
    },
    Reset {
        reply: Reply<()>,
    },
    SetConnected {
        player_id: PlayerId,
        connected: bool,
        reply: Reply<()>,
    },
    Subscribe {
        sink: DeliverySink,
        last_seen: Option<u64>,
        reply: oneshot::Sender<SubscriptionId>,
    },
    Unsubscribe {
        subscription: SubscriptionId,
        reply: oneshot::Sender<bool>,
    },
    Snapshot {
        reply: oneshot::Sender<RoomSnapshot>,
    },
    Info {
        reply: oneshot::Sender<RoomInfo>,
    },
    /// Close the room if it is expirable and idle for longer than `ttl`.
    ExpireIfIdle {
        now: Instant,
        ttl: Duration,
        reply: oneshot::Sender<bool>,
    },
    /// Force-close. A running round is aborted at the next tick.
    Close {
        reply: oneshot::Sender<()>,
    },
}

/// A copy of a room's metadata, taken inside the room's slot.
#[derive(Debug, Clone)]
pub struct RoomInfo {
    pub room_id: RoomId,
    pub phase: Phase,
    pub player_count: usize,
    pub max_players: usize,
    /// Sequence number of the last committed event.
    pub seq: u64,
    pub created_at: Instant,
    pub last_activity_at: Instant,
    /// Publishing has been failing past the retry budget.
    pub degraded: bool,
    /// Events committed but not yet acknowledged by the channel.
    pub pending_events: usize,
    pub subscribers: usize,
}

impl RoomInfo {
    pub fn summary(&self) -> RoomSummary {
        RoomSummary {
            room_id: self.room_id,
            phase: self.phase,
            player_count: self.player_count,
            max_players: self.max_players,
        }
    }
}

// ---------------------------------------------------------------------------
// RoomHandle
// ---------------------------------------------------------------------------

/// Handle to a running room actor.
///
/// Cheap to clone: it wraps an `mpsc::Sender`. Every method fails with
/// [`RoomError::Unavailable`] once the actor has stopped.
#[derive(Clone)]
pub struct RoomHandle {
    room_id: RoomId,
    sender: mpsc::Sender<RoomCommand>,
}

impl RoomHandle {
    pub fn room_id(&self) -> RoomId {
        self.room_id
    }

    /// `true` once the actor has stopped (the room is `Closed`).
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> RoomCommand,
    ) -> Result<T, RoomError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.sender
            .send(make(reply_tx))
            .await
            .map_err(|_| RoomError::Unavailable(self.room_id))?;
        reply_rx
            .await
            .map_err(|_| RoomError::Unavailable(self.room_id))
    }

    /// Seats a new player. Returns the player's id.
    pub async fn join(&self, display_name: impl Into<String>) -> Result<PlayerId, RoomError> {
        let display_name = display_name.into();
        self.request(|reply| RoomCommand::Join {
            display_name,
            reply,
        })
        .await?
    }

    pub async fn set_ready(&self, player_id: PlayerId, ready: bool) -> Result<(), RoomError> {
        self.request(|reply| RoomCommand::SetReady {
            player_id,
            ready,
            reply,
        })
        .await?
    }

    /// Removes a player. The last player leaving closes the room.
    pub async fn leave(&self, player_id: PlayerId) -> Result<(), RoomError> {
        self.request(|reply| RoomCommand::Leave { player_id, reply })
            .await?
    }

    pub async fn start_race(&self) -> Result<(), RoomError> {
        self.request(|reply| RoomCommand::StartRace { reply }).await?
    }

    pub async fn reset(&self) -> Result<(), RoomError> {
        self.request(|reply| RoomCommand::Reset { reply }).await?
    }

    pub async fn set_connected(
        &self,
        player_id: PlayerId,
        connected: bool,
    ) -> Result<(), RoomError> {
        self.request(|reply| RoomCommand::SetConnected {
            player_id,
            connected,
            reply,
        })
        .await?
    }

    /// Starts streaming the room's deliveries into `sink`: first a snapshot
    /// (or, with a still-covered `last_seen`, the missed events), then every
    /// new event in order.
    pub async fn subscribe(
        &self,
        sink: DeliverySink,
        last_seen: Option<u64>,
    ) -> Result<SubscriptionId, RoomError> {
        self.request(|reply| RoomCommand::Subscribe {
            sink,
            last_seen,
            reply,
        })
        .await
    }

    pub async fn unsubscribe(&self, subscription: SubscriptionId) -> Result<bool, RoomError> {
        self.request(|reply| RoomCommand::Unsubscribe {
            subscription,
            reply,
        })
        .await
    }

    /// A consistent copy of the room's full state.
    pub async fn snapshot(&self) -> Result<RoomSnapshot, RoomError> {
        self.request(|reply| RoomCommand::Snapshot { reply }).await
    }

    pub async fn info(&self) -> Result<RoomInfo, RoomError> {
        self.request(|reply| RoomCommand::Info { reply }).await
    }

    /// Closes the room if it is `Open` or `Finished` and has been idle for
    /// longer than `ttl`. Returns whether it closed.
    pub async fn expire_if_idle(&self, now: Instant, ttl: Duration) -> Result<bool, RoomError> {
        self.request(|reply| RoomCommand::ExpireIfIdle { now, ttl, reply })
            .await
    }

    /// Force-closes the room. A running round is aborted at its next tick.
    pub async fn close(&self) -> Result<(), RoomError> {
        self.request(|reply| RoomCommand::Close { reply }).await
    }
}

// ---------------------------------------------------------------------------
// RoomActor
// ---------------------------------------------------------------------------

struct RoomActor<C: Channel, S: RoomStore> {
    room: Room,
    broadcast: BroadcastCoordinator<C>,
    store: Arc<S>,
    seeds: Arc<dyn SeedSource>,
    receiver: mpsc::Receiver<RoomCommand>,
    ticks: TickScheduler,
    countdown: Deadline,
    idle_reset: Deadline,
    /// Next attempt at events the channel has not acknowledged yet.
    redelivery: Deadline,
    /// Set by a close request during a race; honored at the next tick.
    abort_requested: bool,
}

impl<C: Channel, S: RoomStore> RoomActor<C, S> {
    async fn run(mut self, initial: Vec<RaceEvent>) {
        let room_id = self.room.id();
        info!(%room_id, "room actor started");

        self.publish(initial).await;
        self.sync_timers();

        while self.room.phase() != Phase::Closed {
            tokio::select! {
                cmd = self.receiver.recv() => match cmd {
                    Some(cmd) => self.handle(cmd).await,
                    None => {
                        debug!(%room_id, "all handles dropped");
                        let events = self.room.close();
                        self.publish(events).await;
                    }
                },
                _ = self.ticks.wait_for_tick() => {
                    let events = if self.abort_requested {
                        self.room.close()
                    } else {
                        self.room.advance_race()
                    };
                    self.publish(events).await;
                    self.ticks.record_tick_end();
                }
                () = self.countdown.wait() => {
                    if self.room.phase() == Phase::Ready {
                        let seed = self.seeds.next_seed();
                        match self.room.start_race(seed) {
                            Ok(events) => self.publish(events).await,
                            Err(err) => warn!(%room_id, error = %err, "auto-start failed"),
                        }
                    }
                }
                () = self.idle_reset.wait() => {
                    if self.room.phase() == Phase::Finished {
                        match self.room.reset() {
                            Ok(events) => self.publish(events).await,
                            Err(err) => warn!(%room_id, error = %err, "idle reset failed"),
                        }
                    }
                }
                () = self.redelivery.wait() => {
                    debug!(
                        %room_id,
                        pending = self.broadcast.pending_len(),
                        "retrying unacknowledged events"
                    );
                    let _ = self.broadcast.flush().await;
                }
            }
            self.sync_timers();
        }

        self.broadcast.detach_all();
        if let Err(err) = self.store.remove(room_id).await {
            warn!(%room_id, error = %err, "failed to remove stored room");
        }
        info!(%room_id, "room actor stopped");
    }

    async fn handle(&mut self, cmd: RoomCommand) {
        match cmd {
            RoomCommand::Join {
                display_name,
                reply,
            } => {
                let result = self.room.join(&display_name);
                self.respond(result, reply).await;
            }
            RoomCommand::SetReady {
                player_id,
                ready,
                reply,
            } => {
                let result = self.room.set_ready(player_id, ready).map(|e| ((), e));
                self.respond(result, reply).await;
            }
            RoomCommand::Leave { player_id, reply } => {
                let result = self.room.leave(player_id).map(|mut events| {
                    if self.room.is_empty() {
                        events.extend(self.close_or_abort());
                    }
                    ((), events)
                });
                self.respond(result, reply).await;
            }
            RoomCommand::StartRace { reply } => {
                let seed = self.seeds.next_seed();
                let result = self.room.start_race(seed).map(|e| ((), e));
                self.respond(result, reply).await;
            }
            RoomCommand::Reset { reply } => {
                let result = self.room.reset().map(|e| ((), e));
                self.respond(result, reply).await;
            }
            RoomCommand::SetConnected {
                player_id,
                connected,
                reply,
            } => {
                let result = self
                    .room
                    .set_connected(player_id, connected)
                    .map(|e| ((), e));
                self.respond(result, reply).await;
            }
            RoomCommand::Subscribe {
                sink,
                last_seen,
                reply,
            } => {
                let id = self.broadcast.attach(sink, self.room.state(), last_seen);
                let _ = reply.send(id);
            }
            RoomCommand::Unsubscribe {
                subscription,
                reply,
            } => {
                let _ = reply.send(self.broadcast.detach(subscription));
            }
            RoomCommand::Snapshot { reply } => {
                let _ = reply.send(self.room.snapshot());
            }
            RoomCommand::Info { reply } => {
                let _ = reply.send(self.info());
            }
            RoomCommand::ExpireIfIdle { now, ttl, reply } => {
                let idle = now.saturating_duration_since(self.room.last_activity_at());
                let expire = self.room.phase().is_expirable() && idle > ttl;
                if expire {
                    info!(
                        room_id = %self.room.id(),
                        idle_secs = idle.as_secs(),
                        "room expired"
                    );
                    let events = self.room.close();
                    self.publish(events).await;
                }
                let _ = reply.send(expire);
            }
            RoomCommand::Close { reply } => {
                let events = self.close_or_abort();
                self.publish(events).await;
                let _ = reply.send(());
            }
        }
    }

    /// Closes the room now, or flags a running round for abort at the next
    /// tick boundary.
    fn close_or_abort(&mut self) -> Vec<RaceEvent> {
        if self.room.phase() == Phase::Racing {
            debug!(room_id = %self.room.id(), "close requested, aborting at next tick");
            self.abort_requested = true;
            Vec::new()
        } else {
            self.room.close()
        }
    }

    /// Publishes the events, then answers the caller, so the caller's
    /// events are on the stream by the time it hears back.
    async fn respond<T>(
        &mut self,
        result: Result<(T, Vec<RaceEvent>), RoomError>,
        reply: Reply<T>,
    ) {
        match result {
            Ok((value, events)) => {
                self.publish(events).await;
                let _ = reply.send(Ok(value));
            }
            Err(err) => {
                debug!(room_id = %self.room.id(), error = %err, "request rejected");
                let _ = reply.send(Err(err));
            }
        }
    }

    /// Hands committed events to the coordinator and persists the new state.
    async fn publish(&mut self, events: Vec<RaceEvent>) {
        if events.is_empty() {
            return;
        }
        self.broadcast.enqueue(events);
        // Failures are logged by the coordinator and retried from the
        // redelivery deadline; local state keeps moving.
        let _ = self.broadcast.flush().await;

        if self.room.phase() != Phase::Closed {
            if let Err(err) = self.store.put(self.room.state()).await {
                warn!(room_id = %self.room.id(), error = %err, "failed to store room");
            }
        }
    }

    /// Starts and stops timers to match the current phase and the
    /// publish backlog.
    fn sync_timers(&mut self) {
        let phase = self.room.phase();
        let config = self.room.config();

        match (phase == Phase::Racing, self.ticks.is_running()) {
            (true, false) => self.ticks.start(),
            (false, true) => {
                self.ticks.stop();
                self.abort_requested = false;
            }
            _ => {}
        }

        match (phase, config.auto_start_after) {
            (Phase::Ready, Some(after)) => {
                if !self.countdown.is_armed() {
                    debug!(room_id = %self.room.id(), after_ms = after.as_millis() as u64, "auto-start armed");
                    self.countdown.arm(after);
                }
            }
            _ => self.countdown.clear(),
        }

        match (phase, config.finished_reset_after) {
            (Phase::Finished, Some(after)) => {
                if !self.idle_reset.is_armed() {
                    self.idle_reset.arm(after);
                }
            }
            _ => self.idle_reset.clear(),
        }

        match self.broadcast.retry_after() {
            Some(after) => {
                if !self.redelivery.is_armed() {
                    self.redelivery.arm(after);
                }
            }
            None => self.redelivery.clear(),
        }
    }

    fn info(&self) -> RoomInfo {
        RoomInfo {
            room_id: self.room.id(),
            phase: self.room.phase(),
            player_count: self.room.player_count(),
            max_players: self.room.config().max_players,
            seq: self.room.seq(),
            created_at: self.room.created_at(),
            last_activity_at: self.room.last_activity_at(),
            degraded: self.broadcast.is_degraded(),
            pending_events: self.broadcast.pending_len(),
            subscribers: self.broadcast.subscriber_count(),
        }
    }
}

/// Spawns an actor for `room` and returns a handle to it.
///
/// `initial` holds events already committed to `room` that still need to be
/// published (a restored room's catch-up events).
pub(crate) fn spawn_room<C: Channel, S: RoomStore>(
    room: Room,
    initial: Vec<RaceEvent>,
    channel: Arc<C>,
    store: Arc<S>,
    seeds: Arc<dyn SeedSource>,
) -> RoomHandle {
    let room_id = room.id();
    let config = room.config().clone();
    let (tx, rx) = mpsc::channel(config.command_buffer);

    let start_seq = room.seq() - initial.len() as u64;
    let broadcast = BroadcastCoordinator::new(
        room_id,
        channel,
        config.retry.clone(),
        config.event_log_capacity,
        start_seq,
    );

    let actor = RoomActor {
        room,
        broadcast,
        store,
        seeds,
        receiver: rx,
        ticks: TickScheduler::new(TickConfig::with_interval(config.race.tick_interval)),
        countdown: Deadline::idle(),
        idle_reset: Deadline::idle(),
        redelivery: Deadline::idle(),
        abort_requested: false,
    };

    tokio::spawn(actor.run(initial));

    RoomHandle {
        room_id,
        sender: tx,
    }
}
