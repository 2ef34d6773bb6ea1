//! Room registry: creates, tracks, expires and recovers rooms.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use racelane_broadcast::Channel;
use racelane_protocol::RoomId;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info};

use crate::actor::spawn_room;
use crate::{Room, RoomConfig, RoomError, RoomHandle, RoomInfo, RoomStore, SeedSource};

/// Counter for generating unique room IDs.
static NEXT_ROOM_ID: AtomicU64 = AtomicU64::new(1);

/// The map of live rooms.
///
/// This map is the only state shared between sessions. It holds
/// [`RoomHandle`]s, never room state: everything about a room is read and
/// changed through its actor. Closed rooms are pruned lazily.
///
/// Shared behind an `Arc`; every method takes `&self`.
pub struct RoomRegistry<C: Channel, S: RoomStore> {
    rooms: Mutex<HashMap<RoomId, RoomHandle>>,
    config: RoomConfig,
    channel: Arc<C>,
    store: Arc<S>,
    seeds: Arc<dyn SeedSource>,
}

impl<C: Channel, S: RoomStore> RoomRegistry<C, S> {
    pub fn new(
        config: RoomConfig,
        channel: Arc<C>,
        store: Arc<S>,
        seeds: Arc<dyn SeedSource>,
    ) -> Self {
        Self {
            rooms: Mutex::new(HashMap::new()),
            config: config.validated(),
            channel,
            store,
            seeds,
        }
    }

    pub fn config(&self) -> &RoomConfig {
        &self.config
    }

    pub fn channel(&self) -> &Arc<C> {
        &self.channel
    }

    fn rooms(&self) -> std::sync::MutexGuard<'_, HashMap<RoomId, RoomHandle>> {
        self.rooms.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Creates an empty `Open` room and starts its actor.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn create_room(&self) -> RoomHandle {
        let room_id = RoomId(NEXT_ROOM_ID.fetch_add(1, Ordering::Relaxed));
        let room = Room::new(room_id, self.config.clone());
        let handle = spawn_room(
            room,
            Vec::new(),
            Arc::clone(&self.channel),
            Arc::clone(&self.store),
            Arc::clone(&self.seeds),
        );
        self.rooms().insert(room_id, handle.clone());
        info!(%room_id, "room created");
        handle
    }

    /// Looks up a live room.
    ///
    /// # Errors
    /// [`RoomError::NotFound`] if the room never existed or has closed.
    pub fn get(&self, room_id: RoomId) -> Result<RoomHandle, RoomError> {
        let mut rooms = self.rooms();
        let live = rooms.get(&room_id).map(|h| (!h.is_closed()).then(|| h.clone()));
        match live {
            Some(Some(handle)) => Ok(handle),
            Some(None) => {
                rooms.remove(&room_id);
                Err(RoomError::NotFound(room_id))
            }
            None => Err(RoomError::NotFound(room_id)),
        }
    }

    /// Closes every `Open` or `Finished` room that has been idle for longer
    /// than `ttl`. Rooms in `Ready` or `Racing` are never expired.
    ///
    /// Returns the ids of the expired rooms.
    pub async fn expire_inactive(&self, now: Instant, ttl: Duration) -> Vec<RoomId> {
        let mut expired = Vec::new();
        for handle in self.handles() {
            if let Ok(true) = handle.expire_if_idle(now, ttl).await {
                expired.push(handle.room_id());
            }
        }
        let pruned = self.prune_closed();
        if !expired.is_empty() {
            info!(expired = expired.len(), pruned, "expired inactive rooms");
        }
        expired
    }

    /// Force-closes a room. A running round is aborted at its next tick.
    ///
    /// # Errors
    /// [`RoomError::NotFound`] if the room is not live.
    pub async fn close_room(&self, room_id: RoomId) -> Result<(), RoomError> {
        let handle = self.get(room_id)?;
        handle.close().await?;
        self.prune_closed();
        Ok(())
    }

    /// Rebuilds a room from the store after a restart.
    ///
    /// Returns the live handle instead if the room is already running.
    ///
    /// # Errors
    /// - [`RoomError::Store`] if nothing is stored for the room.
    /// - [`RoomError::NotFound`] if the stored room had already closed.
    pub async fn recover(&self, room_id: RoomId) -> Result<RoomHandle, RoomError> {
        if let Ok(handle) = self.get(room_id) {
            return Ok(handle);
        }

        let snapshot = self.store.get(room_id).await?;
        let (room, events) = Room::restore(snapshot, self.config.clone())?;
        NEXT_ROOM_ID.fetch_max(room_id.0 + 1, Ordering::Relaxed);

        let handle = spawn_room(
            room,
            events,
            Arc::clone(&self.channel),
            Arc::clone(&self.store),
            Arc::clone(&self.seeds),
        );
        self.rooms().insert(room_id, handle.clone());
        info!(%room_id, "room recovered from store");
        Ok(handle)
    }

    /// Metadata of every live room, ordered by id. Rooms that stop while
    /// being queried are skipped.
    pub async fn list(&self) -> Vec<RoomInfo> {
        let mut infos = Vec::new();
        for handle in self.handles() {
            if let Ok(info) = handle.info().await {
                infos.push(info);
            }
        }
        infos.sort_by_key(|info| info.room_id);
        infos
    }

    /// Removes handles of rooms whose actor has stopped. Returns how many.
    pub fn prune_closed(&self) -> usize {
        let mut rooms = self.rooms();
        let before = rooms.len();
        rooms.retain(|_, handle| !handle.is_closed());
        let pruned = before - rooms.len();
        if pruned > 0 {
            debug!(pruned, "pruned closed rooms");
        }
        pruned
    }

    /// Ids of live rooms, ascending.
    pub fn room_ids(&self) -> Vec<RoomId> {
        let mut ids: Vec<RoomId> = self
            .rooms()
            .iter()
            .filter(|(_, handle)| !handle.is_closed())
            .map(|(id, _)| *id)
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Number of live rooms.
    pub fn len(&self) -> usize {
        self.rooms()
            .values()
            .filter(|handle| !handle.is_closed())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn handles(&self) -> Vec<RoomHandle> {
        self.rooms().values().cloned().collect()
    }

    /// Spawns a background task that runs [`expire_inactive`] every
    /// `every`. The task ends once the registry is dropped.
    ///
    /// [`expire_inactive`]: Self::expire_inactive
    pub fn spawn_janitor(self: &Arc<Self>, every: Duration, ttl: Duration) -> JoinHandle<()> {
        let registry: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut interval = time::interval_at(Instant::now() + every, every);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                let Some(registry) = registry.upgrade() else {
                    debug!("registry dropped, janitor stopping");
                    break;
                };
                registry.expire_inactive(Instant::now(), ttl).await;
            }
        })
    }
}
