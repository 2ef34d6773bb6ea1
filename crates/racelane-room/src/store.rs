//! Durable room storage for crash recovery.
//!
//! Rooms write their snapshot after every batch of events. Correctness never
//! depends on the store: a failed write is logged and the in-memory room
//! stays authoritative.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use racelane_protocol::{RoomId, RoomSnapshot};

/// Errors raised by a [`RoomStore`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("no stored state for room {0}")]
    NotFound(RoomId),

    /// The write would replace newer state.
    #[error("stale write for room {room_id}: stored seq {stored}, offered {offered}")]
    Stale {
        room_id: RoomId,
        stored: u64,
        offered: u64,
    },

    #[error("store backend error: {0}")]
    Backend(String),
}

/// Key-value storage of room snapshots.
pub trait RoomStore: Send + Sync + 'static {
    fn get(
        &self,
        room_id: RoomId,
    ) -> impl std::future::Future<Output = Result<RoomSnapshot, StoreError>> + Send;

    /// Stores `snapshot` under its room id. Implementations reject a
    /// snapshot older than the one already stored.
    fn put(
        &self,
        snapshot: &RoomSnapshot,
    ) -> impl std::future::Future<Output = Result<(), StoreError>> + Send;

    fn remove(
        &self,
        room_id: RoomId,
    ) -> impl std::future::Future<Output = Result<(), StoreError>> + Send;
}

/// [`RoomStore`] kept in process memory.
#[derive(Default)]
pub struct MemoryStore {
    rooms: Mutex<HashMap<RoomId, RoomSnapshot>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rooms
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl RoomStore for MemoryStore {
    async fn get(&self, room_id: RoomId) -> Result<RoomSnapshot, StoreError> {
        self.rooms
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&room_id)
            .cloned()
            .ok_or(StoreError::NotFound(room_id))
    }

    async fn put(&self, snapshot: &RoomSnapshot) -> Result<(), StoreError> {
        let mut rooms = self.rooms.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(stored) = rooms.get(&snapshot.room_id) {
            if stored.seq > snapshot.seq {
                return Err(StoreError::Stale {
                    room_id: snapshot.room_id,
                    stored: stored.seq,
                    offered: snapshot.seq,
                });
            }
        }
        rooms.insert(snapshot.room_id, snapshot.clone());
        Ok(())
    }

    async fn remove(&self, room_id: RoomId) -> Result<(), StoreError> {
        self.rooms
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&room_id);
        Ok(())
    }
}
