//! Rooms for Racelane: the lobby state machine, room actors and the room
//! registry.
//!
//! Each room runs as an isolated Tokio task (actor model). Requests against
//! one room are serialized through its command channel; different rooms run
//! in parallel.
//!
//! # Key types
//!
//! - [`Room`] — authoritative room state and the lobby operations
//!   (`join`, `set_ready`, `leave`, `start_race`, `reset`, ...)
//! - [`RoomHandle`] — send commands to a running room actor
//! - [`RoomRegistry`] — creates, looks up, expires and recovers rooms
//! - [`RoomStore`] — where room snapshots are kept for crash recovery
//! - [`SeedSource`] — where race seeds come from
//! - [`RoomConfig`] — seats, name rules, race parameters, timers

#![allow(async_fn_in_trait)]

mod actor;
mod config;
mod error;
mod lobby;
mod registry;
mod room;
mod seed;
mod store;

pub use actor::{RoomHandle, RoomInfo};
pub use config::RoomConfig;
pub use error::RoomError;
pub use registry::RoomRegistry;
pub use room::Room;
pub use seed::{FixedSeed, SeedSource, ThreadRngSeeds};
pub use store::{MemoryStore, RoomStore, StoreError};
