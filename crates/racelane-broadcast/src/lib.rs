//! Realtime fan-out for Racelane rooms.
//!
//! Every state change in a room becomes a [`RaceEvent`] with the room's next
//! sequence number. This crate moves those events from the room actor to
//! subscribers:
//!
//! - [`Channel`] — the pub/sub transport the core consumes. [`LocalChannel`]
//!   is the in-process implementation.
//! - [`EventLog`] — bounded replay buffer for resuming subscribers.
//! - [`BroadcastCoordinator`] — owned by one room actor. Publishes events in
//!   order, retries failed publishes, flags the room degraded when retries
//!   run out, and bootstraps late subscribers with a snapshot or a replay.
//!
//! ```text
//! room actor ──enqueue──→ BroadcastCoordinator ──publish──→ Channel ──→ sinks
//!                              │
//!                              └── EventLog (replay on attach)
//! ```
//!
//! [`RaceEvent`]: racelane_protocol::RaceEvent

#![allow(async_fn_in_trait)]

mod channel;
mod coordinator;
mod error;
mod log;

pub use channel::{Channel, DeliverySink, LocalChannel, SubscriptionId};
pub use coordinator::{BroadcastCoordinator, RetryPolicy};
pub use error::ChannelError;
pub use log::EventLog;
