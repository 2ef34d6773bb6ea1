//! # Racelane
//!
//! Server-authoritative lobby and race backend for multiplayer browser
//! games.
//!
//! Players gather in a room, mark themselves ready, and race. The server
//! owns every room's state, simulates the race from a recorded seed, and
//! streams an ordered event log to every subscriber. Clients apply the
//! events to a snapshot and always end up with the server's state.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use racelane::prelude::*;
//!
//! # async fn serve() -> Result<(), RacelaneError> {
//! let server = RacelaneServer::builder()
//!     .bind("0.0.0.0:8080")
//!     .build()
//!     .await?;
//! server.run().await
//! # }
//! ```

mod config;
mod error;
mod handler;
mod server;

pub use config::ServerConfig;
pub use error::RacelaneError;
pub use server::{RacelaneServer, RacelaneServerBuilder};

pub mod prelude {
    pub use crate::{RacelaneError, RacelaneServer, RacelaneServerBuilder, ServerConfig};
    pub use racelane_broadcast::{Channel, LocalChannel, RetryPolicy};
    pub use racelane_protocol::{
        Applied, ClientRequest, Codec, Delivery, Envelope, ErrorCode, EventPayload, JsonCodec, Payload,
        Phase, PlayerId, RaceEvent, Response, RoomId, RoomSnapshot, RoundOutcome,
    };
    pub use racelane_room::{
        FixedSeed, MemoryStore, RoomConfig, RoomError, RoomRegistry, RoomStore, SeedSource,
        ThreadRngSeeds,
    };
    pub use racelane_session::{SessionConfig, SessionError, SessionGateway};
    pub use racelane_sim::RaceConfig;
}
