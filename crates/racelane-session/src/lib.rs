//! Player sessions for Racelane.
//!
//! This crate sits between clients and rooms:
//!
//! 1. **Session tracking**: which player is connected, and to which room
//!    ([`SessionManager`])
//! 2. **Reconnection**: a player who drops keeps their seat for a grace
//!    period and can resume with the token handed out on join
//! 3. **Request handling**: [`SessionGateway`] turns [`ClientRequest`]s
//!    into room operations and answers with a [`Response`]
//!
//! ```text
//! Front-end (above)  ← decodes envelopes, owns the socket
//!     ↕
//! Session layer (this crate)  ← identity, grace timers, request routing
//!     ↕
//! Room layer (below)  ← lobby state machine, room actors
//! ```
//!
//! [`ClientRequest`]: racelane_protocol::ClientRequest
//! [`Response`]: racelane_protocol::Response

mod error;
mod gateway;
mod manager;
mod session;

pub use error::SessionError;
pub use gateway::{ClientConnection, SessionGateway};
pub use manager::SessionManager;
pub use session::{Session, SessionConfig, SessionState};
