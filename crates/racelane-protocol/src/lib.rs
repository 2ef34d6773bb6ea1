//! Wire protocol for Racelane.
//!
//! - **Types** ([`PlayerId`], [`RoomId`], [`Phase`], views) — identities and
//!   the observable pieces of a room.
//! - **Events** ([`RaceEvent`], [`EventPayload`]) — the ordered, gapless
//!   record of every state change in a room.
//! - **Snapshots** ([`RoomSnapshot`]) — full room state plus the fold that
//!   advances it one event at a time. Server and clients share it.
//! - **Messages** ([`ClientRequest`], [`Response`], [`Delivery`],
//!   [`Envelope`]) — the client-facing request surface.
//! - **Codec** ([`Codec`], [`JsonCodec`]) — bytes in, bytes out.
//!
//! ```text
//! request ──→ gateway ──→ room ──→ RaceEvent ──→ channel ──→ RoomSnapshot::apply
//! ```

mod codec;
mod error;
mod event;
mod messages;
mod snapshot;
mod types;

pub use codec::Codec;
#[cfg(feature = "json")]
pub use codec::JsonCodec;
pub use error::ProtocolError;
pub use event::{EventKind, EventPayload, RaceEvent};
pub use messages::{
    ClientRequest, Delivery, Envelope, ErrorCode, Payload, Response, RoomSummary,
};
pub use snapshot::{Applied, RaceView, RoomSnapshot};
pub use types::{
    EntrantProgress, EntrantView, Phase, Placement, PlayerId, PlayerView, RaceStart,
    RoomId, RoundOutcome, RoundResult,
};
