//! Race round simulation for Racelane.
//!
//! A round is a pure function of three inputs: the [`RaceConfig`], the
//! seed, and the ordered entrant list. [`RaceSimulator`] draws every step
//! from a PRNG seeded once at construction, so two simulators built from
//! the same inputs emit identical [`TickFrame`]s and rankings. The only
//! outside influence is [`RaceSimulator::forfeit`], which the room calls
//! between ticks when a player leaves.
//!
//! The simulator knows nothing about time. The room actor decides when a
//! tick happens; [`RaceSimulator::run`] plays a whole round at once for
//! audits and tests.

mod config;
mod error;
mod simulator;

pub use config::RaceConfig;
pub use error::SimError;
pub use simulator::{Entrant, RaceRun, RaceSimulator, TickFrame};
