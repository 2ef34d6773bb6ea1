//! Where race seeds come from.

use rand::Rng;

/// Supplies the seed for each new race round.
///
/// The room records every seed it uses in the `PhaseChanged` event that
/// starts the round, so any round can be replayed from the event log.
pub trait SeedSource: Send + Sync + 'static {
    fn next_seed(&self) -> u64;
}

/// Draws seeds from the thread-local CSPRNG.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadRngSeeds;

impl SeedSource for ThreadRngSeeds {
    fn next_seed(&self) -> u64 {
        rand::rng().random()
    }
}

/// Always hands out the same seed. For tests and audit replays.
#[derive(Debug, Clone, Copy)]
pub struct FixedSeed(pub u64);

impl SeedSource for FixedSeed {
    fn next_seed(&self) -> u64 {
        self.0
    }
}
