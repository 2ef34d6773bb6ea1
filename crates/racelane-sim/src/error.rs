//! Error types for the race simulator.

use racelane_protocol::PlayerId;

/// Errors raised when a round cannot be set up.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SimError {
    /// The round was started with nobody to race. Always a caller bug;
    /// rooms absorb it by finishing the round with empty rankings.
    #[error("race started with no active entrants")]
    EmptyEntrantList,

    /// The same player was listed twice.
    #[error("player {0} entered twice")]
    DuplicateEntrant(PlayerId),
}
