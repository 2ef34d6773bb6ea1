//! Race parameters.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Parameters of a race round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RaceConfig {
    /// Distance to the finish line.
    pub track_length: f64,
    /// Smallest distance an entrant covers in one tick.
    pub min_step: f64,
    /// Largest distance an entrant covers in one tick.
    pub max_step: f64,
    /// Hard cap on round length. Entrants still running after this many
    /// ticks do not finish.
    pub max_ticks: u64,
    /// Wall-clock time between ticks when a room plays the round live.
    pub tick_interval: Duration,
}

impl Default for RaceConfig {
    fn default() -> Self {
        Self {
            track_length: 100.0,
            min_step: 1.0,
            max_step: 5.0,
            max_ticks: 600,
            tick_interval: Duration::from_millis(200),
        }
    }
}

impl RaceConfig {
    /// Clamps out-of-range values so the config is safe to simulate:
    ///
    /// - `track_length` must be finite and positive (default otherwise).
    /// - `min_step` must be finite and positive (default otherwise).
    /// - `max_step` is raised to `min_step` if below it.
    /// - `max_ticks` is at least 1.
    pub fn validated(mut self) -> Self {
        let defaults = Self::default();
        if !(self.track_length.is_finite() && self.track_length > 0.0) {
            warn!(track_length = self.track_length, "invalid track length, using default");
            self.track_length = defaults.track_length;
        }
        if !(self.min_step.is_finite() && self.min_step > 0.0) {
            warn!(min_step = self.min_step, "invalid min step, using default");
            self.min_step = defaults.min_step;
        }
        if !(self.max_step.is_finite() && self.max_step >= self.min_step) {
            warn!(
                min_step = self.min_step,
                max_step = self.max_step,
                "max step below min step, clamping"
            );
            self.max_step = self.min_step;
        }
        if self.max_ticks == 0 {
            warn!("max_ticks is 0, clamping to 1");
            self.max_ticks = 1;
        }
        self
    }

    /// Upper bound on the ticks any entrant needs to finish.
    pub fn worst_case_ticks(&self) -> u64 {
        (self.track_length / self.min_step).ceil() as u64
    }
}
