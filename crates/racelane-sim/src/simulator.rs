//! The race simulator.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use racelane_protocol::{
    EntrantProgress, EntrantView, Placement, PlayerId, RoundOutcome, RoundResult,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::{RaceConfig, SimError};

/// One entrant inside the simulator.
#[derive(Debug, Clone, PartialEq)]
pub struct Entrant {
    pub player_id: PlayerId,
    pub progress: f64,
    pub finish_rank: Option<u32>,
    pub forfeited: bool,
}

impl Entrant {
    /// Still on the track: neither finished nor forfeited.
    pub fn is_active(&self) -> bool {
        !self.forfeited && self.finish_rank.is_none()
    }

    pub fn view(&self) -> EntrantView {
        EntrantView {
            player_id: self.player_id,
            progress: self.progress,
            finish_rank: self.finish_rank,
            forfeited: self.forfeited,
        }
    }
}

/// Output of a single simulation step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickFrame {
    pub tick: u64,
    /// Entrants that moved, in join order.
    pub progress: Vec<EntrantProgress>,
    /// Entrants that reached the line this tick, best first.
    pub finished: Vec<Placement>,
}

/// A whole round played without a clock.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RaceRun {
    pub seed: u64,
    pub frames: Vec<TickFrame>,
    pub result: RoundResult,
}

/// Seed-driven simulation of one race round.
///
/// Per tick, every active entrant (in join order) draws a step uniformly
/// from `[min_step, max_step]`; progress is clamped to `track_length`. The
/// first entrant to reach the line in a tick gets the next free rank, so
/// simultaneous arrivals are ranked by join order.
pub struct RaceSimulator {
    config: RaceConfig,
    seed: u64,
    rng: StdRng,
    entrants: Vec<Entrant>,
    tick: u64,
    next_rank: u32,
}

impl RaceSimulator {
    /// Sets up a round for `entrants` (join order).
    ///
    /// # Errors
    /// - [`SimError::EmptyEntrantList`] if `entrants` is empty.
    /// - [`SimError::DuplicateEntrant`] if a player appears twice.
    pub fn new(
        config: RaceConfig,
        seed: u64,
        entrants: &[PlayerId],
    ) -> Result<Self, SimError> {
        if entrants.is_empty() {
            return Err(SimError::EmptyEntrantList);
        }
        for (i, id) in entrants.iter().enumerate() {
            if entrants[..i].contains(id) {
                return Err(SimError::DuplicateEntrant(*id));
            }
        }

        let config = config.validated();
        debug!(
            seed,
            entrants = entrants.len(),
            track_length = config.track_length,
            "race simulator created"
        );

        Ok(Self {
            rng: StdRng::seed_from_u64(seed),
            seed,
            entrants: entrants
                .iter()
                .map(|&player_id| Entrant {
                    player_id,
                    progress: 0.0,
                    finish_rank: None,
                    forfeited: false,
                })
                .collect(),
            config,
            tick: 0,
            next_rank: 1,
        })
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn config(&self) -> &RaceConfig {
        &self.config
    }

    /// Ticks simulated so far.
    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn entrants(&self) -> &[Entrant] {
        &self.entrants
    }

    /// Entrants still on the track.
    pub fn active_count(&self) -> usize {
        self.entrants.iter().filter(|e| e.is_active()).count()
    }

    /// `true` once nobody is left on the track or `max_ticks` is reached.
    pub fn is_over(&self) -> bool {
        self.active_count() == 0 || self.tick >= self.config.max_ticks
    }

    /// Takes an entrant out of the round. Its progress freezes and it will
    /// not be ranked.
    ///
    /// Returns `false` if the player is unknown, already forfeited, or has
    /// already finished (a finished entrant keeps its rank).
    pub fn forfeit(&mut self, player_id: PlayerId) -> bool {
        match self
            .entrants
            .iter_mut()
            .find(|e| e.player_id == player_id)
        {
            Some(entrant) if entrant.is_active() => {
                entrant.forfeited = true;
                debug!(%player_id, tick = self.tick, "entrant forfeited");
                true
            }
            _ => false,
        }
    }

    /// Advances the round by one tick. Returns `None` once the round is over.
    pub fn step(&mut self) -> Option<TickFrame> {
        if self.is_over() {
            return None;
        }
        self.tick += 1;

        let (min, max) = (self.config.min_step, self.config.max_step);
        let track = self.config.track_length;
        let mut progress = Vec::new();
        let mut finished = Vec::new();

        for entrant in self.entrants.iter_mut().filter(|e| e.is_active()) {
            let step = self.rng.random_range(min..=max);
            entrant.progress = (entrant.progress + step).min(track);
            progress.push(EntrantProgress {
                player_id: entrant.player_id,
                progress: entrant.progress,
            });

            if entrant.progress >= track {
                entrant.finish_rank = Some(self.next_rank);
                finished.push(Placement {
                    player_id: entrant.player_id,
                    rank: self.next_rank,
                });
                self.next_rank += 1;
            }
        }

        trace!(
            tick = self.tick,
            moved = progress.len(),
            finished = finished.len(),
            "race tick"
        );

        Some(TickFrame {
            tick: self.tick,
            progress,
            finished,
        })
    }

    /// The round's result, once it is over.
    pub fn result(&self) -> Option<RoundResult> {
        if !self.is_over() {
            return None;
        }

        let mut rankings: Vec<Placement> = self
            .entrants
            .iter()
            .filter_map(|e| {
                e.finish_rank.map(|rank| Placement {
                    player_id: e.player_id,
                    rank,
                })
            })
            .collect();
        rankings.sort_by_key(|p| p.rank);

        let did_not_finish: Vec<PlayerId> = self
            .entrants
            .iter()
            .filter(|e| e.is_active())
            .map(|e| e.player_id)
            .collect();

        let outcome = if did_not_finish.is_empty() {
            RoundOutcome::Completed
        } else {
            RoundOutcome::TimedOut
        };

        Some(RoundResult {
            outcome,
            rankings,
            did_not_finish,
        })
    }

    /// Plays the rest of the round at once.
    pub fn run(mut self) -> RaceRun {
        let mut frames = Vec::new();
        while let Some(frame) = self.step() {
            frames.push(frame);
        }
        let result = self
            .result()
            .unwrap_or_else(|| RoundResult::empty(RoundOutcome::Aborted));
        RaceRun {
            seed: self.seed,
            frames,
            result,
        }
    }
}
