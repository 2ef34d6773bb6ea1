//! Timers for Racelane room actors.
//!
//! Two primitives, both built to sit inside a room actor's `tokio::select!`
//! loop next to the command receiver:
//!
//! - [`TickScheduler`] — fires at a fixed interval while running. A room
//!   starts it when a race begins and stops it when the round ends.
//! - [`Deadline`] — a one-shot timer that can be armed, re-armed and
//!   cleared. Used for the auto-start countdown and the idle reset.
//!
//! Both pend forever while idle, so an unarmed branch never wins a `select!`.
//!
//! ```ignore
//! loop {
//!     tokio::select! {
//!         Some(cmd) = commands.recv() => { /* mutate room */ }
//!         info = ticks.wait_for_tick() => {
//!             room.advance_race();
//!             ticks.record_tick_end();
//!         }
//!         () = countdown.wait() => { room.start_race(); }
//!     }
//! }
//! ```
//!
//! All timing goes through `tokio::time`, so tests can drive it with a
//! paused clock.

use std::time::Duration;

use tokio::time::{self, Instant};
use tracing::{debug, trace, warn};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// What to do when the actor wakes up late for a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TickPolicy {
    /// Schedule the next tick one interval from now. Late ticks stretch the
    /// round instead of bunching up.
    #[default]
    Skip,
    /// Keep the original cadence. After a stall several ticks may fire
    /// back to back.
    Keep,
}

/// Configuration for a [`TickScheduler`].
#[derive(Debug, Clone)]
pub struct TickConfig {
    /// Time between two ticks.
    pub interval: Duration,
    pub policy: TickPolicy,
    /// Fraction of the interval (0.0–1.0) the per-tick work may take before
    /// a warning is logged.
    pub budget_warn_threshold: f64,
}

impl Default for TickConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(200),
            policy: TickPolicy::default(),
            budget_warn_threshold: 0.8,
        }
    }
}

impl TickConfig {
    /// Shortest interval accepted.
    pub const MIN_INTERVAL: Duration = Duration::from_millis(1);

    pub fn with_interval(interval: Duration) -> Self {
        Self {
            interval,
            ..Default::default()
        }
    }

    /// Clamps out-of-range values. Called by [`TickScheduler::new`].
    pub fn validated(mut self) -> Self {
        if self.interval < Self::MIN_INTERVAL {
            warn!(
                interval_ms = self.interval.as_secs_f64() * 1000.0,
                "tick interval below minimum, clamping"
            );
            self.interval = Self::MIN_INTERVAL;
        }
        self.budget_warn_threshold = self.budget_warn_threshold.clamp(0.0, 1.0);
        self
    }
}

// ---------------------------------------------------------------------------
// TickScheduler
// ---------------------------------------------------------------------------

/// Information about a fired tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickInfo {
    /// Tick number since the last [`TickScheduler::start`], starting at 1.
    pub tick: u64,
    /// `true` if the tick fired more than 10% of an interval late.
    pub overrun: bool,
    /// How late the tick fired.
    pub late_by: Duration,
}

/// Fixed-interval tick source for one room.
pub struct TickScheduler {
    config: TickConfig,
    /// `None` while stopped.
    next_tick: Option<Instant>,
    tick_count: u64,
    total_overruns: u64,
    /// Set when a tick fires, consumed by `record_tick_end`.
    tick_start: Option<Instant>,
}

impl TickScheduler {
    /// Creates a stopped scheduler.
    pub fn new(config: TickConfig) -> Self {
        let config = config.validated();
        debug!(
            interval_ms = config.interval.as_secs_f64() * 1000.0,
            policy = ?config.policy,
            "tick scheduler created"
        );
        Self {
            config,
            next_tick: None,
            tick_count: 0,
            total_overruns: 0,
            tick_start: None,
        }
    }

    /// Starts ticking. The first tick fires one interval from now and the
    /// tick counter restarts at zero.
    pub fn start(&mut self) {
        self.tick_count = 0;
        self.next_tick = Some(Instant::now() + self.config.interval);
    }

    /// Stops ticking. `wait_for_tick` pends until the next `start`.
    pub fn stop(&mut self) {
        if self.next_tick.take().is_some() {
            debug!(ticks = self.tick_count, "tick scheduler stopped");
        }
        self.tick_start = None;
    }

    pub fn is_running(&self) -> bool {
        self.next_tick.is_some()
    }

    /// Waits for the next tick. Pends forever while stopped.
    ///
    /// Cancel-safe: if the future is dropped inside `select!` before it
    /// resolves, the pending deadline is kept.
    pub async fn wait_for_tick(&mut self) -> TickInfo {
        let Some(next) = self.next_tick else {
            return std::future::pending().await;
        };

        time::sleep_until(next).await;

        let now = Instant::now();
        let interval = self.config.interval;
        let late_by = now.saturating_duration_since(next);
        let overrun = late_by > interval / 10;

        self.tick_count += 1;
        self.tick_start = Some(now);
        if overrun {
            self.total_overruns += 1;
            warn!(
                tick = self.tick_count,
                late_ms = late_by.as_secs_f64() * 1000.0,
                "tick fired late"
            );
        }

        self.next_tick = Some(match self.config.policy {
            TickPolicy::Skip => now + interval,
            TickPolicy::Keep => next + interval,
        });

        trace!(tick = self.tick_count, overrun, "tick fired");

        TickInfo {
            tick: self.tick_count,
            overrun,
            late_by,
        }
    }

    /// Marks the end of the work done for the current tick and warns when it
    /// used more than the configured share of the interval.
    pub fn record_tick_end(&mut self) {
        let Some(start) = self.tick_start.take() else {
            return;
        };
        let elapsed = start.elapsed();
        let utilization = elapsed.as_secs_f64() / self.config.interval.as_secs_f64();
        if utilization >= self.config.budget_warn_threshold {
            warn!(
                tick = self.tick_count,
                elapsed_ms = elapsed.as_secs_f64() * 1000.0,
                utilization_pct = format!("{:.1}", utilization * 100.0),
                "tick work approaching interval"
            );
        }
    }

    /// Ticks fired since the last `start`.
    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    /// Late ticks since creation.
    pub fn total_overruns(&self) -> u64 {
        self.total_overruns
    }

    pub fn interval(&self) -> Duration {
        self.config.interval
    }
}

// ---------------------------------------------------------------------------
// Deadline
// ---------------------------------------------------------------------------

/// A re-armable one-shot timer.
#[derive(Debug, Default)]
pub struct Deadline {
    at: Option<Instant>,
}

impl Deadline {
    /// An unarmed deadline.
    pub fn idle() -> Self {
        Self { at: None }
    }

    /// Arms (or re-arms) the deadline to fire `after` from now.
    pub fn arm(&mut self, after: Duration) {
        self.at = Some(Instant::now() + after);
    }

    /// Disarms the deadline.
    pub fn clear(&mut self) {
        self.at = None;
    }

    pub fn is_armed(&self) -> bool {
        self.at.is_some()
    }

    /// Resolves once the deadline passes, then disarms it. Pends forever
    /// while unarmed.
    pub async fn wait(&mut self) {
        let Some(at) = self.at else {
            return std::future::pending().await;
        };
        time::sleep_until(at).await;
        self.at = None;
    }
}
