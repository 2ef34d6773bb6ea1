//! Bounded replay log.

use std::collections::VecDeque;

use racelane_protocol::RaceEvent;

/// The most recent events of one room, oldest first.
///
/// Holds at most `capacity` events; pushing beyond that evicts the oldest.
/// Events must be pushed in sequence order with no gaps.
#[derive(Debug)]
pub struct EventLog {
    events: VecDeque<RaceEvent>,
    capacity: usize,
    /// Sequence number of the newest event ever pushed (or the starting
    /// point for a log that has not seen any event yet).
    latest: u64,
}

impl EventLog {
    /// An empty log for a room whose state is at sequence 0.
    pub fn new(capacity: usize) -> Self {
        Self::starting_at(capacity, 0)
    }

    /// An empty log for a room whose state is already at `seq`, such as a
    /// room restored from storage.
    pub fn starting_at(capacity: usize, seq: u64) -> Self {
        let capacity = capacity.max(1);
        Self {
            events: VecDeque::with_capacity(capacity),
            capacity,
            latest: seq,
        }
    }

    /// Appends an event, evicting the oldest when full.
    ///
    /// Returns `false` (and drops the event) if it does not directly follow
    /// the newest one.
    pub fn push(&mut self, event: RaceEvent) -> bool {
        if event.seq != self.latest + 1 {
            return false;
        }
        if self.events.len() == self.capacity {
            self.events.pop_front();
        }
        self.latest = event.seq;
        self.events.push_back(event);
        true
    }

    /// Every event after `after`, if the log still covers that range.
    ///
    /// - `Some(vec![])` when `after` is the newest sequence number.
    /// - `None` when events after `after` were evicted, or when `after` is
    ///   ahead of the log.
    pub fn since(&self, after: u64) -> Option<Vec<RaceEvent>> {
        if after > self.latest {
            return None;
        }
        if after == self.latest {
            return Some(Vec::new());
        }
        let oldest = self.oldest_seq()?;
        if oldest > after + 1 {
            return None;
        }
        Some(
            self.events
                .iter()
                .filter(|e| e.seq > after)
                .cloned()
                .collect(),
        )
    }

    /// Sequence number of the oldest event still held.
    pub fn oldest_seq(&self) -> Option<u64> {
        self.events.front().map(|e| e.seq)
    }

    pub fn latest_seq(&self) -> u64 {
        self.latest
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
