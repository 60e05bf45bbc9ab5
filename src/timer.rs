//! Deadlines for the timers connections arm. The packet loop bounds its wait
//! on the interface by the earliest deadline and feeds expired timers back to
//! the connection table as events.

use std::collections::HashMap;
use std::time::Instant;

use crate::tcp::{connection::Timer, ConnectionKey};

#[derive(Debug, Default)]
pub struct TimerQueue {
    deadlines: HashMap<(ConnectionKey, Timer), Instant>,
}

impl TimerQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arms `timer` for `key` at `at`, replacing any earlier deadline.
    pub fn schedule(&mut self, key: ConnectionKey, timer: Timer, at: Instant) {
        self.deadlines.insert((key, timer), at);
    }

    /// Drops every timer of a connection that no longer exists.
    pub fn cancel(&mut self, key: &ConnectionKey) {
        self.deadlines.retain(|(k, _), _| k != key);
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.deadlines.values().min().copied()
    }

    /// Removes and returns the timers due at `now`, earliest first.
    pub fn expired(&mut self, now: Instant) -> Vec<(ConnectionKey, Timer)> {
        let mut due: Vec<_> = self
            .deadlines
            .iter()
            .filter(|(_, at)| **at <= now)
            .map(|(entry, at)| (*at, *entry))
            .collect();
        due.sort();
        for (_, entry) in &due {
            self.deadlines.remove(entry);
        }
        due.into_iter().map(|(_, entry)| entry).collect()
    }

    pub fn len(&self) -> usize {
        self.deadlines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deadlines.is_empty()
    }
}
