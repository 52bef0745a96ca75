//! Fixed-capacity event ring.

use std::collections::VecDeque;

use crate::model::event::UpdateEvent;

/// Ring statistics for monitoring.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RingStats {
    pub appended: u64,
    pub evicted: u64,
    pub reseeds: u64,
}

/// Bounded, arrival-ordered store of recent events for one channel.
///
/// Appending at capacity evicts the oldest entry. Both ends are O(1).
#[derive(Debug, Clone)]
pub struct EventRing {
    events: VecDeque<UpdateEvent>,
    capacity: usize,
    stats: RingStats,
}

impl EventRing {
    /// A zero capacity is bumped to one so every append is observable.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            events: VecDeque::with_capacity(capacity),
            capacity,
            stats: RingStats::default(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn stats(&self) -> &RingStats {
        &self.stats
    }

    /// Append at the tail, returning the evicted head if the ring was full.
    pub fn push(&mut self, event: UpdateEvent) -> Option<UpdateEvent> {
        let evicted = if self.events.len() >= self.capacity {
            self.stats.evicted += 1;
            self.events.pop_front()
        } else {
            None
        };
        self.events.push_back(event);
        self.stats.appended += 1;
        evicted
    }

    /// Replace the contents wholesale, keeping only the last `capacity` items.
    pub fn replace<I>(&mut self, events: I)
    where
        I: IntoIterator<Item = UpdateEvent>,
    {
        self.events.clear();
        for event in events {
            if self.events.len() == self.capacity {
                self.events.pop_front();
            }
            self.events.push_back(event);
        }
        self.stats.reseeds += 1;
    }

    pub fn iter(&self) -> impl Iterator<Item = &UpdateEvent> {
        self.events.iter()
    }

    pub fn last(&self) -> Option<&UpdateEvent> {
        self.events.back()
    }

    /// Owned copy of the contents, oldest first.
    pub fn to_vec(&self) -> Vec<UpdateEvent> {
        self.events.iter().cloned().collect()
    }
}
