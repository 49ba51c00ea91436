//! Bounded FIFO buffer for variable dumps.

use std::collections::VecDeque;

use super::types::DumpEntry;

pub const DEFAULT_MAX_DUMPS: usize = 100;

/// Holds at most `capacity` dumps; pushing past capacity evicts the oldest.
#[derive(Debug, Clone)]
pub struct DumpBuffer {
    capacity: usize,
    entries: VecDeque<DumpEntry>,
}

impl DumpBuffer {
    /// A zero capacity is raised to 1.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: VecDeque::with_capacity(capacity.min(DEFAULT_MAX_DUMPS)),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append a dump, returning the evicted entry if the buffer was full.
    pub fn push(&mut self, entry: DumpEntry) -> Option<DumpEntry> {
        let evicted = if self.entries.len() >= self.capacity {
            self.entries.pop_front()
        } else {
            None
        };
        self.entries.push_back(entry);
        evicted
    }

    /// Shrink or grow the capacity, evicting oldest entries as needed.
    pub fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity.max(1);
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &DumpEntry> {
        self.entries.iter()
    }

    pub fn to_vec(&self) -> Vec<DumpEntry> {
        self.entries.iter().cloned().collect()
    }
}

impl Default for DumpBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_DUMPS)
    }
}
